//! The evaluation loop (§4.4): one tick samples state, asks the pool's
//! autoscaler for a target, and reconciles the delta against the provider(s)
//! — honoring the floor rule, cooldown, and the max-one-scaling-action-per-
//! tick invariant (I4, §3 invariant e).

use crate::metrics_source::MetricsSource;
use crate::selection::ProviderSelector;
use crate::state::PoolRuntimeState;
use chrono::{DateTime, Utc};
use navarch_autoscale::PoolState;
use navarch_config::Pool;
use navarch_proto::{Node, NodeId, NodeStatus};
use navarch_observe::OperationsMetrics;
use navarch_provider::{Provider, ProvisionRequest, ProvisionedSummary};
use navarch_store::{NodeFilter, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Summary of one evaluation tick — returned for logging and, in tests,
/// direct assertion instead of parsing log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub current: u32,
    pub target: u32,
    pub provisioned: u32,
    pub terminated: u32,
    pub skipped_cooldown: bool,
}

pub struct EvaluationLoop {
    pub(crate) pool: Pool,
    pub(crate) store: Store,
    pub(crate) providers: HashMap<String, Arc<dyn Provider>>,
    pub(crate) selector: ProviderSelector,
    pub(crate) metrics_source: Arc<dyn MetricsSource>,
    pub(crate) state: Arc<PoolRuntimeState>,
    pub(crate) metrics: Arc<OperationsMetrics>,
}

/// How far back `RecentMetrics` looks when aggregating `avg_gpu_util`
/// (§4.4 step 1: "last 5 minutes").
const UTIL_WINDOW_MINUTES: i64 = 5;

impl EvaluationLoop {
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        let nodes = self.live_pool_nodes().await;
        let current = nodes.len() as u32;

        let avg_gpu_util = self.average_utilization(&nodes, now).await;
        self.state.record_util_sample(avg_gpu_util);

        let queue_depth = self.metrics_source.queue_depth(&self.pool.name).await;
        let pool_state = PoolState {
            current,
            min: self.pool.min_nodes,
            max: self.pool.max_nodes,
            avg_gpu_util,
            util_history: self.state.util_history(),
            queued_jobs: queue_depth.queued_jobs,
            running_jobs: queue_depth.running_jobs,
            now,
        };

        let target = self.pool.autoscaler.recommend(&pool_state);
        let floor_forced = current < self.pool.min_nodes;

        let cooldown = chrono::Duration::from_std(self.pool.cooldown).unwrap_or_else(|_| chrono::Duration::seconds(0));
        if !floor_forced && current >= self.pool.min_nodes && self.state.cooldown_active(now, cooldown) {
            debug!(pool = %self.pool.name, current, target, "evaluation tick: cooldown active, skipping");
            return TickOutcome { current, target, skipped_cooldown: true, ..Default::default() };
        }

        let replacements = self.state.take_pending_replacements();
        let delta = target as i64 - current as i64;
        let scale_up_count = delta.max(0) as u32 + replacements;

        let mut outcome = TickOutcome { current, target, ..Default::default() };

        if scale_up_count > 0 {
            let capacity_left = self.pool.max_nodes.saturating_sub(current);
            let to_provision = scale_up_count.min(capacity_left);
            outcome.provisioned = self.scale_up(to_provision, now).await;
            if outcome.provisioned > 0 {
                self.state.record_scale_action(now);
                self.metrics.record_scale_up();
            }
        } else if delta < 0 {
            let to_terminate = (-delta) as u32;
            // never take the pool below min_nodes (§4.4 step 6)
            let allowed = current.saturating_sub(self.pool.min_nodes).min(to_terminate);
            outcome.terminated = self.scale_down(&nodes, allowed, now).await;
            if outcome.terminated > 0 {
                self.state.record_scale_action(now);
                self.metrics.record_scale_down();
            }
        }

        info!(
            pool = %self.pool.name, current, target,
            provisioned = outcome.provisioned, terminated = outcome.terminated,
            "evaluation tick complete"
        );
        outcome
    }

    async fn live_pool_nodes(&self) -> Vec<Node> {
        let filter = NodeFilter { pool: Some(self.pool.name.clone()), ..Default::default() };
        self.store
            .list_nodes(&filter)
            .await
            .into_iter()
            .filter(|n| n.status != NodeStatus::Terminated)
            .collect()
    }

    async fn average_utilization(&self, nodes: &[Node], now: DateTime<Utc>) -> f64 {
        let since = now - chrono::Duration::minutes(UTIL_WINDOW_MINUTES);
        let mut total = 0.0;
        let mut count = 0u32;
        for node in nodes {
            if let Ok(samples) = self.store.recent_metrics(&node.node_id, since).await {
                for sample in samples {
                    total += sample.utilization_pct as f64;
                    count += 1;
                }
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Attempt `count` independent provisions, each trying the pool's
    /// provider selection order until one succeeds. Every failed attempt is
    /// logged and does not abort the others (§4.4 step 6).
    async fn scale_up(&self, count: u32, now: DateTime<Utc>) -> u32 {
        let mut succeeded = 0;
        for i in 0..count {
            let order = self.selector.attempt_order(&self.providers).await;
            if order.is_empty() {
                warn!(pool = %self.pool.name, "scale-up: no providers configured");
                break;
            }

            let region = self
                .pool
                .regions
                .get((i as usize) % self.pool.regions.len().max(1))
                .cloned()
                .unwrap_or_default();

            let request = ProvisionRequest {
                name: format!("{}-{}", self.pool.name, uuid::Uuid::new_v4()),
                instance_type: self.pool.instance_type.clone(),
                region,
                zone: None,
                ssh_keys: Vec::new(),
                labels: HashMap::from([("pool".to_string(), self.pool.name.clone())]),
                user_data: String::new(),
            };

            if self.try_provision_in_order(&order, &request, now).await {
                succeeded += 1;
            }
        }
        succeeded
    }

    async fn try_provision_in_order(
        &self,
        order: &[Arc<dyn Provider>],
        request: &ProvisionRequest,
        now: DateTime<Utc>,
    ) -> bool {
        for provider in order {
            self.metrics.record_provision_attempt();
            match provider.provision(request).await {
                Ok(summary) => {
                    self.on_provisioned(provider.as_ref(), &summary, now).await;
                    return true;
                }
                Err(err) if err.is_retryable() => {
                    warn!(pool = %self.pool.name, provider = provider.name(), %err, "scale-up: transient provider error, trying next provider");
                }
                Err(err) => {
                    self.metrics.record_permanent_provider_failure();
                    let signature = format!("{}:{}:{}", self.pool.name, provider.name(), err);
                    if self.state.should_log_permanent_failure(&signature, now) {
                        warn!(pool = %self.pool.name, provider = provider.name(), %err, "scale-up: permanent provider error");
                    }
                }
            }
        }
        self.metrics.record_provision_error();
        false
    }

    async fn on_provisioned(&self, provider: &dyn Provider, summary: &ProvisionedSummary, now: DateTime<Utc>) {
        let record = self
            .store
            .create_instance_with_id(summary.id.clone(), self.pool.name.clone(), provider.name(), now)
            .await;
        info!(pool = %self.pool.name, instance_id = %record.instance_id, provider = provider.name(), "provisioned instance");

        if provider.self_bootstraps() {
            // A self-bootstrapping provider has already registered the node
            // synchronously as part of `provision` (§4.2), under a node id
            // equal to the instance id — register the link immediately
            // rather than waiting on the stale-sweep window.
            let node_id = NodeId::new(summary.id.clone());
            if let Err(err) = self.store.mark_registered(&summary.id, node_id, now).await {
                warn!(pool = %self.pool.name, instance_id = %summary.id, %err, "self-bootstrapping provider did not register a matching node");
            }
        }
    }

    /// Select `count` nodes for termination — CORDONED first, then
    /// DRAINING, then ACTIVE ordered by lowest recent utilization, ties
    /// broken by oldest `created_at` from the matching instance record
    /// (§4.4 step 6) — and terminate them via the provider that owns each.
    async fn scale_down(&self, nodes: &[Node], count: u32, now: DateTime<Utc>) -> u32 {
        if count == 0 {
            return 0;
        }

        let instances = self.store.list_instances_for_pool(&self.pool.name).await;
        let created_at: HashMap<NodeId, DateTime<Utc>> = instances
            .into_iter()
            .filter_map(|r| r.node_id.map(|node_id| (node_id, r.created_at)))
            .collect();

        let mut utilization: HashMap<NodeId, f64> = HashMap::new();
        let since = now - chrono::Duration::minutes(UTIL_WINDOW_MINUTES);
        for node in nodes {
            if node.status != NodeStatus::Active {
                continue;
            }
            let util = if let Ok(samples) = self.store.recent_metrics(&node.node_id, since).await {
                if samples.is_empty() {
                    f64::INFINITY
                } else {
                    samples.iter().map(|s| s.utilization_pct as f64).sum::<f64>() / samples.len() as f64
                }
            } else {
                f64::INFINITY
            };
            utilization.insert(node.node_id.clone(), util);
        }

        let mut candidates: Vec<&Node> = nodes.iter().collect();
        candidates.sort_by(|a, b| {
            termination_rank(a).cmp(&termination_rank(b)).then_with(|| {
                let ua = utilization.get(&a.node_id).copied().unwrap_or(f64::INFINITY);
                let ub = utilization.get(&b.node_id).copied().unwrap_or(f64::INFINITY);
                ua.partial_cmp(&ub).unwrap_or(std::cmp::Ordering::Equal).then_with(|| {
                    let ca = created_at.get(&a.node_id).copied().unwrap_or(DateTime::<Utc>::MIN_UTC);
                    let cb = created_at.get(&b.node_id).copied().unwrap_or(DateTime::<Utc>::MIN_UTC);
                    ca.cmp(&cb)
                })
            })
        });

        let mut terminated = 0;
        for node in candidates.into_iter().take(count as usize) {
            if self.terminate_node(node).await {
                terminated += 1;
            }
        }
        terminated
    }

    async fn terminate_node(&self, node: &Node) -> bool {
        let Some(provider) = self.providers.get(&node.provider) else {
            warn!(pool = %self.pool.name, node_id = %node.node_id, provider = %node.provider, "scale-down: provider not registered, cannot terminate");
            return false;
        };

        match provider.terminate(node.node_id.as_str()).await {
            Ok(()) => {
                if let Err(err) = self.store.set_node_status(&node.node_id, NodeStatus::Terminated).await {
                    warn!(node_id = %node.node_id, %err, "scale-down: node vanished from store before status update");
                }
                let _ = self.store.mark_instance_terminated(node.node_id.as_str()).await;
                self.state.forget_node(&node.node_id);
                self.metrics.record_termination();
                info!(pool = %self.pool.name, node_id = %node.node_id, "terminated node");
                true
            }
            Err(err) => {
                warn!(pool = %self.pool.name, node_id = %node.node_id, %err, "scale-down: terminate failed");
                false
            }
        }
    }
}

/// CORDONED (0) before DRAINING (1) before ACTIVE (2) — §4.4 step 6's
/// termination order.
fn termination_rank(node: &Node) -> u8 {
    match node.status {
        NodeStatus::Cordoned => 0,
        NodeStatus::Draining => 1,
        NodeStatus::Active => 2,
        NodeStatus::Terminated => 3,
    }
}
