//! The health/replacement loop (§4.4): consumes the aggregated health
//! status the store already derived from `ReportHealth` calls (I5), tracks
//! each node's consecutive-unhealthy streak, and drives the
//! cordon -> (optional) drain -> terminate lifecycle.
//!
//! Open question resolved (SPEC_FULL.md §9): when `auto_replace=false` the
//! core cordons an unhealthy node and stops there — it never transitions
//! the node to DRAINING or terminates it; that is left to the operator.
//! Only `auto_replace=true` pools get the full drain-then-terminate path,
//! and because no RPC in §4.5 lets a node agent report "drain complete",
//! termination there is driven by the drain-timeout alone.

use crate::lifecycle::LifecycleAction;
use crate::state::PoolRuntimeState;
use chrono::{DateTime, Utc};
use navarch_config::Pool;
use navarch_observe::OperationsMetrics;
use navarch_proto::{CommandType, NodeStatus};
use navarch_provider::Provider;
use navarch_store::{NodeFilter, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthTickOutcome {
    pub cordoned: u32,
    pub drained: u32,
    pub terminated: u32,
}

pub struct HealthLoop {
    pub(crate) pool: Pool,
    pub(crate) store: Store,
    pub(crate) providers: HashMap<String, Arc<dyn Provider>>,
    pub(crate) state: Arc<PoolRuntimeState>,
    pub(crate) metrics: Arc<OperationsMetrics>,
}

impl HealthLoop {
    pub async fn tick(&self, now: DateTime<Utc>) -> HealthTickOutcome {
        let filter = NodeFilter { pool: Some(self.pool.name.clone()), ..Default::default() };
        let nodes = self
            .store
            .list_nodes(&filter)
            .await
            .into_iter()
            .filter(|n| n.status != NodeStatus::Terminated);

        let mut outcome = HealthTickOutcome::default();
        self.metrics.record_health_check();

        for node in nodes {
            let action = self.state.observe_health(&node.node_id, node.health_status, now, &self.pool.health_policy);

            match action {
                LifecycleAction::NoAction => {}

                LifecycleAction::Cordon => {
                    let _ = self.store.enqueue_command(&node.node_id, CommandType::Cordon).await;
                    if let Err(err) = self.store.set_node_status(&node.node_id, NodeStatus::Cordoned).await {
                        warn!(node_id = %node.node_id, %err, "health loop: failed to cordon");
                        continue;
                    }
                    outcome.cordoned += 1;
                    self.metrics.record_cordon();
                    info!(pool = %self.pool.name, node_id = %node.node_id, "node cordoned: consecutive unhealthy threshold reached");
                }

                LifecycleAction::CordonAndDrain => {
                    let _ = self.store.enqueue_command(&node.node_id, CommandType::Cordon).await;
                    if let Err(err) = self.store.set_node_status(&node.node_id, NodeStatus::Cordoned).await {
                        warn!(node_id = %node.node_id, %err, "health loop: failed to cordon before drain");
                        continue;
                    }
                    outcome.cordoned += 1;
                    self.metrics.record_cordon();

                    self.state.request_replacement();
                    let _ = self.store.enqueue_command(&node.node_id, CommandType::Drain).await;
                    if self.store.set_node_status(&node.node_id, NodeStatus::Draining).await.is_ok() {
                        outcome.drained += 1;
                        self.metrics.record_drain();
                        info!(pool = %self.pool.name, node_id = %node.node_id, "node draining: replacement requested for next evaluation tick");
                    }
                }

                LifecycleAction::TerminateDrained => {
                    if self.terminate_drained(&node.node_id, &node.provider).await {
                        outcome.terminated += 1;
                    }
                }
            }
        }

        outcome
    }

    async fn terminate_drained(&self, node_id: &navarch_proto::NodeId, provider_name: &str) -> bool {
        let Some(provider) = self.providers.get(provider_name) else {
            warn!(node_id = %node_id, provider = provider_name, "health loop: provider not registered, cannot terminate drained node");
            return false;
        };
        match provider.terminate(node_id.as_str()).await {
            Ok(()) => {
                if let Err(err) = self.store.set_node_status(node_id, NodeStatus::Terminated).await {
                    warn!(%node_id, %err, "health loop: node vanished before terminate status update");
                }
                let _ = self.store.mark_instance_terminated(node_id.as_str()).await;
                self.state.forget_node(node_id);
                self.metrics.record_termination();
                info!(node_id = %node_id, "drain timeout elapsed: node terminated");
                true
            }
            Err(err) => {
                warn!(node_id = %node_id, %err, "health loop: terminate of drained node failed");
                false
            }
        }
    }
}
