//! The State Store: the single shared mutable resource the pool manager and
//! RPC surface both operate on.
//!
//! Each entity kind (nodes, instance records, command queues, health
//! results) gets its own `Arc<RwLock<_>>`, mirroring the per-domain lock
//! layout clawnode's `SharedState` uses rather than one lock over
//! everything — mutations on one entity never block readers of another.
//! `Store` is cheap to clone (it's a bundle of `Arc`s) and is shared across
//! every pool loop and RPC handler task.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use navarch_error::{NavarchError, NavarchResult};
use navarch_proto::{
    aggregate_health, Command, CommandState, CommandType, GpuDescriptor, HealthCheckResult,
    HealthStatus, InstanceRecord, InstanceState, MetricSample, Node, NodeId, NodeMetadata,
    NodeStatus,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Filter for `list_nodes`. `None` fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    pub provider: Option<String>,
    pub region: Option<String>,
    pub pool: Option<String>,
    pub status: Option<NodeStatus>,
}

impl NodeFilter {
    fn matches(&self, node: &Node) -> bool {
        if let Some(provider) = &self.provider {
            if &node.provider != provider {
                return false;
            }
        }
        if let Some(region) = &self.region {
            if &node.region != region {
                return false;
            }
        }
        if let Some(pool) = &self.pool {
            if node.metadata.pool_name() != Some(pool.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if node.status != status {
                return false;
            }
        }
        true
    }
}

/// Input to `register_node` — everything the RPC surface's RegisterNode
/// handler has learned about the calling node.
#[derive(Debug, Clone)]
pub struct RegisterNodeInput {
    pub node_id: NodeId,
    pub provider: String,
    pub region: String,
    pub zone: Option<String>,
    pub instance_type: String,
    pub gpus: Vec<GpuDescriptor>,
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone)]
pub struct Store {
    nodes: Arc<RwLock<HashMap<NodeId, Node>>>,
    instances: Arc<RwLock<HashMap<String, InstanceRecord>>>,
    commands: Arc<RwLock<HashMap<NodeId, VecDeque<Command>>>>,
    health_results: Arc<RwLock<HashMap<NodeId, HashMap<String, HealthCheckResult>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            instances: Arc::new(RwLock::new(HashMap::new())),
            commands: Arc::new(RwLock::new(HashMap::new())),
            health_results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    // ─── Nodes ────────────────────────────────────────────────────────────

    /// Upsert a node with status ACTIVE and health UNKNOWN (§4.5
    /// RegisterNode). If the node already exists, its labels are replaced
    /// by the new registration's labels; its metric history and last
    /// heartbeat are left untouched.
    pub async fn register_node(&self, input: RegisterNodeInput) -> NavarchResult<Node> {
        let mut nodes = self.nodes.write().await;
        let node = if let Some(existing) = nodes.get_mut(&input.node_id) {
            existing.provider = input.provider;
            existing.region = input.region;
            existing.zone = input.zone;
            existing.instance_type = input.instance_type;
            existing.gpus = input.gpus;
            existing.metadata = input.metadata;
            existing.status = NodeStatus::Active;
            existing.health_status = HealthStatus::Unknown;
            existing.clone()
        } else {
            let node = Node::new_registered(
                input.node_id.clone(),
                input.provider,
                input.region,
                input.zone,
                input.instance_type,
                input.gpus,
                input.metadata,
            );
            nodes.insert(input.node_id, node.clone());
            node
        };
        debug!(node_id = %node.node_id, "node registered");
        Ok(node)
    }

    /// Append a metric sample and bump `last_heartbeat`. Returns `NotFound`
    /// for unknown nodes without auto-registering them (§4.5 SendHeartbeat).
    pub async fn update_heartbeat(
        &self,
        node_id: &NodeId,
        sample: MetricSample,
        now: DateTime<Utc>,
    ) -> NavarchResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| NavarchError::not_found("node", node_id.to_string()))?;
        node.last_heartbeat = Some(now);
        node.push_metric_sample(sample);
        Ok(())
    }

    /// Store health-check results, recompute aggregated health (I5), and
    /// write it back onto the node. Returns the new aggregated status.
    pub async fn record_health(
        &self,
        node_id: &NodeId,
        results: Vec<HealthCheckResult>,
    ) -> NavarchResult<HealthStatus> {
        {
            let nodes = self.nodes.read().await;
            if !nodes.contains_key(node_id) {
                return Err(NavarchError::not_found("node", node_id.to_string()));
            }
        }

        let aggregated = {
            let mut health_results = self.health_results.write().await;
            let per_check = health_results.entry(node_id.clone()).or_default();
            for result in results {
                per_check.insert(result.check_name.clone(), result);
            }
            let latest: Vec<HealthCheckResult> = per_check.values().cloned().collect();
            aggregate_health(&latest)
        };

        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(node_id) {
            node.health_status = aggregated;
        }
        Ok(aggregated)
    }

    pub async fn list_nodes(&self, filter: &NodeFilter) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        nodes.values().filter(|n| filter.matches(n)).cloned().collect()
    }

    pub async fn get_node(&self, node_id: &NodeId) -> NavarchResult<Node> {
        let nodes = self.nodes.read().await;
        nodes
            .get(node_id)
            .cloned()
            .ok_or_else(|| NavarchError::not_found("node", node_id.to_string()))
    }

    /// Samples captured at or after `since`, non-decreasing by timestamp (I2).
    pub async fn recent_metrics(&self, node_id: &NodeId, since: DateTime<Utc>) -> NavarchResult<Vec<MetricSample>> {
        let nodes = self.nodes.read().await;
        let node = nodes
            .get(node_id)
            .ok_or_else(|| NavarchError::not_found("node", node_id.to_string()))?;
        Ok(node.recent_metrics(since))
    }

    /// Set a node's lifecycle status directly. Used by the pool manager's
    /// health/replacement loop (cordon/drain/terminate transitions) — not
    /// one of §4.1's named RPC-facing operations, but the store mutation
    /// those transitions require.
    pub async fn set_node_status(&self, node_id: &NodeId, status: NodeStatus) -> NavarchResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(node_id)
            .ok_or_else(|| NavarchError::not_found("node", node_id.to_string()))?;
        node.status = status;
        Ok(())
    }

    // ─── Commands ─────────────────────────────────────────────────────────

    /// Enqueue a command, honoring idempotence (I6): if `command_type` is
    /// already effective for the node's current status, no command is
    /// queued and a synthetic already-completed `Command` is returned
    /// instead. UNCORDON against a DRAINING node is `InvalidArgument`
    /// (open question resolved against the spec's explicit call, see
    /// SPEC_FULL.md §9).
    pub async fn enqueue_command(&self, node_id: &NodeId, command_type: CommandType) -> NavarchResult<Command> {
        let status = {
            let nodes = self.nodes.read().await;
            nodes
                .get(node_id)
                .ok_or_else(|| NavarchError::not_found("node", node_id.to_string()))?
                .status
        };

        if command_type == CommandType::Uncordon && status == NodeStatus::Draining {
            return Err(NavarchError::invalid_argument("cannot UNCORDON a node that is DRAINING"));
        }

        if navarch_proto::command_is_already_effective(command_type, status) {
            let mut command = Command::new(node_id.clone(), command_type);
            command.state = CommandState::Completed;
            command.acknowledged_at = Some(command.issued_at);
            return Ok(command);
        }

        let command = Command::new(node_id.clone(), command_type);
        let mut commands = self.commands.write().await;
        commands.entry(node_id.clone()).or_default().push_back(command.clone());
        Ok(command)
    }

    /// Atomically drain all PENDING commands for a node, marking them
    /// ACKNOWLEDGED (I3). A second call on the same node returns no
    /// duplicates because the queue no longer holds them.
    pub async fn drain_commands_for_node(&self, node_id: &NodeId) -> NavarchResult<Vec<Command>> {
        {
            let nodes = self.nodes.read().await;
            if !nodes.contains_key(node_id) {
                return Err(NavarchError::not_found("node", node_id.to_string()));
            }
        }

        let mut commands = self.commands.write().await;
        let queue = commands.entry(node_id.clone()).or_default();
        let mut drained = Vec::with_capacity(queue.len());
        while let Some(mut command) = queue.pop_front() {
            command.state = CommandState::Acknowledged;
            command.acknowledged_at = Some(Utc::now());
            drained.push(command);
        }
        Ok(drained)
    }

    /// Non-mutating count of PENDING commands for a node — the
    /// `pending_commands_hint` a heartbeat ack carries so a node agent knows
    /// whether to call `GetNodeCommands` before its next poll interval.
    pub async fn pending_command_count(&self, node_id: &NodeId) -> u32 {
        let commands = self.commands.read().await;
        commands.get(node_id).map(|q| q.len() as u32).unwrap_or(0)
    }

    // ─── Instance records ──────────────────────────────────────────────────

    pub async fn create_instance(
        &self,
        pool_name: impl Into<String>,
        provider: impl Into<String>,
        now: DateTime<Utc>,
    ) -> InstanceRecord {
        let instance_id = format!("i-{}", Uuid::new_v4());
        self.create_instance_with_id(instance_id, pool_name, provider, now).await
    }

    /// Like `create_instance`, but with the provider's own instance id
    /// rather than a store-generated one — used by the pool loop
    /// immediately after `Provider::provision` returns, so the record can
    /// later be matched against the node that registers under that same id
    /// (§3 InstanceRecord: "Created when the pool loop calls
    /// provider.Provision").
    pub async fn create_instance_with_id(
        &self,
        instance_id: impl Into<String>,
        pool_name: impl Into<String>,
        provider: impl Into<String>,
        now: DateTime<Utc>,
    ) -> InstanceRecord {
        let instance_id = instance_id.into();
        let record = InstanceRecord::new_provisioning(instance_id.clone(), pool_name, provider, now);
        let mut instances = self.instances.write().await;
        instances.insert(instance_id, record.clone());
        record
    }

    pub async fn mark_registered(&self, instance_id: &str, node_id: NodeId, now: DateTime<Utc>) -> NavarchResult<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| NavarchError::not_found("instance", instance_id.to_string()))?;
        record.state = InstanceState::Registered;
        record.registered_at = Some(now);
        record.node_id = Some(node_id);
        Ok(())
    }

    pub async fn mark_stale(&self, instance_id: &str) -> NavarchResult<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| NavarchError::not_found("instance", instance_id.to_string()))?;
        record.state = InstanceState::Stale;
        warn!(instance_id, "instance marked stale: never registered before timeout");
        Ok(())
    }

    pub async fn mark_instance_terminated(&self, instance_id: &str) -> NavarchResult<()> {
        let mut instances = self.instances.write().await;
        let record = instances
            .get_mut(instance_id)
            .ok_or_else(|| NavarchError::not_found("instance", instance_id.to_string()))?;
        record.state = InstanceState::Terminated;
        Ok(())
    }

    pub async fn get_instance(&self, instance_id: &str) -> NavarchResult<InstanceRecord> {
        let instances = self.instances.read().await;
        instances
            .get(instance_id)
            .cloned()
            .ok_or_else(|| NavarchError::not_found("instance", instance_id.to_string()))
    }

    pub async fn list_stale_instances(&self) -> Vec<InstanceRecord> {
        let instances = self.instances.read().await;
        instances.values().filter(|r| r.state == InstanceState::Stale).cloned().collect()
    }

    /// All instance records for a pool, any state — used by the stale-sweep
    /// task to find PROVISIONING candidates and by operator-facing instance
    /// enumeration (scenario 6: "operator-facing enumeration of instances
    /// does" surface stale/provisioning instances that aren't nodes yet).
    pub async fn list_instances_for_pool(&self, pool_name: &str) -> Vec<InstanceRecord> {
        let instances = self.instances.read().await;
        instances.values().filter(|r| r.pool_name == pool_name).cloned().collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
