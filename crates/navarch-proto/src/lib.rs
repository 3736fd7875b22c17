//! Core data model for the Navarch GPU-fleet control plane.
//!
//! These are the types the State Store, Pool Manager, and RPC Surface all
//! share: nodes, their metric samples, health-check results, the per-node
//! command queue, and provider instance records. Nothing here does I/O.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

/// Maximum number of recent metric samples retained per node (§3: capacity 100).
pub const METRIC_BUFFER_CAPACITY: usize = 100;

// ─── Node identity ────────────────────────────────────────────────────────────

/// Opaque node identifier. Newtype rather than a bare `String` so call sites
/// can't accidentally pass a pool name or provider name where a node id is
/// expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Validate a node id's shape: non-empty, bounded, and restricted to an
/// alphabet safe for use in log lines and URL path segments.
pub fn validate_node_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Validate a pool name with the same alphabet rule as node ids.
pub fn validate_pool_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= 128 && validate_node_id(name)
}

// ─── GPU descriptor & node metadata ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuDescriptor {
    pub index: u32,
    pub uuid: String,
    pub name: String,
    pub pci_bus_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub hostname: Option<String>,
    pub internal_ip: Option<String>,
    pub external_ip: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl NodeMetadata {
    /// The pool this node belongs to, per the `labels["pool"]` convention
    /// (§3 invariant c).
    pub fn pool_name(&self) -> Option<&str> {
        self.labels.get("pool").map(String::as_str)
    }
}

// ─── Node lifecycle & health status ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Active,
    Cordoned,
    Draining,
    Terminated,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Cordoned => write!(f, "cordoned"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

impl NodeStatus {
    /// Parse one of the case-insensitive short forms the operator CLI uses
    /// (§6: "active", "cordoned", "draining", "terminated").
    pub fn parse_short_form(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "cordoned" => Some(Self::Cordoned),
            "draining" => Some(Self::Draining),
            "terminated" => Some(Self::Terminated),
            _ => None,
        }
    }

    /// §3 invariant (c)/(f): whether a node in this status counts toward
    /// "current" for scale-up arithmetic. CORDONED/DRAINING nodes still
    /// exist (and count against `max_nodes`) but are excluded from the
    /// "current" the autoscaler sees as available capacity relative to min.
    pub fn counts_as_current(self) -> bool {
        matches!(self, Self::Active | Self::Cordoned | Self::Draining)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    #[default]
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ─── Node ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub node_id: NodeId,
    pub provider: String,
    pub region: String,
    pub zone: Option<String>,
    pub instance_type: String,
    pub gpus: Vec<GpuDescriptor>,
    pub metadata: NodeMetadata,
    pub status: NodeStatus,
    pub health_status: HealthStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    metrics: VecDeque<MetricSample>,
}

impl Node {
    /// Construct a freshly-registered node: status ACTIVE, health UNKNOWN,
    /// no heartbeat yet (§4.5 RegisterNode).
    pub fn new_registered(
        node_id: NodeId,
        provider: impl Into<String>,
        region: impl Into<String>,
        zone: Option<String>,
        instance_type: impl Into<String>,
        gpus: Vec<GpuDescriptor>,
        metadata: NodeMetadata,
    ) -> Self {
        Self {
            node_id,
            provider: provider.into(),
            region: region.into(),
            zone,
            instance_type: instance_type.into(),
            gpus,
            metadata,
            status: NodeStatus::Active,
            health_status: HealthStatus::Unknown,
            last_heartbeat: None,
            metrics: VecDeque::with_capacity(METRIC_BUFFER_CAPACITY),
        }
    }

    /// Push a new metric sample, evicting the oldest if the buffer is full.
    /// FIFO by construction: samples are always appended at the back (§3
    /// invariant d, I2).
    pub fn push_metric_sample(&mut self, sample: MetricSample) {
        if self.metrics.len() >= METRIC_BUFFER_CAPACITY {
            self.metrics.pop_front();
        }
        self.metrics.push_back(sample);
    }

    /// Samples captured at or after `since`, in non-decreasing timestamp
    /// order (I2). The buffer is already FIFO-ordered, so this is a filter,
    /// not a sort.
    pub fn recent_metrics(&self, since: DateTime<Utc>) -> Vec<MetricSample> {
        self.metrics
            .iter()
            .filter(|s| s.captured_at >= since)
            .cloned()
            .collect()
    }

    pub fn all_metrics(&self) -> impl Iterator<Item = &MetricSample> {
        self.metrics.iter()
    }

    pub fn metrics_len(&self) -> usize {
        self.metrics.len()
    }

    /// Whether this node belongs to `pool` per the labels convention
    /// and is still countable (§3 invariant c: not TERMINATED).
    pub fn belongs_to_pool(&self, pool: &str) -> bool {
        self.metadata.pool_name() == Some(pool) && self.status != NodeStatus::Terminated
    }
}

// ─── Metric samples ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub gpu_index: u32,
    pub utilization_pct: f32,
    pub temperature_c: f32,
    pub power_draw_w: f32,
    pub memory_used_mb: u64,
    pub xid_error: Option<u32>,
    pub captured_at: DateTime<Utc>,
}

// ─── Health checks ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckOutcome {
    Pass,
    Degraded,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub node_id: NodeId,
    pub check_name: String,
    pub outcome: CheckOutcome,
    pub message: String,
    pub observed_at: DateTime<Utc>,
}

/// Aggregate a node's health from its most-recent-per-check results (I5):
/// UNHEALTHY iff any FAIL; else DEGRADED iff any DEGRADED; else HEALTHY iff
/// every result PASS; else (no results at all) UNKNOWN.
///
/// Callers are expected to have already reduced `results` to one entry per
/// `check_name` (the store keeps only the latest per check); this function
/// does not re-dedupe.
pub fn aggregate_health(results: &[HealthCheckResult]) -> HealthStatus {
    if results.is_empty() {
        return HealthStatus::Unknown;
    }
    if results.iter().any(|r| r.outcome == CheckOutcome::Fail) {
        return HealthStatus::Unhealthy;
    }
    if results.iter().any(|r| r.outcome == CheckOutcome::Degraded) {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

// ─── Commands ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandType {
    Cordon,
    Drain,
    Uncordon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CommandState {
    Pending,
    Acknowledged,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub command_id: Uuid,
    pub node_id: NodeId,
    pub command_type: CommandType,
    pub state: CommandState,
    pub issued_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

impl Command {
    pub fn new(node_id: NodeId, command_type: CommandType) -> Self {
        Self {
            command_id: Uuid::new_v4(),
            node_id,
            command_type,
            state: CommandState::Pending,
            issued_at: Utc::now(),
            acknowledged_at: None,
        }
    }
}

/// Whether issuing `command_type` against a node currently in `status` is a
/// no-op because the type is already effective (I6, §4.5 IssueCommand).
/// `Uncordon` on a `Draining` node is deliberately NOT treated as a no-op —
/// it is InvalidArgument territory, handled one layer up by the RPC surface
/// (open question resolved: see SPEC_FULL.md §9).
pub fn command_is_already_effective(command_type: CommandType, status: NodeStatus) -> bool {
    matches!(
        (command_type, status),
        (CommandType::Cordon, NodeStatus::Cordoned)
            | (CommandType::Drain, NodeStatus::Draining)
            | (CommandType::Uncordon, NodeStatus::Active)
    )
}

// ─── Instance records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstanceState {
    Provisioning,
    Registered,
    Stale,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: String,
    pub pool_name: String,
    pub provider: String,
    pub state: InstanceState,
    pub created_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
    pub node_id: Option<NodeId>,
}

impl InstanceRecord {
    pub fn new_provisioning(
        instance_id: impl Into<String>,
        pool_name: impl Into<String>,
        provider: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            pool_name: pool_name.into(),
            provider: provider.into(),
            state: InstanceState::Provisioning,
            created_at,
            registered_at: None,
            node_id: None,
        }
    }

    /// Whether this record has been PROVISIONING longer than
    /// `registration_timeout`, i.e. is a stale-sweep candidate.
    pub fn is_stale_candidate(&self, now: DateTime<Utc>, registration_timeout: chrono::Duration) -> bool {
        self.state == InstanceState::Provisioning && now - self.created_at > registration_timeout
    }
}
