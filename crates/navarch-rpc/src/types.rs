//! Wire message shapes for the node-facing RPC surface (SPEC_FULL.md §4.5 /
//! §6). Field-for-field with `spec.md` §6's abstract shapes; bodies that
//! only re-expose an existing `navarch-proto` type (e.g. `Node`, `Command`)
//! are serialized directly rather than duplicated here.

use navarch_proto::{CommandType, GpuDescriptor, MetricSample, NodeId, NodeMetadata};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub provider: String,
    pub region: String,
    #[serde(default)]
    pub zone: Option<String>,
    pub instance_type: String,
    #[serde(default)]
    pub gpus: Vec<GpuDescriptor>,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Serialize)]
pub struct AssignedConfig {
    pub health_check_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub enabled_checks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterNodeResponse {
    pub node_id: NodeId,
    pub assigned_config: AssignedConfig,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub metrics: Vec<MetricSample>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub ack: bool,
    pub pending_commands_hint: u32,
}

#[derive(Debug, Deserialize)]
pub struct ReportHealthRequest {
    #[serde(default)]
    pub results: Vec<navarch_proto::HealthCheckResult>,
}

#[derive(Debug, Serialize)]
pub struct ReportHealthResponse {
    pub ack: bool,
    pub health_status: navarch_proto::HealthStatus,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListNodesQuery {
    pub provider: Option<String>,
    pub region: Option<String>,
    pub pool: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueCommandRequest {
    pub command_type: CommandType,
}

#[derive(Debug, Serialize)]
pub struct IssueCommandResponse {
    pub command_id: uuid::Uuid,
}
