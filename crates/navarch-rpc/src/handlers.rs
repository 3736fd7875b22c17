//! One handler function per RPC operation (SPEC_FULL.md §4.5), dispatched
//! by the `axum::Router` built in `lib.rs` the way `clawnode::commands`
//! routes one function per command name — the difference here is the
//! dispatch table is `axum`'s path router instead of a string match.

use crate::error::NavarchApiError;
use crate::types::*;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use navarch_proto::{Node, NodeId, NodeStatus};
use navarch_store::{NodeFilter, RegisterNodeInput};
use std::sync::Arc;

pub async fn register_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<RegisterNodeResponse>, NavarchApiError> {
    let node_id = NodeId::new(req.node_id);
    let pool_name = req.metadata.pool_name().map(str::to_string);

    let node = state
        .store
        .register_node(RegisterNodeInput {
            node_id: node_id.clone(),
            provider: req.provider,
            region: req.region,
            zone: req.zone,
            instance_type: req.instance_type,
            gpus: req.gpus,
            metadata: req.metadata,
        })
        .await?;

    let health_check_interval = pool_name
        .as_deref()
        .and_then(|name| state.pools.iter().find(|p| p.name == name))
        .map(|p| p.health_check_interval)
        .unwrap_or(state.control_plane.health_check_interval);

    Ok(Json(RegisterNodeResponse {
        node_id: node.node_id,
        assigned_config: AssignedConfig {
            health_check_interval_secs: health_check_interval.as_secs(),
            heartbeat_interval_secs: state.control_plane.heartbeat_interval.as_secs(),
            enabled_checks: crate::DEFAULT_HEALTH_CHECKS.iter().map(|s| s.to_string()).collect(),
        },
    }))
}

pub async fn send_heartbeat(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, NavarchApiError> {
    let node_id = NodeId::new(node_id);
    let now = req.timestamp.unwrap_or_else(Utc::now);
    for sample in req.metrics {
        state.store.update_heartbeat(&node_id, sample, now).await?;
    }
    let pending_commands_hint = state.store.pending_command_count(&node_id).await;
    Ok(Json(HeartbeatResponse { ack: true, pending_commands_hint }))
}

pub async fn report_health(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<ReportHealthRequest>,
) -> Result<Json<ReportHealthResponse>, NavarchApiError> {
    let node_id = NodeId::new(node_id);
    let health_status = state.store.record_health(&node_id, req.results).await?;
    Ok(Json(ReportHealthResponse { ack: true, health_status }))
}

pub async fn get_node_commands(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<Vec<navarch_proto::Command>>, NavarchApiError> {
    let node_id = NodeId::new(node_id);
    let commands = state.store.drain_commands_for_node(&node_id).await?;
    Ok(Json(commands))
}

pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListNodesQuery>,
) -> Result<Json<Vec<Node>>, NavarchApiError> {
    let status = query
        .status
        .as_deref()
        .map(parse_status)
        .transpose()
        .map_err(NavarchApiError)?;
    let filter = NodeFilter { provider: query.provider, region: query.region, pool: query.pool, status };
    Ok(Json(state.store.list_nodes(&filter).await))
}

pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<Node>, NavarchApiError> {
    let node = state.store.get_node(&NodeId::new(node_id)).await?;
    Ok(Json(node))
}

pub async fn issue_command(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<IssueCommandRequest>,
) -> Result<Json<IssueCommandResponse>, NavarchApiError> {
    let node_id = NodeId::new(node_id);
    let command = state.store.enqueue_command(&node_id, req.command_type).await?;
    Ok(Json(IssueCommandResponse { command_id: command.command_id }))
}

/// Case-insensitive node-status short forms, per §6's operator-surface note.
fn parse_status(raw: &str) -> Result<NodeStatus, navarch_error::NavarchError> {
    NodeStatus::parse_short_form(raw)
        .ok_or_else(|| navarch_error::NavarchError::invalid_argument(format!("unknown node status: {raw}")))
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn ready(State(state): State<Arc<AppState>>) -> &'static str {
    let _ = state.store.list_nodes(&NodeFilter::default()).await;
    "ready"
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    navarch_observe::MetricsExporter::new(state.metrics.clone()).render()
}
