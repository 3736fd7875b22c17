//! The node-facing RPC surface: an `axum::Router` exposing RegisterNode,
//! SendHeartbeat, ReportHealth, GetNodeCommands, ListNodes, GetNode,
//! IssueCommand, plus `/health` and `/ready`.
//!
//! Authentication/TLS are left to a front-door proxy — `navarchd` binds
//! this router to a plain HTTP/1.1 listener; an operator deploying behind
//! TLS termination puts it in front.

#![forbid(unsafe_code)]

mod error;
mod handlers;
mod types;

pub use error::NavarchApiError;
pub use types::*;

use axum::routing::{get, post};
use axum::Router;
use navarch_config::ControlPlaneConfig;
use navarch_store::Store;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Health checks every newly registered node is told to run, until the
/// config surface grows a per-pool `enabled_checks` list (not named in
/// SPEC_FULL.md's `Pool` fields — tracked as a config gap, not a core one).
pub const DEFAULT_HEALTH_CHECKS: &[&str] = &["nvml", "ssh_reachable"];

pub struct AppState {
    pub store: Store,
    pub pools: Vec<navarch_config::Pool>,
    pub control_plane: ControlPlaneConfig,
    pub metrics: Arc<navarch_observe::OperationsMetrics>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/nodes", post(handlers::register_node).get(handlers::list_nodes))
        .route("/v1/nodes/:node_id", get(handlers::get_node))
        .route("/v1/nodes/:node_id/heartbeat", post(handlers::send_heartbeat))
        .route("/v1/nodes/:node_id/health", post(handlers::report_health))
        .route("/v1/nodes/:node_id/commands", get(handlers::get_node_commands).post(handlers::issue_command))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use navarch_config::ControlPlaneConfig;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            store: Store::new(),
            pools: Vec::new(),
            control_plane: ControlPlaneConfig::default(),
            metrics: Arc::new(navarch_observe::OperationsMetrics::new()),
        })
    }

    #[tokio::test]
    async fn health_always_ok() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ready_ok_with_empty_store() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn register_then_get_node_round_trips() {
        let app = router(state());
        let body = serde_json::json!({
            "node_id": "n-1",
            "provider": "fake",
            "region": "us-east",
            "instance_type": "a100.x1",
            "metadata": {"labels": {"pool": "training"}},
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/nodes")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/v1/nodes/n-1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_unknown_node_is_404() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/v1/nodes/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
