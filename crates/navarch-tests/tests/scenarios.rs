//! End-to-end scenarios against real `navarch-store` + `navarch-pool` +
//! `FakeProvider` wiring (§8 of the system's behavioral spec) — no mocks.
//! Each test drives a `PoolManager` with paused tokio time so a "tick" can
//! be advanced deterministically instead of sleeping wall-clock seconds.

use chrono::Utc;
use navarch_autoscale::{Autoscaler, ReactiveConfig};
use navarch_config::{HealthPolicy, Pool, ProviderSelection, ProviderSelectionStrategy};
use navarch_observe::OperationsMetrics;
use navarch_pool::{NullMetricsSource, PoolManager};
use navarch_proto::{CheckOutcome, HealthCheckResult, NodeId, NodeMetadata, NodeStatus};
use navarch_provider::{FakeProvider, Provider};
use navarch_store::{NodeFilter, RegisterNodeInput, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn pool(name: &str, min: u32, max: u32) -> Pool {
    Pool {
        name: name.to_string(),
        providers: ProviderSelection {
            strategy: ProviderSelectionStrategy::Priority,
            provider_names: vec!["fake".to_string()],
            weights: vec![1],
        },
        instance_type: "a100.x1".to_string(),
        regions: vec!["us-east".to_string()],
        min_nodes: min,
        max_nodes: max,
        cooldown: Duration::from_secs(5 * 60),
        eval_interval: Duration::from_millis(20),
        health_check_interval: Duration::from_millis(20),
        registration_timeout: Duration::from_secs(10 * 60),
        autoscaler: Autoscaler::Reactive(ReactiveConfig::default()),
        health_policy: HealthPolicy { unhealthy_after: 2, auto_replace: false, drain_timeout: Duration::from_secs(10 * 60) },
    }
}

fn fake_providers(store: &Store) -> HashMap<String, Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = Arc::new(FakeProvider::new(store.clone()));
    let mut providers = HashMap::new();
    providers.insert("fake".to_string(), provider);
    providers
}

fn manager(pool: Pool, store: Store) -> Arc<PoolManager> {
    Arc::new(PoolManager::new(
        vec![pool],
        store.clone(),
        fake_providers(&store),
        Arc::new(NullMetricsSource),
        Arc::new(OperationsMetrics::new()),
        Duration::from_secs(5),
    ))
}

async fn register(store: &Store, id: &str, pool_name: &str) {
    let mut metadata = NodeMetadata::default();
    metadata.labels.insert("pool".to_string(), pool_name.to_string());
    store
        .register_node(RegisterNodeInput {
            node_id: NodeId::new(id),
            provider: "fake".to_string(),
            region: "us-east".to_string(),
            zone: None,
            instance_type: "a100.x1".to_string(),
            gpus: vec![],
            metadata,
        })
        .await
        .unwrap();
}

async fn heartbeat(store: &Store, id: &str, util: f32, now: chrono::DateTime<Utc>) {
    store
        .update_heartbeat(
            &NodeId::new(id),
            navarch_proto::MetricSample {
                gpu_index: 0,
                utilization_pct: util,
                temperature_c: 60.0,
                power_draw_w: 150.0,
                memory_used_mb: 1024,
                xid_error: None,
                captured_at: now,
            },
            now,
        )
        .await
        .unwrap();
}

/// Scenario 1: cold start / floor. Pool `training` min=2 max=10, no nodes.
/// After one evaluation tick, exactly two nodes are ACTIVE.
#[tokio::test(start_paused = true)]
async fn scenario_cold_start_floor() {
    let store = Store::new();
    let mgr = manager(pool("training", 2, 10), store.clone());
    mgr.start();

    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    let nodes = store.list_nodes(&NodeFilter { pool: Some("training".to_string()), ..Default::default() }).await;
    assert_eq!(nodes.len(), 2);
    assert!(nodes.iter().all(|n| n.status == NodeStatus::Active));

    mgr.stop().await;
}

/// Scenario 2: scale-up under load. 3 ACTIVE nodes at 85% util, reactive
/// autoscaler (75/25), cooldown 5 min, last scale 10 min ago -> one more
/// node provisioned.
#[tokio::test(start_paused = true)]
async fn scenario_scale_up_under_load() {
    let store = Store::new();
    let mgr = manager(pool("training", 1, 10), store.clone());

    let now = Utc::now();
    for i in 0..3 {
        let id = format!("n-{i}");
        register(&store, &id, "training").await;
        heartbeat(&store, &id, 85.0, now).await;
    }
    if let Some(state) = mgr.runtime_state("training") {
        state.record_scale_action(now - chrono::Duration::minutes(10));
    }

    mgr.start();
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    let nodes = store.list_nodes(&NodeFilter { pool: Some("training".to_string()), ..Default::default() }).await;
    assert_eq!(nodes.len(), 4);

    mgr.stop().await;
}

/// Scenario 3: cooldown suppression. Same shape, but the last scale was 2
/// minutes ago (within the 5-minute cooldown) -> no provision happens.
#[tokio::test(start_paused = true)]
async fn scenario_cooldown_suppression() {
    let store = Store::new();
    let mgr = manager(pool("training", 1, 10), store.clone());

    let now = Utc::now();
    for i in 0..3 {
        let id = format!("n-{i}");
        register(&store, &id, "training").await;
        heartbeat(&store, &id, 90.0, now).await;
    }
    if let Some(state) = mgr.runtime_state("training") {
        state.record_scale_action(now - chrono::Duration::minutes(2));
    }

    mgr.start();
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    let nodes = store.list_nodes(&NodeFilter { pool: Some("training".to_string()), ..Default::default() }).await;
    assert_eq!(nodes.len(), 3);

    mgr.stop().await;
}

/// Scenario 4: scale-down tie-break. Four nodes: A active/10%, B cordoned,
/// C active/15%, D active/12%. Target 3 -> B (cordoned) is terminated.
#[tokio::test(start_paused = true)]
async fn scenario_scale_down_prefers_cordoned() {
    let store = Store::new();
    let mgr = manager(pool("training", 1, 10), store.clone());

    let now = Utc::now();
    for id in ["a", "b", "c", "d"] {
        register(&store, id, "training").await;
    }
    store.set_node_status(&NodeId::new("b"), NodeStatus::Cordoned).await.unwrap();
    heartbeat(&store, "a", 10.0, now).await;
    heartbeat(&store, "c", 15.0, now).await;
    heartbeat(&store, "d", 12.0, now).await;
    if let Some(state) = mgr.runtime_state("training") {
        state.record_scale_action(now - chrono::Duration::minutes(10));
    }

    mgr.start();
    tokio::time::advance(Duration::from_millis(50)).await;
    tokio::task::yield_now().await;

    let b = store.get_node(&NodeId::new("b")).await.unwrap();
    assert_eq!(b.status, NodeStatus::Terminated);
    for id in ["a", "c", "d"] {
        let node = store.get_node(&NodeId::new(id)).await.unwrap();
        assert_eq!(node.status, NodeStatus::Active);
    }

    mgr.stop().await;
}

/// Scenario 5: unhealthy replacement. Node X fails two consecutive health
/// checks -> cordoned; with `auto_replace=true`, the next evaluation tick
/// provisions a replacement and X transitions to DRAINING.
#[tokio::test(start_paused = true)]
async fn scenario_unhealthy_replacement() {
    let store = Store::new();
    let mut pool = pool("training", 1, 10);
    pool.health_policy.auto_replace = true;
    pool.health_policy.unhealthy_after = 2;
    let mgr = manager(pool, store.clone());

    register(&store, "x", "training").await;
    mgr.start();

    for _ in 0..2 {
        store
            .record_health(
                &NodeId::new("x"),
                vec![HealthCheckResult {
                    node_id: NodeId::new("x"),
                    check_name: "nvml".to_string(),
                    outcome: CheckOutcome::Fail,
                    message: "xid".to_string(),
                    observed_at: Utc::now(),
                }],
            )
            .await
            .unwrap();
        tokio::time::advance(Duration::from_millis(25)).await;
        tokio::task::yield_now().await;
    }

    let x = store.get_node(&NodeId::new("x")).await.unwrap();
    assert_eq!(x.status, NodeStatus::Draining);

    // next evaluation tick provisions a replacement for the requested drain
    tokio::time::advance(Duration::from_millis(25)).await;
    tokio::task::yield_now().await;

    let active = store
        .list_nodes(&NodeFilter { pool: Some("training".to_string()), status: Some(NodeStatus::Active), ..Default::default() })
        .await;
    assert_eq!(active.len(), 1);
    assert_ne!(active[0].node_id, NodeId::new("x"));

    mgr.stop().await;
}

/// Scenario 6: stale instance. An instance that never registers a node
/// within the registration timeout is marked STALE and never surfaces via
/// `ListNodes`, but does via instance enumeration.
#[tokio::test(start_paused = true)]
async fn scenario_stale_instance() {
    let store = Store::new();
    let mut pool = pool("training", 0, 10);
    pool.registration_timeout = Duration::from_millis(10);
    let mgr = manager(pool, store.clone());

    let now = Utc::now();
    let record = store.create_instance("training", "fake", now).await;

    mgr.start();
    tokio::time::advance(navarch_config::system_defaults::STALE_SWEEP_INTERVAL + Duration::from_secs(1)).await;
    tokio::task::yield_now().await;

    let stale = store.list_stale_instances().await;
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].instance_id, record.instance_id);

    let nodes = store.list_nodes(&NodeFilter { pool: Some("training".to_string()), ..Default::default() }).await;
    assert!(nodes.is_empty());

    let instances = store.list_instances_for_pool("training").await;
    assert_eq!(instances.len(), 1);

    mgr.stop().await;
}
