//! The Pool Manager (§4.4): owns one evaluation loop and one health loop per
//! configured pool, plus a single pool-manager-wide stale-instance sweep.
//! This is the cooperative-task core described in §5 — every loop is a
//! plain tokio task communicating only through the shared `Store`; there is
//! no other mutable state crossing task boundaries except the per-pool
//! bookkeeping in [`state::PoolRuntimeState`].

#![forbid(unsafe_code)]

mod evaluation;
mod health;
mod lifecycle;
mod metrics_source;
mod selection;
mod state;
mod sweep;

pub use evaluation::{EvaluationLoop, TickOutcome};
pub use health::{HealthLoop, HealthTickOutcome};
pub use lifecycle::{LifecycleAction, NodeLifecycleState};
pub use metrics_source::{MetricsSource, NullMetricsSource, QueueDepth};
pub use selection::ProviderSelector;
pub use state::PoolRuntimeState;
pub use sweep::StaleSweep;

use navarch_config::Pool;
use navarch_observe::OperationsMetrics;
use navarch_provider::Provider;
use navarch_store::Store;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Owns every pool's loops for the process's lifetime. Pools are immutable
/// at run time (§3), so the pool list and provider map are fixed at
/// construction; only `Store` content and per-pool runtime bookkeeping
/// change while running.
pub struct PoolManager {
    pools: Vec<Pool>,
    store: Store,
    providers: HashMap<String, Arc<dyn Provider>>,
    metrics_source: Arc<dyn MetricsSource>,
    metrics: Arc<OperationsMetrics>,
    shutdown_timeout: Duration,
    runtime_states: HashMap<String, Arc<PoolRuntimeState>>,
    cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PoolManager {
    pub fn new(
        pools: Vec<Pool>,
        store: Store,
        providers: HashMap<String, Arc<dyn Provider>>,
        metrics_source: Arc<dyn MetricsSource>,
        metrics: Arc<OperationsMetrics>,
        shutdown_timeout: Duration,
    ) -> Self {
        let runtime_states =
            pools.iter().map(|p| (p.name.clone(), Arc::new(PoolRuntimeState::new()))).collect();
        Self {
            pools,
            store,
            providers,
            metrics_source,
            metrics,
            shutdown_timeout,
            runtime_states,
            cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The per-pool runtime bookkeeping, exposed so the RPC surface (or
    /// tests) can read pending-replacement counts etc. without reaching
    /// into the loops themselves.
    pub fn runtime_state(&self, pool_name: &str) -> Option<Arc<PoolRuntimeState>> {
        self.runtime_states.get(pool_name).cloned()
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Spawn one evaluation loop, one health loop per pool, and one
    /// pool-manager-wide stale-instance sweep (§4.4's Start(ctx)).
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();

        for pool in &self.pools {
            let state = self.runtime_states[&pool.name].clone();

            let eval = Arc::new(EvaluationLoop {
                pool: pool.clone(),
                store: self.store.clone(),
                providers: self.providers.clone(),
                selector: ProviderSelector::new(pool.providers.clone()),
                metrics_source: self.metrics_source.clone(),
                state: state.clone(),
                metrics: self.metrics.clone(),
            });
            let eval_interval = pool.eval_interval;
            let eval_cancel = self.cancel.clone();
            let pool_name = pool.name.clone();
            handles.push(tokio::spawn(async move {
                run_ticking_loop(pool_name, "evaluation", eval_interval, eval_cancel, move |now| {
                    let eval = eval.clone();
                    async move {
                        eval.tick(now).await;
                    }
                })
                .await;
            }));

            let health = Arc::new(HealthLoop {
                pool: pool.clone(),
                store: self.store.clone(),
                providers: self.providers.clone(),
                state,
                metrics: self.metrics.clone(),
            });
            let health_interval = pool.health_check_interval;
            let health_cancel = self.cancel.clone();
            let pool_name = pool.name.clone();
            handles.push(tokio::spawn(async move {
                run_ticking_loop(pool_name, "health", health_interval, health_cancel, move |now| {
                    let health = health.clone();
                    async move {
                        health.tick(now).await;
                    }
                })
                .await;
            }));
        }

        let sweep = Arc::new(StaleSweep {
            pools: self.pools.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
        });
        let sweep_cancel = self.cancel.clone();
        handles.push(tokio::spawn(async move {
            run_ticking_loop(
                "*".to_string(),
                "stale-sweep",
                navarch_config::system_defaults::STALE_SWEEP_INTERVAL,
                sweep_cancel,
                move |now| {
                    let sweep = sweep.clone();
                    async move {
                        sweep.sweep(now).await;
                    }
                },
            )
            .await;
        }));

        info!(pools = self.pools.len(), "pool manager started");
    }

    /// Cancel every loop and wait (bounded by `shutdown_timeout`) for any
    /// in-flight tick to finish before returning — a pending
    /// Provision/Terminate call is never abandoned mid-call (§4.4's Stop).
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.handles.lock());
        let joined = tokio::time::timeout(self.shutdown_timeout, futures_util::future::join_all(handles)).await;
        match joined {
            Ok(_) => info!("pool manager stopped cleanly"),
            Err(_) => warn!(timeout_secs = self.shutdown_timeout.as_secs(), "pool manager shutdown timed out waiting for loops"),
        }
    }
}

/// Drive one pool's loop: tick on a fixed-period timer, sequentially —
/// the cancellation check only happens between ticks (at the `select!`),
/// so an in-flight tick body always runs to completion (§5 suspension
/// points). `MissedTickBehavior::Delay` means a slow tick doesn't cause a
/// burst of catch-up ticks afterward.
async fn run_ticking_loop<F, Fut>(
    pool_name: String,
    loop_name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    F: FnMut(chrono::DateTime<chrono::Utc>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(pool = %pool_name, loop_name, "loop cancelled, exiting");
                break;
            }
            _ = ticker.tick() => {
                tick(chrono::Utc::now()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navarch_autoscale::{Autoscaler, ReactiveConfig};
    use navarch_config::{HealthPolicy, ProviderSelection, ProviderSelectionStrategy};
    use navarch_provider::FakeProvider;
    use navarch_store::NodeFilter;
    use std::time::Duration as StdDuration;

    fn pool() -> Pool {
        Pool {
            name: "training".to_string(),
            providers: ProviderSelection {
                strategy: ProviderSelectionStrategy::Priority,
                provider_names: vec!["fake".to_string()],
                weights: vec![1],
            },
            instance_type: "a100.x1".to_string(),
            regions: vec!["us-east".to_string()],
            min_nodes: 2,
            max_nodes: 10,
            cooldown: StdDuration::from_secs(300),
            eval_interval: StdDuration::from_millis(20),
            health_check_interval: StdDuration::from_millis(20),
            registration_timeout: StdDuration::from_secs(600),
            autoscaler: Autoscaler::Reactive(ReactiveConfig::default()),
            health_policy: HealthPolicy { unhealthy_after: 2, auto_replace: false, drain_timeout: StdDuration::from_secs(600) },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_drives_cold_start_to_min_nodes() {
        let store = Store::new();
        let provider: Arc<dyn Provider> = Arc::new(FakeProvider::new(store.clone()));
        let mut providers = HashMap::new();
        providers.insert("fake".to_string(), provider);

        let manager = Arc::new(PoolManager::new(
            vec![pool()],
            store.clone(),
            providers,
            Arc::new(NullMetricsSource),
            Arc::new(OperationsMetrics::new()),
            StdDuration::from_secs(5),
        ));
        manager.start();

        tokio::time::advance(StdDuration::from_millis(50)).await;
        tokio::task::yield_now().await;

        let nodes = store.list_nodes(&NodeFilter { pool: Some("training".to_string()), ..Default::default() }).await;
        assert_eq!(nodes.len(), 2);

        manager.stop().await;
    }
}
