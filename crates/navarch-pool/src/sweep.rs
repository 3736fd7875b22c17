//! Stale-instance sweep (§4.4): a low-frequency, pool-manager-wide task
//! that finds InstanceRecords which have sat in PROVISIONING past the
//! registration timeout and marks them STALE. Stale instances are not
//! auto-terminated at the provider — that is explicitly an operator action
//! — but they stop counting toward a pool's "current" for scale-up
//! arithmetic simply by virtue of never having become a node.

use chrono::{DateTime, Utc};
use navarch_config::Pool;
use navarch_observe::OperationsMetrics;
use navarch_proto::InstanceState;
use navarch_store::Store;
use std::sync::Arc;
use tracing::warn;

pub struct StaleSweep {
    pub(crate) pools: Vec<Pool>,
    pub(crate) store: Store,
    pub(crate) metrics: Arc<OperationsMetrics>,
}

impl StaleSweep {
    /// One sweep pass across every pool's instance records. Returns the
    /// number of instances newly marked STALE, for logging/tests.
    pub async fn sweep(&self, now: DateTime<Utc>) -> u32 {
        let mut marked = 0;
        for pool in &self.pools {
            let timeout = chrono::Duration::from_std(pool.registration_timeout).unwrap_or_default();
            for record in self.store.list_instances_for_pool(&pool.name).await {
                if record.state == InstanceState::Provisioning && record.is_stale_candidate(now, timeout) {
                    if let Err(err) = self.store.mark_stale(&record.instance_id).await {
                        warn!(instance_id = %record.instance_id, %err, "stale sweep: failed to mark instance stale");
                        continue;
                    }
                    marked += 1;
                    self.metrics.record_stale_instance();
                }
            }
        }
        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navarch_autoscale::{Autoscaler, ReactiveConfig};
    use navarch_config::{HealthPolicy, ProviderSelection, ProviderSelectionStrategy};
    use std::time::Duration;

    fn pool(name: &str, registration_timeout: Duration) -> Pool {
        Pool {
            name: name.to_string(),
            providers: ProviderSelection {
                strategy: ProviderSelectionStrategy::Priority,
                provider_names: vec!["fake".to_string()],
                weights: vec![1],
            },
            instance_type: "a100.x1".to_string(),
            regions: vec!["us-east".to_string()],
            min_nodes: 0,
            max_nodes: 10,
            cooldown: Duration::from_secs(300),
            eval_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
            registration_timeout,
            autoscaler: Autoscaler::Reactive(ReactiveConfig::default()),
            health_policy: HealthPolicy { unhealthy_after: 2, auto_replace: false, drain_timeout: Duration::from_secs(600) },
        }
    }

    #[tokio::test]
    async fn marks_provisioning_instance_stale_after_timeout() {
        let store = Store::new();
        let now = Utc::now();
        let record = store.create_instance("training", "fake", now).await;

        let sweep = StaleSweep {
            pools: vec![pool("training", Duration::from_secs(600))],
            store: store.clone(),
            metrics: Arc::new(OperationsMetrics::new()),
        };

        let still_fresh = sweep.sweep(now + chrono::Duration::minutes(5)).await;
        assert_eq!(still_fresh, 0);

        let after_timeout = sweep.sweep(now + chrono::Duration::minutes(11)).await;
        assert_eq!(after_timeout, 1);

        let stale = store.list_stale_instances().await;
        assert_eq!(stale[0].instance_id, record.instance_id);
    }

    #[tokio::test]
    async fn registered_instances_are_never_marked_stale() {
        let store = Store::new();
        let now = Utc::now();
        let record = store.create_instance("training", "fake", now).await;
        store
            .mark_registered(&record.instance_id, navarch_proto::NodeId::new("n-1"), now)
            .await
            .unwrap();

        let sweep = StaleSweep {
            pools: vec![pool("training", Duration::from_secs(1))],
            store: store.clone(),
            metrics: Arc::new(OperationsMetrics::new()),
        };
        let marked = sweep.sweep(now + chrono::Duration::minutes(30)).await;
        assert_eq!(marked, 0);
    }
}
