//! Per-pool runtime state the evaluation and health loops share: the
//! cooldown clock, rolling utilization history the predictive autoscaler
//! consumes, each node's health/drain lifecycle machine, and the
//! permanent-provider-failure log rate limiter.
//!
//! None of this is in the State Store (§4.1) — it is private bookkeeping
//! local to one pool's loops, guarded the way `navarch-store` guards
//! entities: one lock per concern, not one lock over the whole struct.

use crate::lifecycle::{LifecycleAction, NodeLifecycleState};
use chrono::{DateTime, Utc};
use navarch_config::HealthPolicy;
use navarch_proto::{HealthStatus, NodeId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// How many ticks of `avg_gpu_util` the predictive autoscaler's lookback can
/// draw from. Generous relative to the default lookback of 10 so a pool
/// configured with a longer lookback still has history to use.
const UTIL_HISTORY_CAPACITY: usize = 64;

/// Rate limit for PermanentProvider failure log lines: at most one per
/// minute per (pool, failure-signature) (§7).
const PERMANENT_FAILURE_LOG_INTERVAL_SECS: i64 = 60;

/// Rate-limits PermanentProvider failure log lines to one per signature per
/// `PERMANENT_FAILURE_LOG_INTERVAL_SECS` (§7), the way `claw-observe`'s
/// `AuditLogger` bounds its own retention — repurposed here for rate
/// limiting rather than retention.
#[derive(Debug, Default)]
struct PermanentFailureLimiter {
    log_times: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PermanentFailureLimiter {
    fn should_log(&self, signature: &str, now: DateTime<Utc>) -> bool {
        let mut log_times = self.log_times.lock();
        match log_times.get(signature) {
            Some(last) if now - *last < chrono::Duration::seconds(PERMANENT_FAILURE_LOG_INTERVAL_SECS) => false,
            _ => {
                log_times.insert(signature.to_string(), now);
                true
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PoolRuntimeState {
    last_scale_time: Mutex<Option<DateTime<Utc>>>,
    util_history: Mutex<VecDeque<f64>>,
    lifecycle: Mutex<HashMap<NodeId, NodeLifecycleState>>,
    pending_replacements: Mutex<u32>,
    permanent_failures: PermanentFailureLimiter,
}

impl PoolRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Cooldown ───────────────────────────────────────────────────────

    pub fn last_scale_time(&self) -> Option<DateTime<Utc>> {
        *self.last_scale_time.lock()
    }

    pub fn record_scale_action(&self, now: DateTime<Utc>) {
        *self.last_scale_time.lock() = Some(now);
    }

    /// §4.4 step 5: honor cooldown unless `current < min` (the floor rule,
    /// enforced upstream by the autoscaler before this is even consulted).
    pub fn cooldown_active(&self, now: DateTime<Utc>, cooldown: chrono::Duration) -> bool {
        match self.last_scale_time() {
            Some(last) => now - last < cooldown,
            None => false,
        }
    }

    // ─── Utilization history ───────────────────────────────────────────

    pub fn record_util_sample(&self, avg_gpu_util: f64) {
        let mut history = self.util_history.lock();
        if history.len() >= UTIL_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(avg_gpu_util);
    }

    /// Oldest-first, matching `PoolState::util_history`'s documented shape;
    /// the predictive autoscaler itself takes the most recent `lookback`
    /// entries from the back.
    pub fn util_history(&self) -> Vec<f64> {
        self.util_history.lock().iter().copied().collect()
    }

    // ─── Health / drain lifecycle ───────────────────────────────────────

    /// Advance one node's lifecycle state machine with a fresh health
    /// observation and return what the health loop should do about it. See
    /// `lifecycle::NodeLifecycleState::observe`.
    pub fn observe_health(
        &self,
        node_id: &NodeId,
        aggregated: HealthStatus,
        now: DateTime<Utc>,
        policy: &HealthPolicy,
    ) -> LifecycleAction {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.entry(node_id.clone()).or_default().observe(aggregated, now, policy)
    }

    pub fn forget_node(&self, node_id: &NodeId) {
        self.lifecycle.lock().remove(node_id);
    }

    // ─── Pending health-driven replacements ─────────────────────────────

    /// The health loop signals "provision one replacement on the next tick"
    /// this way (§4.4 health loop); the evaluation loop drains the counter
    /// into its own scale-up arithmetic for that tick.
    pub fn request_replacement(&self) {
        *self.pending_replacements.lock() += 1;
    }

    pub fn take_pending_replacements(&self) -> u32 {
        std::mem::take(&mut *self.pending_replacements.lock())
    }

    // ─── Permanent-provider-failure log rate limiting ───────────────────

    /// Whether a PermanentProvider failure with this signature should be
    /// logged now, given the one-line-per-minute-per-signature budget (§7).
    pub fn should_log_permanent_failure(&self, signature: &str, now: DateTime<Utc>) -> bool {
        self.permanent_failures.should_log(signature, now)
    }
}
