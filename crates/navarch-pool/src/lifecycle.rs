//! Per-node health/drain lifecycle as a pure state machine, mirroring
//! `claw-health::FailoverStateMachine`'s shape: an owned enum advanced by a
//! single `observe` transition method the caller drives once per health-loop
//! tick, returning what to do next instead of the caller re-deriving it from
//! loose counters.

use chrono::{DateTime, Utc};
use navarch_config::HealthPolicy;
use navarch_proto::HealthStatus;

/// A single node's position in the cordon -> drain -> terminate lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NodeLifecycleState {
    #[default]
    Normal,
    Unhealthy {
        since: DateTime<Utc>,
        consecutive_count: u32,
    },
    Cordoned,
    Draining {
        since: DateTime<Utc>,
    },
}

/// What the caller should do in response to an `observe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    NoAction,
    Cordon,
    CordonAndDrain,
    TerminateDrained,
}

impl NodeLifecycleState {
    /// Advance the state machine with one health observation (§4.4 health
    /// loop). `policy.unhealthy_after` consecutive `Unhealthy` observations
    /// cordon the node; `policy.auto_replace` additionally drains it right
    /// away rather than waiting for an operator command. Once `Draining`,
    /// the health signal itself is ignored — only `policy.drain_timeout`
    /// elapsing drives the next action. `Cordoned` is terminal from this
    /// state machine's point of view: nothing here ever uncordons a node.
    pub fn observe(&mut self, aggregated: HealthStatus, now: DateTime<Utc>, policy: &HealthPolicy) -> LifecycleAction {
        match self.clone() {
            NodeLifecycleState::Cordoned => LifecycleAction::NoAction,

            NodeLifecycleState::Draining { since } => {
                let drain_timeout = chrono::Duration::from_std(policy.drain_timeout).unwrap_or_default();
                if now - since > drain_timeout {
                    LifecycleAction::TerminateDrained
                } else {
                    LifecycleAction::NoAction
                }
            }

            NodeLifecycleState::Normal => {
                if aggregated == HealthStatus::Unhealthy {
                    self.enter_unhealthy(now, 1, now, policy)
                } else {
                    LifecycleAction::NoAction
                }
            }

            NodeLifecycleState::Unhealthy { since, consecutive_count } => {
                if aggregated == HealthStatus::Unhealthy {
                    self.enter_unhealthy(since, consecutive_count + 1, now, policy)
                } else {
                    *self = NodeLifecycleState::Normal;
                    LifecycleAction::NoAction
                }
            }
        }
    }

    fn enter_unhealthy(
        &mut self,
        since: DateTime<Utc>,
        consecutive_count: u32,
        now: DateTime<Utc>,
        policy: &HealthPolicy,
    ) -> LifecycleAction {
        if consecutive_count >= policy.unhealthy_after {
            *self =
                if policy.auto_replace { NodeLifecycleState::Draining { since: now } } else { NodeLifecycleState::Cordoned };
            if policy.auto_replace {
                LifecycleAction::CordonAndDrain
            } else {
                LifecycleAction::Cordon
            }
        } else {
            *self = NodeLifecycleState::Unhealthy { since, consecutive_count };
            LifecycleAction::NoAction
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(unhealthy_after: u32, auto_replace: bool, drain_timeout_secs: u64) -> HealthPolicy {
        HealthPolicy { unhealthy_after, auto_replace, drain_timeout: std::time::Duration::from_secs(drain_timeout_secs) }
    }

    #[test]
    fn stays_normal_on_healthy_observations() {
        let mut state = NodeLifecycleState::default();
        let action = state.observe(HealthStatus::Healthy, Utc::now(), &policy(2, false, 600));
        assert_eq!(action, LifecycleAction::NoAction);
        assert_eq!(state, NodeLifecycleState::Normal);
    }

    #[test]
    fn cordons_after_consecutive_unhealthy_threshold() {
        let mut state = NodeLifecycleState::default();
        let now = Utc::now();
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(2, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(2, false, 600)), LifecycleAction::Cordon);
        assert_eq!(state, NodeLifecycleState::Cordoned);
    }

    #[test]
    fn recovering_before_threshold_resets_streak() {
        let mut state = NodeLifecycleState::default();
        let now = Utc::now();
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(3, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state.observe(HealthStatus::Healthy, now, &policy(3, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state, NodeLifecycleState::Normal);
        // streak restarts from 1, not 2, after the reset.
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(3, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(3, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(3, false, 600)), LifecycleAction::Cordon);
    }

    #[test]
    fn auto_replace_drains_instead_of_just_cordoning() {
        let mut state = NodeLifecycleState::default();
        let now = Utc::now();
        let action = state.observe(HealthStatus::Unhealthy, now, &policy(1, true, 600));
        assert_eq!(action, LifecycleAction::CordonAndDrain);
        assert_eq!(state, NodeLifecycleState::Draining { since: now });
    }

    #[test]
    fn cordoned_never_acts_again() {
        let mut state = NodeLifecycleState::Cordoned;
        let now = Utc::now();
        assert_eq!(state.observe(HealthStatus::Unhealthy, now, &policy(1, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state.observe(HealthStatus::Healthy, now, &policy(1, false, 600)), LifecycleAction::NoAction);
        assert_eq!(state, NodeLifecycleState::Cordoned);
    }

    #[test]
    fn draining_terminates_only_after_timeout_elapses() {
        let since = Utc::now();
        let mut state = NodeLifecycleState::Draining { since };
        let policy = policy(1, true, 60);
        assert_eq!(state.observe(HealthStatus::Unhealthy, since + chrono::Duration::seconds(30), &policy), LifecycleAction::NoAction);
        assert_eq!(
            state.observe(HealthStatus::Unhealthy, since + chrono::Duration::seconds(61), &policy),
            LifecycleAction::TerminateDrained
        );
    }
}
