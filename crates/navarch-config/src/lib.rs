//! Resolved configuration structs the core receives.
//!
//! Parsing a YAML document set and schema validation happen outside this
//! crate (an external collaborator) — what lives here is the *result* of
//! that process: fully-validated `ControlPlaneConfig` /
//! `ProviderConfig` / `Pool` values, plus the default-merge order
//! (explicit > per-resource default > system default) and a minimal JSON
//! deserialization surface the demo binary uses in place of a real config
//! loader.

#![forbid(unsafe_code)]

use navarch_autoscale::{
    Autoscaler, CompositeConfig, CompositeMode, PredictiveConfig, QueueConfig, ReactiveConfig,
    ScheduledConfig, ScheduledWindow,
};
use navarch_error::{NavarchError, NavarchResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// System defaults applied when neither the pool nor the control-plane
/// section supplies an explicit value (§6).
pub mod system_defaults {
    use std::time::Duration;

    pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
    pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
    pub const AUTOSCALE_INTERVAL: Duration = Duration::from_secs(30);
    pub const COOLDOWN: Duration = Duration::from_secs(5 * 60);
    pub const UNHEALTHY_AFTER: u32 = 2;
    pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);
    pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
    pub const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(60);
    /// Not named in the system-default list above; drained nodes with
    /// `auto_replace=true` are terminated after this long without an
    /// explicit drain-completion signal from the node.
    pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10 * 60);
    /// Low-frequency stale-instance sweep cadence (§4.4).
    pub const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
}

// ─── Resolved control-plane config ────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub addr: String,
    pub health_check_interval: Duration,
    pub heartbeat_interval: Duration,
    pub autoscale_interval: Duration,
    pub shutdown_timeout: Duration,
    pub cooldown_default: Duration,
    pub unhealthy_after_default: u32,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            health_check_interval: system_defaults::HEALTH_CHECK_INTERVAL,
            heartbeat_interval: system_defaults::HEARTBEAT_INTERVAL,
            autoscale_interval: system_defaults::AUTOSCALE_INTERVAL,
            shutdown_timeout: system_defaults::SHUTDOWN_TIMEOUT,
            cooldown_default: system_defaults::COOLDOWN,
            unhealthy_after_default: system_defaults::UNHEALTHY_AFTER,
        }
    }
}

/// Opaque per-provider credential shape: the core never interprets this,
/// it only needs the provider's name to validate pool references against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub credentials: serde_json::Value,
}

// ─── Provider selection ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSelectionStrategy {
    Priority,
    RoundRobin,
    Weighted,
    Cost,
    Availability,
}

#[derive(Debug, Clone)]
pub struct ProviderSelection {
    pub strategy: ProviderSelectionStrategy,
    pub provider_names: Vec<String>,
    /// Parallel to `provider_names`; only consulted by the `weighted`
    /// strategy. Defaults to equal weight (1) per provider when the pool
    /// spec leaves `provider_weights` unset.
    pub weights: Vec<u32>,
}

// ─── Autoscaler spec (JSON surface) ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutoscalerSpec {
    Reactive {
        scale_up_threshold_pct: Option<f64>,
        scale_down_threshold_pct: Option<f64>,
    },
    Queue {
        jobs_per_node: Option<u32>,
    },
    Scheduled {
        windows: Vec<ScheduledWindowSpec>,
        fallback: Box<AutoscalerSpec>,
    },
    Predictive {
        lookback: Option<usize>,
        growth: Option<f64>,
        fallback: Box<AutoscalerSpec>,
    },
    Composite {
        children: Vec<AutoscalerSpec>,
        mode: CompositeMode,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledWindowSpec {
    pub days_of_week: Vec<String>,
    pub start_hour: u32,
    pub end_hour: u32,
    pub min: u32,
    pub max: u32,
}

/// Build the runtime `Autoscaler` from its JSON spec, applying the family's
/// own defaults (reactive 80/20, queue 10, predictive lookback 10/growth
/// 1.2) for any field left unset.
pub fn resolve_autoscaler(spec: &AutoscalerSpec) -> NavarchResult<Autoscaler> {
    match spec {
        AutoscalerSpec::Reactive { scale_up_threshold_pct, scale_down_threshold_pct } => {
            let defaults = ReactiveConfig::default();
            Ok(Autoscaler::Reactive(ReactiveConfig {
                scale_up_threshold_pct: scale_up_threshold_pct.unwrap_or(defaults.scale_up_threshold_pct),
                scale_down_threshold_pct: scale_down_threshold_pct
                    .unwrap_or(defaults.scale_down_threshold_pct),
            }))
        }
        AutoscalerSpec::Queue { jobs_per_node } => {
            let defaults = QueueConfig::default();
            Ok(Autoscaler::Queue(QueueConfig {
                jobs_per_node: jobs_per_node.unwrap_or(defaults.jobs_per_node),
            }))
        }
        AutoscalerSpec::Scheduled { windows, fallback } => {
            let resolved_windows = windows
                .iter()
                .map(resolve_window)
                .collect::<NavarchResult<Vec<_>>>()?;
            Ok(Autoscaler::Scheduled(ScheduledConfig {
                windows: resolved_windows,
                fallback: Box::new(resolve_autoscaler(fallback)?),
            }))
        }
        AutoscalerSpec::Predictive { lookback, growth, fallback } => {
            let defaults = PredictiveConfig::default();
            Ok(Autoscaler::Predictive(PredictiveConfig {
                lookback: lookback.unwrap_or(defaults.lookback),
                growth: growth.unwrap_or(defaults.growth),
                fallback: Box::new(resolve_autoscaler(fallback)?),
            }))
        }
        AutoscalerSpec::Composite { children, mode } => {
            let resolved_children = children
                .iter()
                .map(resolve_autoscaler)
                .collect::<NavarchResult<Vec<_>>>()?;
            Ok(Autoscaler::Composite(CompositeConfig { children: resolved_children, mode: *mode }))
        }
    }
}

fn resolve_window(spec: &ScheduledWindowSpec) -> NavarchResult<ScheduledWindow> {
    let days_of_week = spec
        .days_of_week
        .iter()
        .map(|d| {
            d.parse::<chrono::Weekday>()
                .map_err(|_| NavarchError::invalid_argument(format!("unknown weekday: {d}")))
        })
        .collect::<NavarchResult<Vec<_>>>()?;
    Ok(ScheduledWindow { days_of_week, start_hour: spec.start_hour, end_hour: spec.end_hour, min: spec.min, max: spec.max })
}

// ─── Pool spec (JSON surface) and resolved Pool ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    pub name: String,
    pub providers: Vec<String>,
    #[serde(default = "default_strategy")]
    pub provider_strategy: ProviderSelectionStrategy,
    pub provider_weights: Option<Vec<u32>>,
    pub instance_type: String,
    pub regions: Vec<String>,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub cooldown_secs: Option<u64>,
    pub eval_interval_secs: Option<u64>,
    pub health_check_interval_secs: Option<u64>,
    pub unhealthy_after: Option<u32>,
    #[serde(default)]
    pub auto_replace: bool,
    pub drain_timeout_secs: Option<u64>,
    pub registration_timeout_secs: Option<u64>,
    pub autoscaler: AutoscalerSpec,
}

fn default_strategy() -> ProviderSelectionStrategy {
    ProviderSelectionStrategy::Priority
}

#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub unhealthy_after: u32,
    pub auto_replace: bool,
    pub drain_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Pool {
    pub name: String,
    pub providers: ProviderSelection,
    pub instance_type: String,
    pub regions: Vec<String>,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub cooldown: Duration,
    pub eval_interval: Duration,
    pub health_check_interval: Duration,
    pub registration_timeout: Duration,
    pub autoscaler: Autoscaler,
    pub health_policy: HealthPolicy,
}

/// Resolve one `PoolSpec` against the known provider names and control-plane
/// defaults. Returns `Fatal` for configuration invariants a running process
/// must refuse to start with: unknown provider references or `min > max`.
pub fn resolve_pool(
    spec: &PoolSpec,
    known_providers: &HashSet<String>,
    defaults: &ControlPlaneConfig,
) -> NavarchResult<Pool> {
    if !navarch_proto::validate_pool_name(&spec.name) {
        return Err(NavarchError::Fatal { message: format!("invalid pool name: {}", spec.name) });
    }
    if spec.min_nodes > spec.max_nodes {
        return Err(NavarchError::Fatal {
            message: format!("pool {}: min_nodes ({}) > max_nodes ({})", spec.name, spec.min_nodes, spec.max_nodes),
        });
    }
    for provider in &spec.providers {
        if !known_providers.contains(provider) {
            return Err(NavarchError::Fatal {
                message: format!("pool {}: unknown provider reference '{provider}'", spec.name),
            });
        }
    }

    let weights = spec
        .provider_weights
        .clone()
        .unwrap_or_else(|| vec![1; spec.providers.len()]);
    if weights.len() != spec.providers.len() {
        return Err(NavarchError::Fatal {
            message: format!(
                "pool {}: provider_weights length ({}) must match providers length ({})",
                spec.name,
                weights.len(),
                spec.providers.len()
            ),
        });
    }

    Ok(Pool {
        name: spec.name.clone(),
        providers: ProviderSelection {
            strategy: spec.provider_strategy,
            provider_names: spec.providers.clone(),
            weights,
        },
        instance_type: spec.instance_type.clone(),
        regions: spec.regions.clone(),
        min_nodes: spec.min_nodes,
        max_nodes: spec.max_nodes,
        cooldown: spec.cooldown_secs.map(Duration::from_secs).unwrap_or(defaults.cooldown_default),
        eval_interval: spec.eval_interval_secs.map(Duration::from_secs).unwrap_or(defaults.autoscale_interval),
        health_check_interval: spec
            .health_check_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.health_check_interval),
        registration_timeout: spec
            .registration_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(system_defaults::REGISTRATION_TIMEOUT),
        autoscaler: resolve_autoscaler(&spec.autoscaler)?,
        health_policy: HealthPolicy {
            unhealthy_after: spec.unhealthy_after.unwrap_or(defaults.unhealthy_after_default),
            auto_replace: spec.auto_replace,
            drain_timeout: spec.drain_timeout_secs.map(Duration::from_secs).unwrap_or(system_defaults::DRAIN_TIMEOUT),
        },
    })
}

/// Resolve a whole pool list, additionally rejecting duplicate pool names
/// (a startup-fatal configuration invariant, §7).
pub fn resolve_pools(
    specs: &[PoolSpec],
    provider_specs: &[ProviderConfig],
    defaults: &ControlPlaneConfig,
) -> NavarchResult<Vec<Pool>> {
    let known_providers: HashSet<String> = provider_specs.iter().map(|p| p.name.clone()).collect();

    let mut seen_names = HashSet::new();
    for spec in specs {
        if !seen_names.insert(spec.name.clone()) {
            return Err(NavarchError::Fatal { message: format!("duplicate pool name: {}", spec.name) });
        }
    }

    specs.iter().map(|spec| resolve_pool(spec, &known_providers, defaults)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(name: &str) -> ProviderConfig {
        ProviderConfig { name: name.to_string(), credentials: serde_json::Value::Null }
    }

    fn reactive_spec() -> AutoscalerSpec {
        AutoscalerSpec::Reactive { scale_up_threshold_pct: None, scale_down_threshold_pct: None }
    }

    fn pool_spec(name: &str, providers: Vec<&str>) -> PoolSpec {
        PoolSpec {
            name: name.to_string(),
            providers: providers.into_iter().map(String::from).collect(),
            provider_strategy: ProviderSelectionStrategy::Priority,
            provider_weights: None,
            instance_type: "a100.x1".to_string(),
            regions: vec!["us-east".to_string()],
            min_nodes: 2,
            max_nodes: 10,
            cooldown_secs: None,
            eval_interval_secs: None,
            health_check_interval_secs: None,
            unhealthy_after: None,
            auto_replace: true,
            drain_timeout_secs: None,
            registration_timeout_secs: None,
            autoscaler: reactive_spec(),
        }
    }

    #[test]
    fn resolve_pool_applies_system_defaults_when_unset() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("fake")];
        let resolved = resolve_pools(&[pool_spec("training", vec!["fake"])], &providers, &defaults)
            .expect("resolves");
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].cooldown, system_defaults::COOLDOWN);
        assert_eq!(resolved[0].health_policy.unhealthy_after, system_defaults::UNHEALTHY_AFTER);
    }

    #[test]
    fn resolve_pool_prefers_explicit_over_default() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("fake")];
        let mut spec = pool_spec("training", vec!["fake"]);
        spec.cooldown_secs = Some(42);
        spec.unhealthy_after = Some(7);
        let resolved = resolve_pool(&spec, &providers.iter().map(|p| p.name.clone()).collect(), &defaults)
            .expect("resolves");
        assert_eq!(resolved.cooldown, Duration::from_secs(42));
        assert_eq!(resolved.health_policy.unhealthy_after, 7);
    }

    #[test]
    fn resolve_pools_rejects_unknown_provider_reference() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("hetzner")];
        let err = resolve_pools(&[pool_spec("training", vec!["nonexistent"])], &providers, &defaults)
            .unwrap_err();
        assert!(matches!(err, NavarchError::Fatal { .. }));
    }

    #[test]
    fn resolve_pools_rejects_duplicate_names() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("fake")];
        let specs = vec![pool_spec("training", vec!["fake"]), pool_spec("training", vec!["fake"])];
        let err = resolve_pools(&specs, &providers, &defaults).unwrap_err();
        assert!(matches!(err, NavarchError::Fatal { .. }));
    }

    #[test]
    fn resolve_pool_rejects_min_greater_than_max() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("fake")];
        let mut spec = pool_spec("training", vec!["fake"]);
        spec.min_nodes = 20;
        spec.max_nodes = 5;
        let err = resolve_pool(&spec, &providers.iter().map(|p| p.name.clone()).collect(), &defaults)
            .unwrap_err();
        assert!(matches!(err, NavarchError::Fatal { .. }));
    }

    #[test]
    fn resolve_pool_defaults_provider_weights_to_equal() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("a"), provider("b")];
        let resolved = resolve_pool(
            &pool_spec("training", vec!["a", "b"]),
            &providers.iter().map(|p| p.name.clone()).collect(),
            &defaults,
        )
        .expect("resolves");
        assert_eq!(resolved.providers.weights, vec![1, 1]);
    }

    #[test]
    fn resolve_pool_rejects_mismatched_weight_length() {
        let defaults = ControlPlaneConfig::default();
        let providers = [provider("a"), provider("b")];
        let mut spec = pool_spec("training", vec!["a", "b"]);
        spec.provider_weights = Some(vec![1]);
        let err = resolve_pool(&spec, &providers.iter().map(|p| p.name.clone()).collect(), &defaults)
            .unwrap_err();
        assert!(matches!(err, NavarchError::Fatal { .. }));
    }

    #[test]
    fn resolve_autoscaler_builds_nested_scheduled_with_fallback() {
        let spec = AutoscalerSpec::Scheduled {
            windows: vec![ScheduledWindowSpec {
                days_of_week: vec!["Mon".to_string(), "Tue".to_string()],
                start_hour: 9,
                end_hour: 17,
                min: 5,
                max: 20,
            }],
            fallback: Box::new(reactive_spec()),
        };
        let autoscaler = resolve_autoscaler(&spec).expect("resolves");
        assert!(matches!(autoscaler, Autoscaler::Scheduled(_)));
    }

    #[test]
    fn resolve_autoscaler_rejects_unknown_weekday() {
        let spec = AutoscalerSpec::Scheduled {
            windows: vec![ScheduledWindowSpec {
                days_of_week: vec!["Funday".to_string()],
                start_hour: 0,
                end_hour: 24,
                min: 1,
                max: 1,
            }],
            fallback: Box::new(reactive_spec()),
        };
        assert!(resolve_autoscaler(&spec).is_err());
    }
}
