//! The autoscaler family: pure `recommend(state) -> target` functions.
//!
//! Every variant is a value, not a trait object — the composite variant
//! holds its children by value (`Vec<Autoscaler>`), so there is no cyclic
//! graph and no dynamic dispatch needed. None of this module performs I/O;
//! callers (the pool manager's evaluation loop) own the clock and the store.

#![forbid(unsafe_code)]

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Read-only snapshot of one pool's state, as seen by an evaluation tick.
#[derive(Debug, Clone)]
pub struct PoolState {
    pub current: u32,
    pub min: u32,
    pub max: u32,
    pub avg_gpu_util: f64,
    pub util_history: Vec<f64>,
    pub queued_jobs: u32,
    pub running_jobs: u32,
    pub now: DateTime<Utc>,
}

impl PoolState {
    fn with_override(&self, min: u32, max: u32) -> Self {
        Self { min, max, ..self.clone() }
    }

    fn with_avg_gpu_util(&self, avg_gpu_util: f64) -> Self {
        Self { avg_gpu_util, ..self.clone() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactiveConfig {
    pub scale_up_threshold_pct: f64,
    pub scale_down_threshold_pct: f64,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self { scale_up_threshold_pct: 80.0, scale_down_threshold_pct: 20.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub jobs_per_node: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { jobs_per_node: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledWindow {
    pub days_of_week: Vec<chrono::Weekday>,
    pub start_hour: u32,
    pub end_hour: u32,
    pub min: u32,
    pub max: u32,
}

impl ScheduledWindow {
    fn matches(&self, now: DateTime<Utc>) -> bool {
        let weekday = now.weekday();
        let hour = now.hour();
        self.days_of_week.contains(&weekday) && hour >= self.start_hour && hour < self.end_hour
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledConfig {
    pub windows: Vec<ScheduledWindow>,
    pub fallback: Box<Autoscaler>,
}

#[derive(Debug, Clone)]
pub struct PredictiveConfig {
    pub lookback: usize,
    pub growth: f64,
    pub fallback: Box<Autoscaler>,
}

impl Default for PredictiveConfig {
    fn default() -> Self {
        Self {
            lookback: 10,
            growth: 1.2,
            fallback: Box::new(Autoscaler::Reactive(ReactiveConfig::default())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMode {
    Max,
    Min,
    Avg,
}

#[derive(Debug, Clone)]
pub struct CompositeConfig {
    pub children: Vec<Autoscaler>,
    pub mode: CompositeMode,
}

/// A pure decision function over `PoolState`. Construct one per pool from
/// its configuration and call `recommend` once per evaluation tick.
#[derive(Debug, Clone)]
pub enum Autoscaler {
    Reactive(ReactiveConfig),
    Queue(QueueConfig),
    Scheduled(ScheduledConfig),
    Predictive(PredictiveConfig),
    Composite(CompositeConfig),
}

impl Autoscaler {
    /// Recommend a target replica count for `state`. The floor rule is
    /// enforced here, centrally, against whichever bounds actually apply
    /// (the pool's own, or a scheduled window's override), so every variant
    /// gets it for free and cooldown can never be bypassed except through
    /// this one path (§4.3 "Floor rule").
    pub fn recommend(&self, state: &PoolState) -> u32 {
        let (raw, min, max) = self.recommend_bounded(state);
        if state.current < min {
            return min;
        }
        raw.clamp(min, max)
    }

    /// Like `recommend`, but returns the raw (pre-floor-rule, pre-clamp)
    /// target alongside the bounds it should be judged against. Only
    /// `Scheduled` ever returns bounds other than `(state.min, state.max)` —
    /// when a window matches, its `(min, max)` override propagates up here
    /// instead of being silently re-clamped away by the caller.
    fn recommend_bounded(&self, state: &PoolState) -> (u32, u32, u32) {
        match self {
            Autoscaler::Reactive(cfg) => (recommend_reactive(cfg, state), state.min, state.max),
            Autoscaler::Queue(cfg) => (recommend_queue(cfg, state), state.min, state.max),
            Autoscaler::Scheduled(cfg) => recommend_scheduled(cfg, state),
            Autoscaler::Predictive(cfg) => (recommend_predictive(cfg, state), state.min, state.max),
            Autoscaler::Composite(cfg) => (recommend_composite(cfg, state), state.min, state.max),
        }
    }
}

fn recommend_reactive(cfg: &ReactiveConfig, state: &PoolState) -> u32 {
    if state.avg_gpu_util > cfg.scale_up_threshold_pct {
        (state.current + 1).min(state.max)
    } else if state.avg_gpu_util < cfg.scale_down_threshold_pct && state.current > state.min {
        state.current - 1
    } else {
        state.current
    }
}

fn recommend_queue(cfg: &QueueConfig, state: &PoolState) -> u32 {
    let jobs_per_node = cfg.jobs_per_node.max(1) as f64;
    let total_jobs = (state.queued_jobs + state.running_jobs) as f64;
    (total_jobs / jobs_per_node).ceil() as u32
}

fn recommend_scheduled(cfg: &ScheduledConfig, state: &PoolState) -> (u32, u32, u32) {
    match cfg.windows.iter().find(|w| w.matches(state.now)) {
        Some(window) => {
            let overridden = state.with_override(window.min, window.max);
            cfg.fallback.recommend_bounded(&overridden)
        }
        None => cfg.fallback.recommend_bounded(state),
    }
}

/// Weighted moving average over the last `lookback` samples (most recent
/// weighted highest, weights decaying linearly to 1), multiplied by
/// `growth`, then handed to the fallback autoscaler as the projected
/// `avg_gpu_util`. See DESIGN.md for why this particular projection
/// formula was chosen over alternatives.
fn recommend_predictive(cfg: &PredictiveConfig, state: &PoolState) -> u32 {
    let window: Vec<f64> = state
        .util_history
        .iter()
        .rev()
        .take(cfg.lookback.max(1))
        .copied()
        .collect();

    if window.is_empty() {
        return cfg.fallback.recommend(state);
    }

    let n = window.len();
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    // window[0] is the most recent sample; weight n, n-1, ..., 1.
    for (i, util) in window.iter().enumerate() {
        let weight = (n - i) as f64;
        weighted_sum += util * weight;
        weight_total += weight;
    }
    let moving_average = weighted_sum / weight_total;
    let projected = (moving_average * cfg.growth).clamp(0.0, 100.0);

    let projected_state = state.with_avg_gpu_util(projected);
    cfg.fallback.recommend(&projected_state)
}

fn recommend_composite(cfg: &CompositeConfig, state: &PoolState) -> u32 {
    let targets: Vec<u32> = cfg.children.iter().map(|child| child.recommend(state)).collect();
    if targets.is_empty() {
        return state.current;
    }
    match cfg.mode {
        CompositeMode::Max => *targets.iter().max().expect("non-empty"),
        CompositeMode::Min => *targets.iter().min().expect("non-empty"),
        CompositeMode::Avg => {
            let sum: u32 = targets.iter().sum();
            (sum as f64 / targets.len() as f64).round() as u32
        }
    }
}
