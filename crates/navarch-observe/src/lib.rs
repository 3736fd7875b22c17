//! Structured observability for the Navarch control plane: atomic operation
//! counters, a Prometheus text exporter, and the process's tracing-subscriber
//! init — generalized from `claw-observe`'s `OperationsMetrics` /
//! `MetricsExporter` pair onto Navarch's own operations (provisions,
//! terminations, scale actions, cordons, drains, permanent provider
//! failures) in place of ClawOps's fleet-ops vocabulary.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// A thread-safe u64 counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Atomic operation counters for the pool manager and RPC surface.
/// Thread-safe and cheap to share via `Arc`.
#[derive(Debug, Default)]
pub struct OperationsMetrics {
    pub provisions_total: Counter,
    pub provision_errors: Counter,
    pub terminations_total: Counter,
    pub scale_up_actions: Counter,
    pub scale_down_actions: Counter,
    pub cordons_total: Counter,
    pub drains_total: Counter,
    pub health_checks_total: Counter,
    pub stale_instances_total: Counter,
    pub permanent_provider_failures: Counter,
    pub rpc_requests_total: Counter,
    pub rpc_errors_total: Counter,
}

impl OperationsMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_provision_attempt(&self) {
        self.provisions_total.inc();
    }

    pub fn record_provision_error(&self) {
        self.provision_errors.inc();
        warn!(counter = "provision_errors", value = self.provision_errors.get(), "provision failed");
    }

    pub fn record_termination(&self) {
        self.terminations_total.inc();
    }

    pub fn record_scale_up(&self) {
        self.scale_up_actions.inc();
    }

    pub fn record_scale_down(&self) {
        self.scale_down_actions.inc();
    }

    pub fn record_cordon(&self) {
        self.cordons_total.inc();
        info!(counter = "cordons_total", value = self.cordons_total.get(), "node cordoned");
    }

    pub fn record_drain(&self) {
        self.drains_total.inc();
    }

    pub fn record_health_check(&self) {
        self.health_checks_total.inc();
    }

    pub fn record_stale_instance(&self) {
        self.stale_instances_total.inc();
    }

    pub fn record_permanent_provider_failure(&self) {
        self.permanent_provider_failures.inc();
        warn!(
            counter = "permanent_provider_failures",
            value = self.permanent_provider_failures.get(),
            "permanent provider failure"
        );
    }

    pub fn record_rpc_request(&self) {
        self.rpc_requests_total.inc();
    }

    pub fn record_rpc_error(&self) {
        self.rpc_errors_total.inc();
    }
}

/// Exports [`OperationsMetrics`] in Prometheus text format.
pub struct MetricsExporter {
    metrics: Arc<OperationsMetrics>,
    prefix: String,
}

impl MetricsExporter {
    pub fn new(metrics: Arc<OperationsMetrics>) -> Self {
        Self { metrics, prefix: "navarch".to_string() }
    }

    pub fn with_prefix(metrics: Arc<OperationsMetrics>, prefix: impl Into<String>) -> Self {
        Self { metrics, prefix: prefix.into() }
    }

    pub fn render(&self) -> String {
        let m = &self.metrics;
        let p = &self.prefix;
        let mut out = String::new();

        self.write_counter(&mut out, p, "provisions_total", "Total provision attempts", m.provisions_total.get());
        self.write_counter(&mut out, p, "provision_errors", "Total failed provision attempts", m.provision_errors.get());
        self.write_counter(&mut out, p, "terminations_total", "Total node terminations", m.terminations_total.get());
        self.write_counter(&mut out, p, "scale_up_actions", "Total scale-up actions taken", m.scale_up_actions.get());
        self.write_counter(&mut out, p, "scale_down_actions", "Total scale-down actions taken", m.scale_down_actions.get());
        self.write_counter(&mut out, p, "cordons_total", "Total nodes cordoned", m.cordons_total.get());
        self.write_counter(&mut out, p, "drains_total", "Total nodes placed into drain", m.drains_total.get());
        self.write_counter(&mut out, p, "health_checks_total", "Total health evaluation ticks", m.health_checks_total.get());
        self.write_counter(&mut out, p, "stale_instances_total", "Total instances marked STALE", m.stale_instances_total.get());
        self.write_counter(
            &mut out,
            p,
            "permanent_provider_failures",
            "Total permanent provider failures observed",
            m.permanent_provider_failures.get(),
        );
        self.write_counter(&mut out, p, "rpc_requests_total", "Total RPC requests handled", m.rpc_requests_total.get());
        self.write_counter(&mut out, p, "rpc_errors_total", "Total RPC requests that errored", m.rpc_errors_total.get());

        out
    }

    fn write_counter(&self, out: &mut String, prefix: &str, name: &str, help: &str, value: u64) {
        out.push_str(&format!("# HELP {prefix}_{name} {help}\n"));
        out.push_str(&format!("# TYPE {prefix}_{name} counter\n"));
        out.push_str(&format!("{prefix}_{name} {value}\n\n"));
    }
}

/// Install the process-wide tracing subscriber: an `EnvFilter` seeded from
/// `RUST_LOG` (defaulting to `navarch=info`) plus the standard fmt layer.
pub fn init_tracing(default_directive: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))
}
