//! navarchd — the Navarch control-plane host binary.
//!
//! Wires the core crates (`navarch-store`, `navarch-pool`, `navarch-rpc`)
//! together behind the `--pools-config`/`--addr`/... flag surface described
//! in SPEC_FULL.md §6. YAML schema validation and full operator CLI UX are
//! explicitly out of scope (Non-goals); this binary's job is constructing the
//! resolved config structs `navarch-config` already knows how to validate and
//! handing them to the pool manager and RPC router.

use clap::Parser;
use navarch_config::{ControlPlaneConfig, Pool, PoolSpec, ProviderConfig};
use navarch_error::NavarchError;
use navarch_observe::OperationsMetrics;
use navarch_pool::{NullMetricsSource, PoolManager};
use navarch_provider::{FakeProvider, Provider};
use navarch_rpc::AppState;
use navarch_store::Store;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "navarchd")]
#[command(about = "Navarch GPU fleet control plane")]
#[command(version)]
struct Cli {
    /// Address to bind the RPC surface to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Default health-check interval, applied to pools that don't set their own.
    #[arg(long, default_value_t = navarch_config::system_defaults::HEALTH_CHECK_INTERVAL.as_secs())]
    health_check_interval: u64,

    /// Heartbeat interval handed to nodes at RegisterNode time.
    #[arg(long, default_value_t = navarch_config::system_defaults::HEARTBEAT_INTERVAL.as_secs())]
    heartbeat_interval: u64,

    /// Bound on how long shutdown waits for in-flight loop ticks.
    #[arg(long, default_value_t = navarch_config::system_defaults::SHUTDOWN_TIMEOUT.as_secs())]
    shutdown_timeout: u64,

    /// Default autoscale evaluation interval, applied to pools that don't set their own.
    #[arg(long, default_value_t = navarch_config::system_defaults::AUTOSCALE_INTERVAL.as_secs())]
    autoscale_interval: u64,

    /// Path to a JSON file deserializing directly into `Vec<PoolSpec>`.
    #[arg(long)]
    pools_config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    navarch_observe::init_tracing("navarchd=info")?;

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(%err, "navarchd exiting on fatal error");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let control_plane = ControlPlaneConfig {
        addr: cli.addr.clone(),
        health_check_interval: Duration::from_secs(cli.health_check_interval),
        heartbeat_interval: Duration::from_secs(cli.heartbeat_interval),
        autoscale_interval: Duration::from_secs(cli.autoscale_interval),
        shutdown_timeout: Duration::from_secs(cli.shutdown_timeout),
        ..ControlPlaneConfig::default()
    };

    let raw = std::fs::read_to_string(&cli.pools_config)
        .map_err(|err| anyhow::anyhow!("reading --pools-config {}: {err}", cli.pools_config.display()))?;
    let pool_specs: Vec<PoolSpec> = serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("parsing --pools-config {}: {err}", cli.pools_config.display()))?;

    // No separate provider-credentials file (§6: credential shape is opaque
    // and out of scope) — synthesize one ProviderConfig per distinct name the
    // pool specs reference, each backed by a FakeProvider instance below.
    let provider_names: HashSet<String> =
        pool_specs.iter().flat_map(|s| s.providers.iter().cloned()).collect();
    let provider_specs: Vec<ProviderConfig> = provider_names
        .iter()
        .map(|name| ProviderConfig { name: name.clone(), credentials: serde_json::Value::Null })
        .collect();

    let pools: Vec<Pool> = navarch_config::resolve_pools(&pool_specs, &provider_specs, &control_plane)
        .map_err(|err| match err {
            NavarchError::Fatal { message } => anyhow::anyhow!("fatal configuration error: {message}"),
            other => anyhow::anyhow!("{other}"),
        })?;

    let store = Store::new();

    let providers: HashMap<String, Arc<dyn Provider>> = provider_names
        .into_iter()
        .map(|name| {
            let provider: Arc<dyn Provider> = Arc::new(FakeProvider::new(store.clone()));
            (name, provider)
        })
        .collect();

    let metrics = Arc::new(OperationsMetrics::new());

    let pool_manager = Arc::new(PoolManager::new(
        pools.clone(),
        store.clone(),
        providers,
        Arc::new(NullMetricsSource),
        metrics.clone(),
        control_plane.shutdown_timeout,
    ));
    pool_manager.start();

    let app_state = Arc::new(AppState { store, pools, control_plane: control_plane.clone(), metrics });
    let router = navarch_rpc::router(app_state);

    let listener = tokio::net::TcpListener::bind(&control_plane.addr)
        .await
        .map_err(|err| anyhow::anyhow!("binding {}: {err}", control_plane.addr))?;
    info!(addr = %control_plane.addr, pools = pool_manager.pools().len(), "navarchd listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| anyhow::anyhow!("serve error: {err}"))?;

    info!("shutdown signal received, stopping pool manager");
    pool_manager.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to install Ctrl+C handler");
    }
}
