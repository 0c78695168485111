//! `balancer`: runs the routing core against a TOML configuration.
//!
//! # Architecture Overview
//!
//! ```text
//!   balancer.toml ──▶ config::load_config ──▶ PoolSet::apply
//!        │                                        │
//!        │ (notify)                               ▼
//!   ConfigWatcher ──reload──▶ PoolSet ──▶ ArcSwap<BackendPool> per pool
//!                                                 │
//!                                  HealthMonitor ◀┘ (TcpProber)
//!
//!   ctrl-c ──▶ Shutdown::trigger ──▶ monitors exit ──▶ pools drain
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use backend_balancer::config::{load_config, watcher::ConfigWatcher, BalancerConfig, HealthConfig};
use backend_balancer::health::{HealthMonitor, Prober, TcpProber};
use backend_balancer::lifecycle::{drain, Shutdown};
use backend_balancer::load_balancer::{ActionRegistry, PoolSet};
use backend_balancer::observability::{init_metrics, init_tracing};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "balancer")]
#[command(about = "Request-routing core for a load balancer", long_about = None)]
struct Cli {
    /// Path to the TOML configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Validate the configuration, print the pools as JSON and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let registry = ActionRegistry::with_defaults();
    let config = load_config(&cli.config, &registry)?;

    if cli.check {
        let pools = PoolSet::new(registry);
        pools.apply(&config)?;
        println!("{}", serde_json::to_string_pretty(&pools.snapshots())?);
        pools.teardown_all();
        return Ok(());
    }

    init_tracing(&config.observability.log_level);
    tracing::info!("backend-balancer v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to install metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let pools = PoolSet::new(registry.clone());
    let shutdown = Shutdown::new();
    let summary = pools.apply(&config)?;
    let (health, _) = watch::channel(config.health.clone());
    spawn_monitors(&pools, &summary.added, &health, &shutdown);

    let (watcher, mut updates) = ConfigWatcher::new(&cli.config, registry);
    // Dropping the handle stops the watch
    let _watch = match watcher.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    };

    loop {
        tokio::select! {
            Some(next) = updates.recv() => reload(&pools, &next, &health, &shutdown),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    shutdown.trigger();
    for pool in pools.teardown_all() {
        drain(&pool, DRAIN_TIMEOUT).await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn reload(
    pools: &PoolSet,
    config: &BalancerConfig,
    health: &watch::Sender<HealthConfig>,
    shutdown: &Shutdown,
) {
    match pools.apply(config) {
        Ok(summary) => {
            // Running monitors pick this up; new ones start from it
            health.send_replace(config.health.clone());
            spawn_monitors(pools, &summary.added, health, shutdown);
        }
        Err(e) => tracing::error!(error = %e, "Reload rejected, keeping current pools"),
    }
}

/// Replaced pools keep their slot, so only added pools need a monitor.
fn spawn_monitors(
    pools: &PoolSet,
    added: &[String],
    health: &watch::Sender<HealthConfig>,
    shutdown: &Shutdown,
) {
    let current = health.borrow().clone();
    // The monitor bounds each check with the live timeout
    let prober: Arc<dyn Prober> = Arc::new(TcpProber::new(Duration::from_secs(
        current.probe_timeout_secs.max(1),
    )));
    for name in added {
        if let Some(slot) = pools.slot(name) {
            let monitor = HealthMonitor::new(slot, prober.clone(), current.clone())
                .follow(health.subscribe());
            tokio::spawn(monitor.run(shutdown.subscribe()));
        }
    }
}
