//! microcloud-signal — Signal Service binary.
//!
//! Consumes `sim.metrics`, maintains sliding windows per `(entity, rule)`,
//! and raises incidents on `ops.incidents`.
//!
//! NOTE: this binary wires a fresh [`InProcessBus`] for standalone runs; in
//! the full control loop, the engine/signal/agent/orchestrator binaries are
//! intended to share one bus instance (see `microcloud-tests` for the
//! wired-together integration scenarios). A real deployment would instead
//! each connect to the same external NATS cluster, with `Bus` as the only
//! coupling surface between components.

use microcloud_bus::InProcessBus;
use microcloud_repo::{InMemoryIncidentsRepository, InMemoryMetricsRepository};
use microcloud_signal::{SignalConfig, SignalService};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing(config: &SignalConfig) {
    let env_filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format == "json" {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SignalConfig::from_env();
    init_tracing(&config);
    info!(service = %config.service_name, "starting signal service");

    let bus = Arc::new(InProcessBus::default());
    let metrics_repo = Arc::new(InMemoryMetricsRepository::new());
    let incidents_repo = Arc::new(InMemoryIncidentsRepository::new());
    let signal = SignalService::new(bus, metrics_repo, incidents_repo);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(signal.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    info!("signal service exited");
    Ok(())
}
