//! microcloud-agent — Agent Service binary.
//!
//! Consumes `ops.incidents`, decides at most one action per incident via the
//! cooldown-guarded decision table, and publishes `ops.actions`.
//!
//! NOTE: wires a fresh [`InProcessBus`] for standalone runs — see the note
//! in `microcloud-signal`'s `main.rs` on sharing a bus instance.

use microcloud_agent::{AgentConfig, AgentService};
use microcloud_bus::InProcessBus;
use microcloud_repo::{InMemoryActionsRepository, InMemoryIncidentsRepository};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing(config: &AgentConfig) {
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
    let config = AgentConfig::from_env();
    init_tracing(&config);
    info!(service = %config.service_name, cooldown_secs = config.cooldown_duration_secs, "starting agent service");

    let bus = Arc::new(InProcessBus::default());
    let incidents_repo = Arc::new(InMemoryIncidentsRepository::new());
    let actions_repo = Arc::new(InMemoryActionsRepository::new());
    let agent = AgentService::new(bus, incidents_repo, actions_repo, config.cooldown_duration_secs);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(agent.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = handle.await;
    info!("agent service exited");
    Ok(())
}
