//! microcloud-engine — Simulation Engine binary.
//!
//! Drives the tick loop and the `ops.commands` consumer, and serves the
//! `/sim.v1.SimulationControl/*` control surface plus `/health`.

use clap::Parser;
use microcloud_bus::InProcessBus;
use microcloud_engine::core::EngineState;
use microcloud_engine::{EngineConfig, EngineService};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "microcloud-engine")]
#[command(about = "Simulation Engine for the microcloud control loop")]
struct Cli {
    /// Number of virtual nodes to seed.
    #[arg(long, default_value_t = 5)]
    nodes: usize,

    /// Number of services seeded per node.
    #[arg(long, default_value_t = 3)]
    services_per_node: usize,
}

fn init_tracing(config: &EngineConfig) {
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
    let cli = Cli::parse();
    let config = EngineConfig::from_env();
    init_tracing(&config);

    info!(
        service = %config.service_name,
        addr = %config.addr,
        tick_interval_ms = config.tick_interval_ms,
        "starting simulation engine"
    );

    let (nodes, services) = microcloud_engine::seed::seed_fleet(cli.nodes, cli.services_per_node);
    let bus = Arc::new(InProcessBus::default());
    let engine = EngineService::new(EngineState::new(nodes, services), bus, config.tick_interval_ms);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let tick_task = tokio::spawn(engine.clone().run_tick_loop(shutdown_rx.clone()));
    let command_task = tokio::spawn(engine.clone().run_command_consumer(shutdown_rx));

    let router = microcloud_engine::rpc::router(engine);
    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!(addr = %config.addr, "control surface listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    });

    server.await?;
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(tick_task, command_task);
    info!("simulation engine exited");
    Ok(())
}
