//! microcloud-orchestrator — human approval surface and Stream Hub binary.
//!
//! Serves `/ops.v1.ActionService/*`, `/api/stream` (SSE), and `/health`.

use axum::{Router, response::IntoResponse, routing::get};
use microcloud_bus::InProcessBus;
use microcloud_orchestrator::action_server::{self, ActionServerState};
use microcloud_orchestrator::{OrchestratorConfig, StreamHub, hub};
use microcloud_repo::InMemoryActionsRepository;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing(config: &OrchestratorConfig) {
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

async fn health() -> impl IntoResponse {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env();
    init_tracing(&config);

    info!(service = %config.service_name, addr = %config.addr, "starting orchestrator");

    let bus = Arc::new(InProcessBus::default());
    let actions_repo = Arc::new(InMemoryActionsRepository::new());
    let action_state = ActionServerState {
        actions_repo,
        bus: bus.clone(),
    };

    let stream_hub = StreamHub::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub_task = tokio::spawn(stream_hub.clone().run(bus.clone(), shutdown_rx));

    let app = Router::new()
        .route("/health", get(health))
        .merge(action_server::router(action_state))
        .merge(hub::router(stream_hub))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    info!(addr = %config.addr, "orchestrator listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = hub_task.await;
    info!("orchestrator exited");
    Ok(())
}
