//! `/sim.v1.SimulationControl/*` JSON RPC surface, plus `/health`.
//!
//! JSON POST, one route per method, unary request/response — the same
//! framing the orchestrator's `ops.v1.ActionService` surface uses.

use crate::service::{EngineService, EngineStateView};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use microcloud_proto::RunState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

fn invalid_argument(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

// ─── GetState ─────────────────────────────────────────────────────────────────

async fn get_state(State(engine): State<Arc<EngineService>>) -> Json<EngineStateView> {
    Json(engine.get_state().await)
}

// ─── SetState ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SetStateRequest {
    run_state: RunState,
}

async fn set_state(
    State(engine): State<Arc<EngineService>>,
    Json(req): Json<SetStateRequest>,
) -> Json<EngineStateView> {
    engine.set_state(req.run_state).await;
    Json(engine.get_state().await)
}

// ─── SetSpeed ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SetSpeedRequest {
    multiplier: f64,
}

#[derive(Debug, Serialize)]
struct SetSpeedResponse {
    speed_multiplier: f64,
}

async fn set_speed(
    State(engine): State<Arc<EngineService>>,
    Json(req): Json<SetSpeedRequest>,
) -> Json<SetSpeedResponse> {
    let speed_multiplier = engine.set_speed(req.multiplier).await;
    Json(SetSpeedResponse { speed_multiplier })
}

// ─── LoadScenario ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct LoadScenarioRequest {
    name: String,
}

#[derive(Debug, Serialize)]
struct LoadScenarioResponse {
    success: bool,
    message: String,
}

async fn load_scenario(
    State(engine): State<Arc<EngineService>>,
    Json(req): Json<LoadScenarioRequest>,
) -> Response {
    match engine.load_scenario(&req.name).await {
        Ok(scenario) => Json(LoadScenarioResponse {
            success: true,
            message: format!("scenario {scenario:?} loaded"),
        })
        .into_response(),
        Err(e) => invalid_argument(e.to_string()),
    }
}

// ─── Health ───────────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

pub fn router(engine: Arc<EngineService>) -> Router {
    Router::new()
        .route("/sim.v1.SimulationControl/GetState", post(get_state))
        .route("/sim.v1.SimulationControl/SetState", post(set_state))
        .route("/sim.v1.SimulationControl/SetSpeed", post(set_speed))
        .route("/sim.v1.SimulationControl/LoadScenario", post(load_scenario))
        .route("/health", get(health))
        .with_state(engine)
}
