//! `/ops.v1.ActionService/*` JSON RPC surface: list/approve/reject pending
//! actions and read action history. On approval, publishes
//! `ApplyActionCommand` on `ops.commands`.

use crate::error::OrchestratorError;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use microcloud_bus::{Bus, Subject};
use microcloud_proto::{Action, ActionStatus, ApplyActionCommand};
use microcloud_repo::{ActionsRepository, TransitionOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub struct ActionServerState {
    pub actions_repo: Arc<dyn ActionsRepository>,
    pub bus: Arc<dyn Bus>,
}

impl Clone for ActionServerState {
    fn clone(&self) -> Self {
        Self {
            actions_repo: self.actions_repo.clone(),
            bus: self.bus.clone(),
        }
    }
}

const DEFAULT_PENDING_LIMIT: usize = 50;
const DEFAULT_HISTORY_LIMIT: usize = 100;

fn error_response(err: &OrchestratorError) -> Response {
    #[derive(Serialize)]
    struct Body {
        success: bool,
        message: String,
    }
    let status = match err {
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::NotPending { .. } => StatusCode::BAD_REQUEST,
        OrchestratorError::Bus(_) | OrchestratorError::Repo(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(Body {
            success: false,
            message: err.to_string(),
        }),
    )
        .into_response()
}

// ─── ListPendingActions ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct ListPendingRequest {
    limit: Option<i32>,
}

#[derive(Debug, Serialize)]
struct ListPendingResponse {
    actions: Vec<Action>,
}

async fn list_pending_actions(
    State(state): State<ActionServerState>,
    body: Option<Json<ListPendingRequest>>,
) -> Json<ListPendingResponse> {
    let limit = body
        .and_then(|Json(r)| r.limit)
        .filter(|l| *l > 0)
        .map(|l| l as usize)
        .unwrap_or(DEFAULT_PENDING_LIMIT);
    let actions = state.actions_repo.list_pending(limit).await.unwrap_or_default();
    Json(ListPendingResponse { actions })
}

// ─── ApproveAction ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ActionIdRequest {
    action_id: Uuid,
}

#[derive(Debug, Serialize)]
struct ApproveResponse {
    success: bool,
    message: String,
}

/// Approves `id`: transitions PENDING -> APPROVED, guarded so an action
/// already approved, rejected, or executed cannot be re-approved or
/// double-published, then publishes the resulting command. Publish failure
/// maps to INTERNAL.
pub async fn approve(state: &ActionServerState, id: Uuid) -> Result<Action, OrchestratorError> {
    let outcome = state
        .actions_repo
        .try_transition(id, ActionStatus::Pending, ActionStatus::Approved, None)
        .await?;

    let action = match outcome {
        TransitionOutcome::Applied(action) => *action,
        TransitionOutcome::NotFound => return Err(OrchestratorError::NotFound(id)),
        TransitionOutcome::Conflict(actual) => return Err(OrchestratorError::NotPending { id, actual }),
    };

    let command = ApplyActionCommand {
        action_id: action.id,
        target_tick_id: action.proposed_at_tick,
        action_type: action.action_type,
        target_id: action.target_id,
        parameters: action.parameters.clone(),
    };
    microcloud_bus::publish(state.bus.as_ref(), Subject::OpsCommands, &command).await?;
    info!(action_id = %action.id, "action approved and command published");
    Ok(action)
}

async fn approve_action(State(state): State<ActionServerState>, Json(req): Json<ActionIdRequest>) -> Response {
    match approve(&state, req.action_id).await {
        Ok(action) => Json(ApproveResponse {
            success: true,
            message: format!("action {} approved", action.id),
        })
        .into_response(),
        Err(e) => {
            error!(error = %e, action_id = %req.action_id, "approve_action failed");
            error_response(&e)
        }
    }
}

// ─── RejectAction ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RejectRequest {
    action_id: Uuid,
    reason: String,
}

#[derive(Debug, Serialize)]
struct RejectResponse {
    success: bool,
}

pub async fn reject(state: &ActionServerState, id: Uuid, reason: String) -> Result<Action, OrchestratorError> {
    let outcome = state
        .actions_repo
        .try_transition(id, ActionStatus::Pending, ActionStatus::Rejected, Some(reason))
        .await?;
    match outcome {
        TransitionOutcome::Applied(action) => Ok(*action),
        TransitionOutcome::NotFound => Err(OrchestratorError::NotFound(id)),
        TransitionOutcome::Conflict(actual) => Err(OrchestratorError::NotPending { id, actual }),
    }
}

async fn reject_action(State(state): State<ActionServerState>, Json(req): Json<RejectRequest>) -> Response {
    match reject(&state, req.action_id, req.reason).await {
        Ok(_) => Json(RejectResponse { success: true }).into_response(),
        Err(e) => error_response(&e),
    }
}

// ─── GetActionHistory ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct HistoryRequest {
    limit: Option<i32>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    actions: Vec<Action>,
    total_count: usize,
}

async fn get_action_history(
    State(state): State<ActionServerState>,
    body: Option<Json<HistoryRequest>>,
) -> Json<HistoryResponse> {
    let limit = body
        .and_then(|Json(r)| r.limit)
        .filter(|l| *l > 0)
        .map(|l| l as usize)
        .unwrap_or(DEFAULT_HISTORY_LIMIT);
    let actions = state.actions_repo.list_history(limit).await.unwrap_or_default();
    let total_count = actions.len();
    Json(HistoryResponse { actions, total_count })
}

pub fn router(state: ActionServerState) -> Router {
    Router::new()
        .route("/ops.v1.ActionService/ListPendingActions", post(list_pending_actions))
        .route("/ops.v1.ActionService/ApproveAction", post(approve_action))
        .route("/ops.v1.ActionService/RejectAction", post(reject_action))
        .route("/ops.v1.ActionService/GetActionHistory", post(get_action_history))
        .with_state(state)
}
