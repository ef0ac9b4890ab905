//! Repository contracts the control loop's core consumes, plus in-memory
//! implementations sufficient to run and test the loop without a real
//! TimescaleDB/Postgres instance.
//!
//! Index shapes mirror the target persistence design: metrics by
//! `(node_id, time desc)` / `(service_id, time desc)`; incidents by
//! `(severity, detected_at desc)`; actions by `(status, created_at desc)`
//! and by incident.

#![forbid(unsafe_code)]

use microcloud_proto::{Action, ActionStatus, Incident, MetricRow, Severity};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, RepoError>;

// ─── Metrics repository ───────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait MetricsRepository: Send + Sync {
    async fn insert_batch(&self, rows: Vec<MetricRow>) -> Result<()>;
    async fn query_by_node(&self, node_id: Uuid, limit: usize) -> Result<Vec<MetricRow>>;
    async fn query_by_service(&self, service_id: Uuid, limit: usize) -> Result<Vec<MetricRow>>;
}

#[derive(Default)]
pub struct InMemoryMetricsRepository {
    rows: RwLock<Vec<MetricRow>>,
}

impl InMemoryMetricsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MetricsRepository for InMemoryMetricsRepository {
    async fn insert_batch(&self, rows: Vec<MetricRow>) -> Result<()> {
        self.rows.write().extend(rows);
        Ok(())
    }

    async fn query_by_node(&self, node_id: Uuid, limit: usize) -> Result<Vec<MetricRow>> {
        let rows = self.rows.read();
        let mut matched: Vec<MetricRow> = rows
            .iter()
            .filter(|r| r.node_id == Some(node_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.time.cmp(&a.time));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn query_by_service(&self, service_id: Uuid, limit: usize) -> Result<Vec<MetricRow>> {
        let rows = self.rows.read();
        let mut matched: Vec<MetricRow> = rows
            .iter()
            .filter(|r| r.service_id == Some(service_id))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.time.cmp(&a.time));
        matched.truncate(limit);
        Ok(matched)
    }
}

// ─── Incidents repository ─────────────────────────────────────────────────────

#[async_trait::async_trait]
pub trait IncidentsRepository: Send + Sync {
    async fn insert(&self, incident: Incident) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Incident>>;
    async fn list_by_severity(&self, severity: Severity, limit: usize) -> Result<Vec<Incident>>;
    async fn list_unresolved(&self, limit: usize) -> Result<Vec<Incident>>;
}

#[derive(Default)]
pub struct InMemoryIncidentsRepository {
    by_id: RwLock<HashMap<Uuid, Incident>>,
}

impl InMemoryIncidentsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl IncidentsRepository for InMemoryIncidentsRepository {
    async fn insert(&self, incident: Incident) -> Result<()> {
        self.by_id.write().insert(incident.id, incident);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        Ok(self.by_id.read().get(&id).cloned())
    }

    async fn list_by_severity(&self, severity: Severity, limit: usize) -> Result<Vec<Incident>> {
        let by_id = self.by_id.read();
        let mut matched: Vec<Incident> = by_id
            .values()
            .filter(|i| i.severity == severity)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.detected_at.tick_id.cmp(&a.detected_at.tick_id));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn list_unresolved(&self, limit: usize) -> Result<Vec<Incident>> {
        let by_id = self.by_id.read();
        let mut matched: Vec<Incident> = by_id.values().filter(|i| !i.resolved).cloned().collect();
        matched.sort_by(|a, b| b.detected_at.tick_id.cmp(&a.detected_at.tick_id));
        matched.truncate(limit);
        Ok(matched)
    }
}

// ─── Actions repository ───────────────────────────────────────────────────────

/// Outcome of a guarded status transition (used by the Orchestrator's
/// `ApproveAction`/`RejectAction`, which must not blindly overwrite status).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied(Box<Action>),
    NotFound,
    Conflict(ActionStatus),
}

#[async_trait::async_trait]
pub trait ActionsRepository: Send + Sync {
    async fn insert(&self, action: Action) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Action>>;

    /// Atomically transition `id` from `expected` to `new`, storing
    /// `result_message` and (for non-pending results) `executed_at`. Returns
    /// `NotFound` if the id does not exist, `Conflict(actual)` if the
    /// current status does not match `expected`.
    async fn try_transition(
        &self,
        id: Uuid,
        expected: ActionStatus,
        new: ActionStatus,
        result_message: Option<String>,
    ) -> Result<TransitionOutcome>;

    /// PENDING actions, oldest-first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<Action>>;

    /// All actions, most-recent-first.
    async fn list_history(&self, limit: usize) -> Result<Vec<Action>>;

    async fn list_by_incident(&self, incident_id: Uuid) -> Result<Vec<Action>>;
}

#[derive(Default)]
pub struct InMemoryActionsRepository {
    by_id: RwLock<HashMap<Uuid, Action>>,
}

impl InMemoryActionsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ActionsRepository for InMemoryActionsRepository {
    async fn insert(&self, action: Action) -> Result<()> {
        self.by_id.write().insert(action.id, action);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Action>> {
        Ok(self.by_id.read().get(&id).cloned())
    }

    async fn try_transition(
        &self,
        id: Uuid,
        expected: ActionStatus,
        new: ActionStatus,
        result_message: Option<String>,
    ) -> Result<TransitionOutcome> {
        let mut by_id = self.by_id.write();
        let Some(action) = by_id.get_mut(&id) else {
            return Ok(TransitionOutcome::NotFound);
        };
        if action.status != expected {
            return Ok(TransitionOutcome::Conflict(action.status));
        }
        action.status = new;
        if let Some(msg) = result_message {
            action.result_message = Some(msg);
        }
        if !matches!(new, ActionStatus::Pending | ActionStatus::Approved) {
            action.executed_at = Some(chrono::Utc::now());
        }
        Ok(TransitionOutcome::Applied(Box::new(action.clone())))
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<Action>> {
        let by_id = self.by_id.read();
        let mut matched: Vec<Action> = by_id
            .values()
            .filter(|a| a.status == ActionStatus::Pending)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn list_history(&self, limit: usize) -> Result<Vec<Action>> {
        let by_id = self.by_id.read();
        let mut matched: Vec<Action> = by_id.values().cloned().collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn list_by_incident(&self, incident_id: Uuid) -> Result<Vec<Action>> {
        let by_id = self.by_id.read();
        Ok(by_id
            .values()
            .filter(|a| a.incident_id == incident_id)
            .cloned()
            .collect())
    }
}
