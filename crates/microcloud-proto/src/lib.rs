//! Domain and wire types shared across the microcloud control loop.
//!
//! These are the payloads carried on the bus subjects described in the
//! system design (`sim.metrics`, `sim.events`, `ops.incidents`, `ops.actions`,
//! `ops.commands`) plus the entities the Simulation Engine owns.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ─── Timestamp ────────────────────────────────────────────────────────────────

/// Composite timestamp accompanying every domain event: simulation-time
/// ordering (`tick_id`) plus both wall-clock and simulated-clock readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timestamp {
    pub tick_id: i64,
    pub wall_time_unix_ms: i64,
    pub sim_time_unix_ms: i64,
}

// ─── Node ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Unhealthy => write!(f, "UNHEALTHY"),
            Self::Offline => write!(f, "OFFLINE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: Uuid,
    pub name: String,
    pub status: NodeStatus,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    pub disk_pct: f64,
    pub running_services: u32,
    pub availability_zone: String,
    pub labels: HashMap<String, String>,
}

// ─── Service ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceHealth {
    Healthy,
    Degraded,
    Critical,
    Down,
}

impl std::fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "HEALTHY"),
            Self::Degraded => write!(f, "DEGRADED"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Invariant: `latency_p99_ms >= latency_p50_ms`, enforced by the engine each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub node_id: Uuid,
    pub health: ServiceHealth,
    pub rps: f64,
    pub error_rate_pct: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    pub replica_count: u32,
    pub desired_replicas: u32,
}

// ─── Entity addressing (used by the detector's sliding-window keys) ──────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Node,
    Service,
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Node => write!(f, "node"),
            Self::Service => write!(f, "service"),
        }
    }
}

// ─── MetricRow (append-only time series) ──────────────────────────────────────

/// Exactly one of `node_id`/`service_id` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRow {
    pub time: chrono::DateTime<chrono::Utc>,
    pub tick_id: i64,
    pub node_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub metric_name: String,
    pub metric_value: f64,
    pub labels: HashMap<String, String>,
}

impl MetricRow {
    pub fn entity_type(&self) -> Option<EntityType> {
        if self.node_id.is_some() {
            Some(EntityType::Node)
        } else if self.service_id.is_some() {
            Some(EntityType::Service)
        } else {
            None
        }
    }

    pub fn entity_id(&self) -> Option<Uuid> {
        self.node_id.or(self.service_id)
    }
}

// ─── Incident ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Raised by the Signal Service; severity and rule_name come from the
/// triggering rule. `resolved`/`resolved_at` are never set by this
/// implementation — see DESIGN.md on detector resolution propagation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub detected_at: Timestamp,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub source_service: Option<Uuid>,
    pub affected_ids: Vec<Uuid>,
    pub rule_name: String,
    pub metrics: HashMap<String, f64>,
    pub resolved: bool,
    pub resolved_at: Option<chrono::DateTime<chrono::Utc>>,
}

// ─── Action ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    RestartService,
    ScaleUp,
    ScaleDown,
    DrainNode,
    RebalanceTraffic,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RestartService => "RESTART_SERVICE",
            Self::ScaleUp => "SCALE_UP",
            Self::ScaleDown => "SCALE_DOWN",
            Self::DrainNode => "DRAIN_NODE",
            Self::RebalanceTraffic => "REBALANCE_TRAFFIC",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Executing => write!(f, "EXECUTING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Status progresses monotonically along two legal paths:
/// `PENDING -> APPROVED -> EXECUTING -> {COMPLETED, FAILED}` or
/// `PENDING -> REJECTED` (terminal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub proposed_at_tick: i64,
    pub action_type: ActionType,
    pub target_id: Uuid,
    pub status: ActionStatus,
    pub reason: String,
    pub parameters: serde_json::Value,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub executed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub result_message: Option<String>,
}

// ─── Engine run state & scenarios ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    Normal,
    HighLoad,
    CascadeFailure,
}

impl Scenario {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "normal" => Some(Self::Normal),
            "high_load" => Some(Self::HighLoad),
            "cascade_failure" => Some(Self::CascadeFailure),
            _ => None,
        }
    }
}

// ─── Bus payloads ─────────────────────────────────────────────────────────────

/// Published on `sim.metrics`. Point-in-time dump of all nodes/services.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub tick: Timestamp,
    pub nodes: Vec<Node>,
    pub services: Vec<Service>,
}

/// Published on `sim.events`, describing the outcome of an `ApplyCommand`.
/// `event_type` is empty for unknown target/action-type no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationEvent {
    pub event_type: String,
    pub tick: Timestamp,
    pub target_id: Option<Uuid>,
    pub details: serde_json::Value,
}

/// Published on `ops.commands` by the Orchestrator after `ApproveAction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyActionCommand {
    pub action_id: Uuid,
    pub target_tick_id: i64,
    pub action_type: ActionType,
    pub target_id: Uuid,
    pub parameters: serde_json::Value,
}

// ─── Detector rule table ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
}

impl Operator {
    pub fn apply(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Gte => value >= threshold,
            Self::Lt => value < threshold,
            Self::Lte => value <= threshold,
            Self::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub metric_name: String,
    pub operator: Operator,
    pub threshold: f64,
    pub window_seconds: i64,
    pub severity: Severity,
}
