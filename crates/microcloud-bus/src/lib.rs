//! Typed pub/sub bus contract for the microcloud control loop.
//!
//! The production system runs this over a durable, at-least-once bus
//! (NATS JetStream or similar) with a single stream capturing `sim.>` and
//! `ops.>` at limits/24h/file-backed retention. This crate defines the
//! [`Bus`] trait that is the only coupling surface between components —
//! per the design notes, a different runtime needs only a driver
//! implementing this trait — and ships [`InProcessBus`], a
//! `tokio::sync::broadcast`-backed implementation sufficient to run the
//! whole loop in a single process or under test.
//!
//! Wire payloads are `serde_json`-encoded bytes rather than `bincode`: the
//! domain model carries free-form `serde_json::Value` fields (`Action::parameters`,
//! `SimulationEvent::details`, `ApplyActionCommand::parameters`) so that
//! action parameters can hold whatever shape a given `action_type` needs,
//! and `bincode`'s deserializer does not implement `deserialize_any` — it
//! cannot decode a `Value` at all. JSON bytes are still an opaque `Vec<u8>`
//! payload from the `Bus` trait's point of view, so a real NATS driver is
//! unaffected; see DESIGN.md for the full rationale.
//!
//! The in-process bus approximates the durable contract: it does not
//! persist messages published before a subscriber attaches, and a lagging
//! subscriber's oldest unread messages are dropped (surfaced as a logged
//! warning, not redelivered) rather than nacked-and-redelivered. See
//! DESIGN.md for the gap this leaves versus a real JetStream driver.

#![forbid(unsafe_code)]

use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

// ─── Subjects ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    SimMetrics,
    SimEvents,
    OpsIncidents,
    OpsActions,
    OpsCommands,
}

impl Subject {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SimMetrics => "sim.metrics",
            Self::SimEvents => "sim.events",
            Self::OpsIncidents => "ops.incidents",
            Self::OpsActions => "ops.actions",
            Self::OpsCommands => "ops.commands",
        }
    }

    fn idx(&self) -> usize {
        match self {
            Self::SimMetrics => 0,
            Self::SimEvents => 1,
            Self::OpsIncidents => 2,
            Self::OpsActions => 3,
            Self::OpsCommands => 4,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const SUBJECT_COUNT: usize = 5;

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("failed to decode payload: {0}")]
    Decode(String),
    #[error("publish failed on {subject}: {reason}")]
    Publish { subject: Subject, reason: String },
    #[error("subscription closed on {0}")]
    Closed(Subject),
}

pub type Result<T> = std::result::Result<T, BusError>;

// ─── Bus trait ────────────────────────────────────────────────────────────────

/// The only coupling surface between control-loop components.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    async fn publish_bytes(&self, subject: Subject, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, subject: Subject) -> Result<BusSubscription>;
}

/// Serialize `payload` with the bus's stable wire schema and publish it.
pub async fn publish<T: Serialize + Sync>(bus: &dyn Bus, subject: Subject, payload: &T) -> Result<()> {
    let bytes = serde_json::to_vec(payload).map_err(|e| BusError::Encode(e.to_string()))?;
    bus.publish_bytes(subject, bytes).await
}

/// Receive and decode the next message of type `T` from a subscription.
pub async fn recv_typed<T: DeserializeOwned>(sub: &mut BusSubscription) -> Result<T> {
    let bytes = sub.recv_bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| BusError::Decode(e.to_string()))
}

// ─── Subscription handle ──────────────────────────────────────────────────────

pub struct BusSubscription {
    subject: Subject,
    receiver: broadcast::Receiver<Arc<Vec<u8>>>,
}

impl BusSubscription {
    pub fn subject(&self) -> Subject {
        self.subject
    }

    /// Receive the next raw payload, transparently skipping past any
    /// messages dropped due to slow-consumer lag (logged, not redelivered).
    pub async fn recv_bytes(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(bytes) => return Ok((*bytes).clone()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subject = %self.subject, skipped, "bus subscriber lagged, messages dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(BusError::Closed(self.subject));
                }
            }
        }
    }
}

// ─── In-process implementation ────────────────────────────────────────────────

/// `tokio::sync::broadcast`-backed bus. One channel per subject, each with
/// the given per-subscriber buffer `capacity`.
pub struct InProcessBus {
    senders: [broadcast::Sender<Arc<Vec<u8>>>; SUBJECT_COUNT],
}

impl InProcessBus {
    pub fn new(capacity: usize) -> Self {
        let mk = || broadcast::channel::<Arc<Vec<u8>>>(capacity).0;
        Self {
            senders: [mk(), mk(), mk(), mk(), mk()],
        }
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait::async_trait]
impl Bus for InProcessBus {
    async fn publish_bytes(&self, subject: Subject, payload: Vec<u8>) -> Result<()> {
        // No subscribers is not an error: matches at-least-once-to-active-consumers,
        // not at-least-once-ever (no durable replay before subscribe, see module docs).
        let _ = self.senders[subject.idx()].send(Arc::new(payload));
        Ok(())
    }

    async fn subscribe(&self, subject: Subject) -> Result<BusSubscription> {
        Ok(BusSubscription {
            subject,
            receiver: self.senders[subject.idx()].subscribe(),
        })
    }
}
