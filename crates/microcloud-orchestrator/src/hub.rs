//! Stream Hub: fans `sim.metrics` / `ops.incidents` / `ops.actions` bus
//! traffic onto every connected SSE client, replaying the latest message of
//! each kind on connect. Owns the client registry and the
//! latest-of-each-kind cache (§3 Ownership, §4.5).

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{Router, extract::State, routing::get};
use futures_util::StreamExt;
use futures_util::stream::Stream;
use microcloud_bus::{Bus, Subject};
use microcloud_proto::{Action, Incident, MetricSnapshot};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-client bounded buffer capacity — slow-consumer protection (§4.5).
const CLIENT_BUFFER_CAPACITY: usize = 100;
const KEEPALIVE_SECS: u64 = 15;

const KIND_METRICS: &str = "metrics";
const KIND_INCIDENT: &str = "incident";
const KIND_ACTION: &str = "action";
/// Replay order on connect: metrics, then incidents, then actions.
const REPLAY_ORDER: [&str; 3] = [KIND_METRICS, KIND_INCIDENT, KIND_ACTION];

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: T,
}

pub struct StreamHub {
    clients: RwLock<HashMap<Uuid, mpsc::Sender<String>>>,
    latest: RwLock<HashMap<&'static str, String>>,
}

impl StreamHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        })
    }

    /// Registers a new client, returning its id and the receiving half of
    /// its bounded buffer. The caller is responsible for flushing the
    /// latest-of-each-kind snapshot before looping on the receiver.
    fn register(&self) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER_CAPACITY);
        let id = Uuid::new_v4();
        self.clients.write().insert(id, tx);
        (id, rx)
    }

    fn deregister(&self, id: Uuid) {
        self.clients.write().remove(&id);
    }

    /// The latest-of-each-kind snapshot, in replay order, for a freshly
    /// connected client.
    fn latest_snapshot(&self) -> Vec<String> {
        let latest = self.latest.read();
        REPLAY_ORDER.iter().filter_map(|k| latest.get(k).cloned()).collect()
    }

    /// Broadcasts `json` of the given `kind` to every registered client.
    /// Never blocks: a client whose buffer is full simply misses the
    /// message (§4.5, invariant 9).
    fn broadcast(&self, kind: &'static str, json: String) {
        self.latest.write().insert(kind, json.clone());
        let clients = self.clients.read();
        for (id, tx) in clients.iter() {
            if tx.try_send(json.clone()).is_err() {
                warn!(client_id = %id, kind, "client buffer full, message dropped");
            }
        }
    }

    fn publish_metrics(&self, snapshot: &MetricSnapshot) {
        if let Ok(json) = serde_json::to_string(&Envelope {
            kind: KIND_METRICS,
            payload: snapshot,
        }) {
            self.broadcast(KIND_METRICS, json);
        }
    }

    fn publish_incident(&self, incident: &Incident) {
        if let Ok(json) = serde_json::to_string(&Envelope {
            kind: KIND_INCIDENT,
            payload: incident,
        }) {
            self.broadcast(KIND_INCIDENT, json);
        }
    }

    fn publish_action(&self, action: &Action) {
        if let Ok(json) = serde_json::to_string(&Envelope {
            kind: KIND_ACTION,
            payload: action,
        }) {
            self.broadcast(KIND_ACTION, json);
        }
    }

    /// Runs the three durable consumers (`orchestrator-metrics`,
    /// `-incidents`, `-actions`) until `shutdown` fires.
    pub async fn run(self: Arc<Self>, bus: Arc<dyn Bus>, mut shutdown: watch::Receiver<bool>) {
        let metrics_hub = self.clone();
        let metrics_bus = bus.clone();
        let mut metrics_shutdown = shutdown.clone();
        let metrics_task = tokio::spawn(async move {
            let Ok(mut sub) = metrics_bus.subscribe(Subject::SimMetrics).await else {
                return;
            };
            loop {
                tokio::select! {
                    res = microcloud_bus::recv_typed::<MetricSnapshot>(&mut sub) => {
                        if let Ok(snapshot) = res {
                            metrics_hub.publish_metrics(&snapshot);
                        }
                    }
                    _ = metrics_shutdown.changed() => { if *metrics_shutdown.borrow() { break; } }
                }
            }
        });

        let incidents_hub = self.clone();
        let incidents_bus = bus.clone();
        let mut incidents_shutdown = shutdown.clone();
        let incidents_task = tokio::spawn(async move {
            let Ok(mut sub) = incidents_bus.subscribe(Subject::OpsIncidents).await else {
                return;
            };
            loop {
                tokio::select! {
                    res = microcloud_bus::recv_typed::<Incident>(&mut sub) => {
                        if let Ok(incident) = res {
                            incidents_hub.publish_incident(&incident);
                        }
                    }
                    _ = incidents_shutdown.changed() => { if *incidents_shutdown.borrow() { break; } }
                }
            }
        });

        let actions_hub = self.clone();
        let actions_bus = bus.clone();
        let actions_task = tokio::spawn(async move {
            let Ok(mut sub) = actions_bus.subscribe(Subject::OpsActions).await else {
                return;
            };
            loop {
                tokio::select! {
                    res = microcloud_bus::recv_typed::<Action>(&mut sub) => {
                        if let Ok(action) = res {
                            actions_hub.publish_action(&action);
                        }
                    }
                    _ = shutdown.changed() => { if *shutdown.borrow() { break; } }
                }
            }
        });

        info!("stream hub consumers started");
        let _ = tokio::join!(metrics_task, incidents_task, actions_task);
        info!("stream hub consumers stopped");
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
        }
    }
}

async fn stream_handler(
    State(hub): State<Arc<StreamHub>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = hub.register();
    let replay = hub.latest_snapshot();

    let replay_stream = tokio_stream::iter(replay.into_iter().map(|msg| Ok(Event::default().data(msg))));
    let live_stream = ReceiverStream::new(rx).map(move |msg| Ok(Event::default().data(msg)));
    let guarded = DropGuardStream {
        inner: live_stream,
        hub: hub.clone(),
        id,
    };

    Sse::new(replay_stream.chain(guarded)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEPALIVE_SECS))
            .text("keepalive"),
    )
}

/// Wraps the per-client receiver stream so that when it is dropped (client
/// disconnects, request context cancels) the client is deregistered and its
/// buffer closed, per the client lifecycle in §4.5.
struct DropGuardStream<S> {
    inner: S,
    hub: Arc<StreamHub>,
    id: Uuid,
}

impl<S: Stream + Unpin> Stream for DropGuardStream<S> {
    type Item = S::Item;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        std::pin::Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for DropGuardStream<S> {
    fn drop(&mut self) {
        self.hub.deregister(self.id);
    }
}

pub fn router(hub: Arc<StreamHub>) -> Router {
    Router::new().route("/api/stream", get(stream_handler)).with_state(hub)
}

#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_bus::InProcessBus;
    use microcloud_proto::Timestamp;

    #[tokio::test]
    async fn broadcast_never_blocks_on_a_full_client() {
        let hub = StreamHub::new();
        let (id, rx) = hub.register();
        drop(rx); // simulate a client whose receiver is gone / buffer unread

        for i in 0..5 {
            hub.publish_metrics(&MetricSnapshot {
                tick: Timestamp {
                    tick_id: i,
                    wall_time_unix_ms: 0,
                    sim_time_unix_ms: 0,
                },
                nodes: vec![],
                services: vec![],
            });
        }
        hub.deregister(id);
    }

    #[tokio::test]
    async fn latest_snapshot_returns_most_recent_of_each_kind_in_replay_order() {
        let hub = StreamHub::new();
        hub.publish_metrics(&MetricSnapshot {
            tick: Timestamp {
                tick_id: 1,
                wall_time_unix_ms: 0,
                sim_time_unix_ms: 0,
            },
            nodes: vec![],
            services: vec![],
        });
        let snapshot = hub.latest_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].contains("\"type\":\"metrics\""));
    }

    #[tokio::test]
    async fn newly_registered_client_receives_broadcast_messages() {
        let hub = StreamHub::new();
        let (_id, mut rx) = hub.register();
        hub.publish_metrics(&MetricSnapshot {
            tick: Timestamp {
                tick_id: 1,
                wall_time_unix_ms: 0,
                sim_time_unix_ms: 0,
            },
            nodes: vec![],
            services: vec![],
        });
        let msg = rx.recv().await.unwrap();
        assert!(msg.contains("\"type\":\"metrics\""));
    }

    #[tokio::test]
    async fn run_forwards_bus_snapshot_to_registered_client() {
        let bus: Arc<dyn Bus> = Arc::new(InProcessBus::default());
        let hub = StreamHub::new();
        let (_id, mut rx) = hub.register();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let hub_clone = hub.clone();
        let task = tokio::spawn(hub_clone.run(bus.clone(), shutdown_rx));

        // give the subscriber tasks a moment to subscribe
        tokio::time::sleep(Duration::from_millis(20)).await;
        microcloud_bus::publish(
            bus.as_ref(),
            Subject::SimMetrics,
            &MetricSnapshot {
                tick: Timestamp {
                    tick_id: 1,
                    wall_time_unix_ms: 0,
                    sim_time_unix_ms: 0,
                },
                nodes: vec![],
                services: vec![],
            },
        )
        .await
        .unwrap();

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(msg.contains("\"type\":\"metrics\""));

        let _ = shutdown_tx.send(true);
        let _ = task.await;
    }
}
