//! Async wrapper around [`crate::core::EngineCore`]: owns the engine state
//! lock, drives the tick timer, consumes `ops.commands`, and publishes
//! `sim.metrics` / `sim.events`.

use crate::core::{EngineCore, EngineState};
use crate::error::EngineError;
use microcloud_bus::{Bus, Subject};
use microcloud_proto::{ApplyActionCommand, MetricSnapshot, RunState, Scenario};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

/// Serializable view of control-surface-relevant state, returned by `GetState`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStateView {
    pub run_state: RunState,
    pub speed_multiplier: f64,
    pub scenario: Scenario,
    pub tick_id: i64,
}

pub struct EngineService {
    state: RwLock<EngineState>,
    bus: Arc<dyn Bus>,
    tick_interval_ms: u64,
}

impl EngineService {
    pub fn new(initial: EngineState, bus: Arc<dyn Bus>, tick_interval_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(initial),
            bus,
            tick_interval_ms,
        })
    }

    // ─── Control surface ───────────────────────────────────────────────────

    pub async fn get_state(&self) -> EngineStateView {
        let s = self.state.read().await;
        EngineStateView {
            run_state: s.run_state,
            speed_multiplier: s.speed_multiplier,
            scenario: s.scenario,
            tick_id: s.tick_id,
        }
    }

    pub async fn set_state(&self, run_state: RunState) {
        let mut s = self.state.write().await;
        info!(?run_state, "engine run-state changed");
        s.run_state = run_state;
    }

    /// Clamps to `[0.1, 10.0]`; returns the clamped value actually stored.
    pub async fn set_speed(&self, requested: f64) -> f64 {
        let clamped = EngineCore::clamp_speed(requested);
        let mut s = self.state.write().await;
        s.speed_multiplier = clamped;
        clamped
    }

    /// Rejects names outside the enumerated scenario set.
    pub async fn load_scenario(&self, name: &str) -> Result<Scenario, EngineError> {
        let scenario = Scenario::parse(name).ok_or_else(|| EngineError::UnknownScenario(name.to_string()))?;
        let mut s = self.state.write().await;
        info!(scenario = name, "scenario loaded");
        s.scenario = scenario;
        Ok(scenario)
    }

    // ─── Tick loop ─────────────────────────────────────────────────────────

    /// Runs until `shutdown` is set to `true`. Exits within one tick interval
    /// of shutdown being signalled.
    pub async fn run_tick_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut rng = StdRng::from_entropy();
        let mut interval = tokio::time::interval(Duration::from_millis(self.tick_interval_ms));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick_once(&mut rng).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("tick loop exiting on shutdown");
                        break;
                    }
                }
            }
        }
    }

    async fn tick_once(&self, rng: &mut StdRng) {
        // Exclusive lock for the duration of tick mutation + snapshot read,
        // per the engine state lock's ordering guarantee.
        let mut guard = self.state.write().await;
        if guard.run_state != RunState::Running {
            return;
        }
        let next = EngineCore::advance(&guard, rng, self.tick_interval_ms);
        *guard = next;
        let tick = EngineCore::timestamp_for(&guard);
        let snapshot = MetricSnapshot {
            tick,
            nodes: guard.nodes.clone(),
            services: guard.services.clone(),
        };
        drop(guard);

        if let Err(e) = microcloud_bus::publish(self.bus.as_ref(), Subject::SimMetrics, &snapshot).await {
            warn!(error = %e, "failed to publish snapshot");
        }
    }

    // ─── Command consumer ─────────────────────────────────────────────────

    pub async fn run_command_consumer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut sub = match self.bus.subscribe(Subject::OpsCommands).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to subscribe to ops.commands");
                return;
            }
        };

        loop {
            tokio::select! {
                res = microcloud_bus::recv_typed::<ApplyActionCommand>(&mut sub) => {
                    match res {
                        Ok(cmd) => self.handle_command(cmd).await,
                        Err(e) => warn!(error = %e, "nacking malformed ops.commands message"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("command consumer exiting on shutdown");
                        break;
                    }
                }
            }
        }
    }

    pub async fn handle_command(&self, cmd: ApplyActionCommand) {
        let mut guard = self.state.write().await;
        let (next, event) = EngineCore::apply_command(&guard, cmd.action_type, cmd.target_id, &cmd.parameters);
        *guard = next;
        drop(guard);

        if event.event_type.is_empty() {
            debug!(action_id = %cmd.action_id, "command was a no-op");
        } else {
            info!(action_id = %cmd.action_id, event_type = %event.event_type, "applied command");
        }

        if let Err(e) = microcloud_bus::publish(self.bus.as_ref(), Subject::SimEvents, &event).await {
            error!(error = %e, "failed to publish simulation event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_bus::InProcessBus;
    use microcloud_proto::{ActionType, Node, NodeStatus, Service, ServiceHealth};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn one_service() -> Service {
        Service {
            id: Uuid::new_v4(),
            name: "svc".into(),
            node_id: Uuid::new_v4(),
            health: ServiceHealth::Healthy,
            rps: 100.0,
            error_rate_pct: 1.0,
            latency_p50_ms: 10.0,
            latency_p99_ms: 20.0,
            replica_count: 1,
            desired_replicas: 1,
        }
    }

    fn one_node() -> Node {
        Node {
            id: Uuid::new_v4(),
            name: "node".into(),
            status: NodeStatus::Healthy,
            cpu_pct: 10.0,
            mem_pct: 10.0,
            disk_pct: 10.0,
            running_services: 1,
            availability_zone: "az-1".into(),
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn set_speed_clamps_and_get_state_reflects_it() {
        let bus = Arc::new(InProcessBus::default());
        let svc = EngineService::new(EngineState::new(vec![one_node()], vec![one_service()]), bus, 100);
        let clamped = svc.set_speed(100.0).await;
        assert_eq!(clamped, 10.0);
        assert_eq!(svc.get_state().await.speed_multiplier, 10.0);
    }

    #[tokio::test]
    async fn load_scenario_rejects_unknown_name() {
        let bus = Arc::new(InProcessBus::default());
        let svc = EngineService::new(EngineState::new(vec![], vec![]), bus, 100);
        assert!(svc.load_scenario("not_a_real_scenario").await.is_err());
        assert!(svc.load_scenario("cascade_failure").await.is_ok());
    }

    #[tokio::test]
    async fn handle_command_approve_action_restart_publishes_event() {
        let bus = Arc::new(InProcessBus::default());
        let svc_entity = one_service();
        let svc_id = svc_entity.id;
        let svc = EngineService::new(EngineState::new(vec![], vec![svc_entity]), bus.clone(), 100);

        let mut events = bus.subscribe(Subject::SimEvents).await.unwrap();
        svc.handle_command(ApplyActionCommand {
            action_id: Uuid::new_v4(),
            target_tick_id: 0,
            action_type: ActionType::RestartService,
            target_id: svc_id,
            parameters: serde_json::json!({}),
        })
        .await;

        let event: microcloud_proto::SimulationEvent = microcloud_bus::recv_typed(&mut events).await.unwrap();
        assert_eq!(event.event_type, "service_restarted");
    }
}
