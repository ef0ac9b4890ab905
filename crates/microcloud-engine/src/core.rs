//! Pure, side-effect-free simulation core: random-walk mutation, derived
//! status, scenario overlays, and command application. No I/O, no internal
//! mutable state — every function takes explicit state and returns an
//! explicit new state plus whatever event it produced, so this module is
//! unit-testable without tokio.

use microcloud_proto::{
    ActionType, Node, NodeStatus, RunState, Scenario, Service, ServiceHealth, SimulationEvent,
    Timestamp,
};
use rand::Rng;
use uuid::Uuid;

// Random-walk amplitudes, per-metric, symmetric about zero.
const A_CPU: f64 = 5.0;
const A_MEM: f64 = 2.0;
const A_DISK: f64 = 0.5;
const A_RPS: f64 = 50.0;
const A_ERR: f64 = 0.5;
const A_P50: f64 = 2.0;
const A_P99: f64 = 10.0;

const CASCADE_FAILURE_PROBABILITY: f64 = 0.05;
const CASCADE_FAILURE_ERROR_BUMP: f64 = 20.0;
const HIGH_LOAD_MAX_CPU_BUMP: f64 = 10.0;

#[derive(Debug, Clone)]
pub struct EngineState {
    pub run_state: RunState,
    pub speed_multiplier: f64,
    pub scenario: Scenario,
    pub tick_id: i64,
    pub sim_time_unix_ms: i64,
    pub nodes: Vec<Node>,
    pub services: Vec<Service>,
}

impl EngineState {
    pub fn new(nodes: Vec<Node>, services: Vec<Service>) -> Self {
        Self {
            run_state: RunState::Running,
            speed_multiplier: 1.0,
            scenario: Scenario::Normal,
            tick_id: 0,
            sim_time_unix_ms: 0,
            nodes,
            services,
        }
    }
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

fn uniform(rng: &mut impl Rng, amplitude: f64) -> f64 {
    rng.gen_range(-amplitude..=amplitude)
}

fn derive_node_status(cpu_pct: f64, mem_pct: f64) -> NodeStatus {
    if cpu_pct > 80.0 || mem_pct > 85.0 {
        NodeStatus::Degraded
    } else {
        NodeStatus::Healthy
    }
}

fn derive_service_health(error_rate_pct: f64) -> ServiceHealth {
    if error_rate_pct > 10.0 {
        ServiceHealth::Critical
    } else if error_rate_pct > 5.0 {
        ServiceHealth::Degraded
    } else {
        ServiceHealth::Healthy
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct EngineCore;

impl EngineCore {
    /// Bounded random walk plus clamps plus derived status for one node.
    /// OFFLINE is sticky — only `DrainNode` can set it, and a random walk
    /// never derives it back to HEALTHY/DEGRADED.
    pub fn walk_node(node: &Node, rng: &mut impl Rng, scenario: Scenario) -> Node {
        let mut next = node.clone();
        next.cpu_pct = clamp(next.cpu_pct + uniform(rng, A_CPU), 0.0, 100.0);
        if scenario == Scenario::HighLoad {
            next.cpu_pct = clamp(next.cpu_pct + rng.gen_range(0.0..=HIGH_LOAD_MAX_CPU_BUMP), 0.0, 100.0);
        }
        next.mem_pct = clamp(next.mem_pct + uniform(rng, A_MEM), 0.0, 100.0);
        next.disk_pct = clamp(next.disk_pct + uniform(rng, A_DISK), 0.0, 100.0);
        if next.status != NodeStatus::Offline {
            next.status = derive_node_status(next.cpu_pct, next.mem_pct);
        }
        next
    }

    /// Bounded random walk plus clamps plus derived health for one service.
    pub fn walk_service(service: &Service, rng: &mut impl Rng, scenario: Scenario) -> Service {
        let mut next = service.clone();
        next.rps = clamp(next.rps + uniform(rng, A_RPS), 0.0, 10_000.0);
        next.error_rate_pct = clamp(next.error_rate_pct + uniform(rng, A_ERR), 0.0, 100.0);
        if scenario == Scenario::CascadeFailure && rng.gen_bool(CASCADE_FAILURE_PROBABILITY) {
            next.error_rate_pct = clamp(next.error_rate_pct + CASCADE_FAILURE_ERROR_BUMP, 0.0, 100.0);
        }
        next.latency_p50_ms = clamp(next.latency_p50_ms + uniform(rng, A_P50), 1.0, 1000.0);
        next.latency_p99_ms = clamp(
            next.latency_p99_ms + uniform(rng, A_P99),
            next.latency_p50_ms,
            5000.0,
        );
        next.health = derive_service_health(next.error_rate_pct);
        next
    }

    /// Advance a `RUNNING` state by one tick: increment `tick_id`, advance
    /// `sim_time` by `tick_interval * speed`, walk every node/service under
    /// the active scenario. Caller is responsible for checking run-state
    /// first — ticks are skipped (not advanced) while paused/stopped.
    pub fn advance(state: &EngineState, rng: &mut impl Rng, tick_interval_ms: u64) -> EngineState {
        let mut next = state.clone();
        next.tick_id += 1;
        next.sim_time_unix_ms += (tick_interval_ms as f64 * next.speed_multiplier).round() as i64;
        next.nodes = state
            .nodes
            .iter()
            .map(|n| Self::walk_node(n, rng, next.scenario))
            .collect();
        next.services = state
            .services
            .iter()
            .map(|s| Self::walk_service(s, rng, next.scenario))
            .collect();
        next
    }

    pub fn timestamp_for(state: &EngineState) -> Timestamp {
        Timestamp {
            tick_id: state.tick_id,
            wall_time_unix_ms: now_ms(),
            sim_time_unix_ms: state.sim_time_unix_ms,
        }
    }

    /// `SetSpeed` clamps to [0.1, 10.0].
    pub fn clamp_speed(x: f64) -> f64 {
        x.clamp(0.1, 10.0)
    }

    /// Apply a command to ground-truth state, returning the mutated state
    /// and the `SimulationEvent` describing the outcome. Unknown `target_id`
    /// is a no-op with an empty `event_type`. `RebalanceTraffic` is
    /// deliberately global (affects every service) despite taking a
    /// `target_id` — this mirrors the currently-specified, possibly
    /// unintended, behavior rather than "fixing" it.
    pub fn apply_command(
        state: &EngineState,
        action_type: ActionType,
        target_id: Uuid,
        _parameters: &serde_json::Value,
    ) -> (EngineState, SimulationEvent) {
        let mut next = state.clone();
        let mut event_type = String::new();
        let mut details = serde_json::json!({});

        match action_type {
            ActionType::RestartService => {
                if let Some(svc) = next.services.iter_mut().find(|s| s.id == target_id) {
                    svc.health = ServiceHealth::Healthy;
                    svc.error_rate_pct = 0.1;
                    svc.latency_p50_ms = 5.0;
                    svc.latency_p99_ms = 20.0;
                    event_type = "service_restarted".to_string();
                    details = serde_json::json!({ "service_id": target_id });
                }
            }
            ActionType::ScaleUp => {
                if let Some(svc) = next.services.iter_mut().find(|s| s.id == target_id) {
                    svc.replica_count += 1;
                    svc.desired_replicas = svc.replica_count;
                    event_type = "service_scaled_up".to_string();
                    details = serde_json::json!({
                        "service_id": target_id,
                        "replica_count": svc.replica_count,
                    });
                }
            }
            ActionType::ScaleDown => {
                if let Some(svc) = next.services.iter_mut().find(|s| s.id == target_id) {
                    if svc.replica_count > 1 {
                        svc.replica_count -= 1;
                        svc.desired_replicas = svc.replica_count;
                        event_type = "service_scaled_down".to_string();
                        details = serde_json::json!({
                            "service_id": target_id,
                            "replica_count": svc.replica_count,
                        });
                    }
                    // replica_count == 1: precondition unmet, state unchanged,
                    // no-op (empty event_type), per invariant 4.
                }
            }
            ActionType::DrainNode => {
                if let Some(node) = next.nodes.iter_mut().find(|n| n.id == target_id) {
                    node.status = NodeStatus::Offline;
                    node.running_services = 0;
                    event_type = "node_drained".to_string();
                    details = serde_json::json!({ "node_id": target_id });
                }
            }
            ActionType::RebalanceTraffic => {
                for svc in next.services.iter_mut() {
                    svc.rps *= 0.9;
                }
                event_type = "traffic_rebalanced".to_string();
                details = serde_json::json!({ "target_id_supplied": target_id });
            }
        }

        let tick = Self::timestamp_for(&next);
        let event = SimulationEvent {
            event_type,
            tick,
            target_id: Some(target_id),
            details,
        };
        (next, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;

    fn make_node(cpu: f64, mem: f64) -> Node {
        Node {
            id: Uuid::new_v4(),
            name: "node-a".into(),
            status: NodeStatus::Healthy,
            cpu_pct: cpu,
            mem_pct: mem,
            disk_pct: 30.0,
            running_services: 2,
            availability_zone: "az-1".into(),
            labels: HashMap::new(),
        }
    }

    fn make_service(err: f64, p50: f64, p99: f64) -> Service {
        Service {
            id: Uuid::new_v4(),
            name: "svc-a".into(),
            node_id: Uuid::new_v4(),
            health: ServiceHealth::Healthy,
            rps: 100.0,
            error_rate_pct: err,
            latency_p50_ms: p50,
            latency_p99_ms: p99,
            replica_count: 2,
            desired_replicas: 2,
        }
    }

    #[test]
    fn walk_keeps_percent_metrics_in_range_over_many_ticks() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut node = make_node(95.0, 95.0);
        for _ in 0..1000 {
            node = EngineCore::walk_node(&node, &mut rng, Scenario::Normal);
            assert!((0.0..=100.0).contains(&node.cpu_pct));
            assert!((0.0..=100.0).contains(&node.mem_pct));
            assert!((0.0..=100.0).contains(&node.disk_pct));
        }
    }

    #[test]
    fn walk_node_preserves_offline_status() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut node = make_node(10.0, 10.0);
        node.status = NodeStatus::Offline;
        let next = EngineCore::walk_node(&node, &mut rng, Scenario::Normal);
        assert_eq!(next.status, NodeStatus::Offline);
    }

    #[test]
    fn walk_node_derives_degraded_above_thresholds() {
        let mut rng = StdRng::seed_from_u64(2);
        let node = make_node(81.0, 10.0);
        // one walk step might push cpu back under 80, so force the check at threshold level:
        assert_eq!(derive_node_status(90.0, 10.0), NodeStatus::Degraded);
        assert_eq!(derive_node_status(10.0, 90.0), NodeStatus::Degraded);
        assert_eq!(derive_node_status(10.0, 10.0), NodeStatus::Healthy);
        let _ = EngineCore::walk_node(&node, &mut rng, Scenario::Normal);
    }

    #[test]
    fn walk_service_p99_never_drops_below_p50() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut svc = make_service(1.0, 500.0, 500.0);
        for _ in 0..500 {
            svc = EngineCore::walk_service(&svc, &mut rng, Scenario::Normal);
            assert!(svc.latency_p99_ms >= svc.latency_p50_ms);
        }
    }

    #[test]
    fn walk_service_derives_health_from_error_rate() {
        let mut rng = StdRng::seed_from_u64(4);
        let svc = make_service(12.0, 5.0, 20.0);
        let next = EngineCore::walk_service(&svc, &mut rng, Scenario::Normal);
        // error rate stays > 10 with high probability given small amplitude of 0.5;
        // assert on the derive function directly for a deterministic check.
        assert_eq!(derive_service_health(12.0), ServiceHealth::Critical);
        assert_eq!(derive_service_health(6.0), ServiceHealth::Degraded);
        assert_eq!(derive_service_health(1.0), ServiceHealth::Healthy);
        assert!(next.latency_p99_ms >= next.latency_p50_ms);
    }

    #[test]
    fn clamp_speed_enforces_bounds() {
        assert_eq!(EngineCore::clamp_speed(100.0), 10.0);
        assert_eq!(EngineCore::clamp_speed(0.01), 0.1);
        assert_eq!(EngineCore::clamp_speed(2.5), 2.5);
    }

    #[test]
    fn advance_increments_tick_and_advances_sim_time_by_speed() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut state = EngineState::new(vec![make_node(10.0, 10.0)], vec![make_service(1.0, 10.0, 20.0)]);
        state.speed_multiplier = 2.0;
        let next = EngineCore::advance(&state, &mut rng, 100);
        assert_eq!(next.tick_id, 1);
        assert_eq!(next.sim_time_unix_ms, 200);
    }

    #[test]
    fn apply_command_restart_service_resets_health_fields() {
        let svc = make_service(50.0, 900.0, 950.0);
        let svc_id = svc.id;
        let state = EngineState::new(vec![], vec![svc]);
        let (next, event) = EngineCore::apply_command(&state, ActionType::RestartService, svc_id, &serde_json::json!({}));
        let updated = next.services.iter().find(|s| s.id == svc_id).unwrap();
        assert_eq!(updated.health, ServiceHealth::Healthy);
        assert!((updated.error_rate_pct - 0.1).abs() < 1e-9);
        assert_eq!(event.event_type, "service_restarted");
    }

    #[test]
    fn apply_command_scale_down_at_replica_one_is_unchanged_noop() {
        let mut svc = make_service(1.0, 10.0, 20.0);
        svc.replica_count = 1;
        svc.desired_replicas = 1;
        let svc_id = svc.id;
        let state = EngineState::new(vec![], vec![svc]);
        let (next, event) = EngineCore::apply_command(&state, ActionType::ScaleDown, svc_id, &serde_json::json!({}));
        let updated = next.services.iter().find(|s| s.id == svc_id).unwrap();
        assert_eq!(updated.replica_count, 1);
        assert_eq!(event.event_type, "");
    }

    #[test]
    fn apply_command_unknown_target_is_noop_with_empty_event_type() {
        let state = EngineState::new(vec![], vec![make_service(1.0, 10.0, 20.0)]);
        let (next, event) =
            EngineCore::apply_command(&state, ActionType::RestartService, Uuid::new_v4(), &serde_json::json!({}));
        assert_eq!(event.event_type, "");
        assert_eq!(next.services.len(), state.services.len());
    }

    #[test]
    fn apply_command_rebalance_traffic_is_global_despite_target_id() {
        let svc_a = make_service(1.0, 10.0, 20.0);
        let svc_b = make_service(1.0, 10.0, 20.0);
        let untargeted_id = svc_b.id;
        let rps_before = svc_b.rps;
        let state = EngineState::new(vec![], vec![svc_a.clone(), svc_b]);
        // target_id points at svc_a, but both services must be scaled.
        let (next, event) =
            EngineCore::apply_command(&state, ActionType::RebalanceTraffic, svc_a.id, &serde_json::json!({}));
        let b_after = next.services.iter().find(|s| s.id == untargeted_id).unwrap();
        assert!((b_after.rps - rps_before * 0.9).abs() < 1e-9);
        assert_eq!(event.event_type, "traffic_rebalanced");
    }

    #[test]
    fn apply_command_drain_node_sets_offline_and_clears_running_services() {
        let node = make_node(10.0, 10.0);
        let node_id = node.id;
        let state = EngineState::new(vec![node], vec![]);
        let (next, event) = EngineCore::apply_command(&state, ActionType::DrainNode, node_id, &serde_json::json!({}));
        let updated = next.nodes.iter().find(|n| n.id == node_id).unwrap();
        assert_eq!(updated.status, NodeStatus::Offline);
        assert_eq!(updated.running_services, 0);
        assert_eq!(event.event_type, "node_drained");
    }
}
