//! Async subscriber loop around [`crate::core::DetectorCore`]: holds the
//! detector lock across one snapshot's rule evaluation, persists metrics in
//! batch, and raises incidents on `ops.incidents`.

use crate::core::{DetectorCore, DetectorWindow, LatchTransition, WindowKey, default_rules, flatten_snapshot};
use crate::error::SignalError;
use microcloud_bus::{Bus, Subject};
use microcloud_proto::{EntityType, MetricSnapshot, Rule};
use microcloud_repo::{IncidentsRepository, MetricsRepository};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

fn rule_entity_type(rule: &Rule) -> EntityType {
    match rule.metric_name.as_str() {
        "cpu_usage_percent" | "memory_usage_percent" | "disk_usage_percent" => EntityType::Node,
        _ => EntityType::Service,
    }
}

pub struct SignalService {
    windows: Mutex<HashMap<WindowKey, DetectorWindow>>,
    rules: Vec<Rule>,
    bus: Arc<dyn Bus>,
    metrics_repo: Arc<dyn MetricsRepository>,
    incidents_repo: Arc<dyn IncidentsRepository>,
}

impl SignalService {
    pub fn new(
        bus: Arc<dyn Bus>,
        metrics_repo: Arc<dyn MetricsRepository>,
        incidents_repo: Arc<dyn IncidentsRepository>,
    ) -> Arc<Self> {
        Arc::new(Self {
            windows: Mutex::new(HashMap::new()),
            rules: default_rules(),
            bus,
            metrics_repo,
            incidents_repo,
        })
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut sub = match self.bus.subscribe(Subject::SimMetrics).await {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "failed to subscribe to sim.metrics");
                return;
            }
        };

        loop {
            tokio::select! {
                res = microcloud_bus::recv_typed::<MetricSnapshot>(&mut sub) => {
                    match res {
                        Ok(snapshot) => self.handle_snapshot(snapshot).await,
                        Err(e) => warn!(error = %e, "nacking malformed sim.metrics message"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("signal service exiting on shutdown");
                        break;
                    }
                }
            }
        }
    }

    async fn handle_snapshot(&self, snapshot: MetricSnapshot) {
        let rows = flatten_snapshot(&snapshot);
        if let Err(e) = self.metrics_repo.insert_batch(rows).await {
            // Persistence failures during detect are logged, not fatal — the
            // published event remains authoritative (§7b).
            warn!(error = %e, "failed to persist metric batch");
        }

        let now = chrono::Utc::now();

        // Detector lock held across this snapshot's full rule evaluation (§5c).
        let mut windows = self.windows.lock();
        for rule in &self.rules {
            match rule_entity_type(rule) {
                EntityType::Node => {
                    for node in &snapshot.nodes {
                        let Some(value) = node_metric_value(node, &rule.metric_name) else {
                            continue;
                        };
                        self.evaluate_one(&mut windows, rule, EntityType::Node, node.id, value, now, snapshot.tick)
                            .await;
                    }
                }
                EntityType::Service => {
                    for service in &snapshot.services {
                        let Some(value) = service_metric_value(service, &rule.metric_name) else {
                            continue;
                        };
                        self.evaluate_one(
                            &mut windows,
                            rule,
                            EntityType::Service,
                            service.id,
                            value,
                            now,
                            snapshot.tick,
                        )
                        .await;
                    }
                }
            }
        }
    }

    async fn evaluate_one(
        &self,
        windows: &mut HashMap<WindowKey, DetectorWindow>,
        rule: &Rule,
        entity_type: EntityType,
        entity_id: uuid::Uuid,
        value: f64,
        now: chrono::DateTime<chrono::Utc>,
        tick: microcloud_proto::Timestamp,
    ) {
        let key = WindowKey {
            entity_type,
            entity_id,
            rule_name: rule.name.clone(),
        };
        let window = windows.entry(key).or_default();
        let transition = DetectorCore::evaluate(window, rule, value, now);

        match transition {
            LatchTransition::Raised => {
                let incident = DetectorCore::build_incident(rule, entity_type, entity_id, value, tick);
                info!(rule = %rule.name, entity_type = %entity_type, entity_id = %entity_id, "incident raised");
                if let Err(e) = self.incidents_repo.insert(incident.clone()).await {
                    warn!(error = %e, "failed to persist incident");
                }
                if let Err(e) = microcloud_bus::publish(self.bus.as_ref(), Subject::OpsIncidents, &incident).await {
                    tracing::error!(error = %e, "failed to publish incident");
                }
            }
            LatchTransition::Cleared => {
                // Resolution is local-only: no event published, no persisted
                // row updated.
                debug!(rule = %rule.name, entity_type = %entity_type, entity_id = %entity_id, "incident latch cleared");
            }
            LatchTransition::Unchanged => {}
        }
    }
}

fn node_metric_value(node: &microcloud_proto::Node, metric_name: &str) -> Option<f64> {
    match metric_name {
        "cpu_usage_percent" => Some(node.cpu_pct),
        "memory_usage_percent" => Some(node.mem_pct),
        "disk_usage_percent" => Some(node.disk_pct),
        _ => None,
    }
}

fn service_metric_value(service: &microcloud_proto::Service, metric_name: &str) -> Option<f64> {
    match metric_name {
        "error_rate_percent" => Some(service.error_rate_pct),
        "latency_p50_ms" => Some(service.latency_p50_ms),
        "latency_p99_ms" => Some(service.latency_p99_ms),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_bus::InProcessBus;
    use microcloud_proto::{Node, NodeStatus, Service, ServiceHealth, Timestamp};
    use microcloud_repo::{InMemoryIncidentsRepository, InMemoryMetricsRepository};
    use std::collections::HashMap as StdHashMap;

    fn snapshot_with_service_error_rate(tick_id: i64, error_rate: f64) -> MetricSnapshot {
        MetricSnapshot {
            tick: Timestamp {
                tick_id,
                wall_time_unix_ms: 0,
                sim_time_unix_ms: 0,
            },
            nodes: vec![],
            services: vec![Service {
                id: uuid::Uuid::new_v4(),
                name: "svc".into(),
                node_id: uuid::Uuid::new_v4(),
                health: ServiceHealth::Critical,
                rps: 10.0,
                error_rate_pct: error_rate,
                latency_p50_ms: 10.0,
                latency_p99_ms: 20.0,
                replica_count: 1,
                desired_replicas: 1,
            }],
        }
    }

    #[tokio::test]
    async fn sustained_breach_raises_incident_on_bus() {
        let bus = Arc::new(InProcessBus::default());
        let metrics = Arc::new(InMemoryMetricsRepository::new());
        let incidents = Arc::new(InMemoryIncidentsRepository::new());
        let signal = SignalService::new(bus.clone(), metrics, incidents.clone());

        let mut sub = bus.subscribe(Subject::OpsIncidents).await.unwrap();

        let service_id;
        {
            let snap = snapshot_with_service_error_rate(1, 12.0);
            service_id = snap.services[0].id;
            for tick in 1..=4 {
                let mut snap_tick = snap.clone();
                snap_tick.tick.tick_id = tick;
                signal.handle_snapshot(snap_tick).await;
            }
        }

        // error_rate=12.0 breaches both high_error_rate (>5) and
        // critical_error_rate (>10) at once; both latch and publish, in
        // rule-table order. Drain both rather than assume which comes first.
        let first: microcloud_proto::Incident = microcloud_bus::recv_typed(&mut sub).await.unwrap();
        let second: microcloud_proto::Incident = microcloud_bus::recv_typed(&mut sub).await.unwrap();
        let rule_names: Vec<&str> = vec![first.rule_name.as_str(), second.rule_name.as_str()];
        assert!(rule_names.contains(&"critical_error_rate"));
        assert!(rule_names.contains(&"high_error_rate"));
        assert_eq!(first.affected_ids, vec![service_id]);
        assert_eq!(incidents.get(first.id).await.unwrap().unwrap().id, first.id);
    }

    #[tokio::test]
    async fn node_rule_matches_only_node_metrics() {
        let bus = Arc::new(InProcessBus::default());
        let metrics = Arc::new(InMemoryMetricsRepository::new());
        let incidents = Arc::new(InMemoryIncidentsRepository::new());
        let signal = SignalService::new(bus.clone(), metrics, incidents);

        let mut sub = bus.subscribe(Subject::OpsIncidents).await.unwrap();
        let node = Node {
            id: uuid::Uuid::new_v4(),
            name: "n".into(),
            status: NodeStatus::Degraded,
            cpu_pct: 97.0,
            mem_pct: 10.0,
            disk_pct: 10.0,
            running_services: 1,
            availability_zone: "az-1".into(),
            labels: StdHashMap::new(),
        };
        for tick in 1..=4 {
            let snap = MetricSnapshot {
                tick: Timestamp {
                    tick_id: tick,
                    wall_time_unix_ms: 0,
                    sim_time_unix_ms: 0,
                },
                nodes: vec![node.clone()],
                services: vec![],
            };
            signal.handle_snapshot(snap).await;
        }

        // cpu_pct=97.0 breaches both high_cpu_usage (>85) and
        // critical_cpu_usage (>95); drain both rather than assume order.
        let first: microcloud_proto::Incident = microcloud_bus::recv_typed(&mut sub).await.unwrap();
        let second: microcloud_proto::Incident = microcloud_bus::recv_typed(&mut sub).await.unwrap();
        let rule_names: Vec<&str> = vec![first.rule_name.as_str(), second.rule_name.as_str()];
        assert!(rule_names.contains(&"critical_cpu_usage"));
        assert!(rule_names.contains(&"high_cpu_usage"));
    }
}
