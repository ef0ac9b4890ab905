//! Initial fleet fixture the engine boots with. Purely illustrative — any
//! shape of nodes/services works, the random walk just needs something to
//! act on.

use microcloud_proto::{Node, NodeStatus, Service, ServiceHealth};
use std::collections::HashMap;
use uuid::Uuid;

const AVAILABILITY_ZONES: [&str; 3] = ["az-1", "az-2", "az-3"];

/// Builds a small fleet: `node_count` nodes, `services_per_node` services on each.
pub fn seed_fleet(node_count: usize, services_per_node: usize) -> (Vec<Node>, Vec<Service>) {
    let mut nodes = Vec::with_capacity(node_count);
    let mut services = Vec::with_capacity(node_count * services_per_node);

    for i in 0..node_count {
        let node_id = Uuid::new_v4();
        nodes.push(Node {
            id: node_id,
            name: format!("node-{i}"),
            status: NodeStatus::Healthy,
            cpu_pct: 20.0,
            mem_pct: 30.0,
            disk_pct: 40.0,
            running_services: services_per_node as u32,
            availability_zone: AVAILABILITY_ZONES[i % AVAILABILITY_ZONES.len()].to_string(),
            labels: HashMap::new(),
        });

        for j in 0..services_per_node {
            services.push(Service {
                id: Uuid::new_v4(),
                name: format!("svc-{i}-{j}"),
                node_id,
                health: ServiceHealth::Healthy,
                rps: 100.0,
                error_rate_pct: 0.5,
                latency_p50_ms: 20.0,
                latency_p99_ms: 60.0,
                replica_count: 2,
                desired_replicas: 2,
            });
        }
    }

    (nodes, services)
}
