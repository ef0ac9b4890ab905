//! Pure detector logic: snapshot flattening, sliding-window breach-ratio
//! evaluation, and hysteresis latch transitions. No I/O, no locks — the
//! async subscriber loop in [`crate::service`] owns the windows map and
//! drives this module one snapshot at a time.

use chrono::{DateTime, Duration, Utc};
use microcloud_proto::{EntityType, Incident, MetricRow, MetricSnapshot, Rule, Severity, Timestamp};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

// ─── Default rule table (§4.2) ────────────────────────────────────────────────

pub fn default_rules() -> Vec<Rule> {
    use microcloud_proto::Operator::Gt;
    vec![
        Rule {
            name: "high_error_rate".into(),
            metric_name: "error_rate_percent".into(),
            operator: Gt,
            threshold: 5.0,
            window_seconds: 30,
            severity: Severity::Warning,
        },
        Rule {
            name: "critical_error_rate".into(),
            metric_name: "error_rate_percent".into(),
            operator: Gt,
            threshold: 10.0,
            window_seconds: 15,
            severity: Severity::Critical,
        },
        Rule {
            name: "high_cpu_usage".into(),
            metric_name: "cpu_usage_percent".into(),
            operator: Gt,
            threshold: 85.0,
            window_seconds: 60,
            severity: Severity::Warning,
        },
        Rule {
            name: "critical_cpu_usage".into(),
            metric_name: "cpu_usage_percent".into(),
            operator: Gt,
            threshold: 95.0,
            window_seconds: 30,
            severity: Severity::Critical,
        },
        Rule {
            name: "high_memory_usage".into(),
            metric_name: "memory_usage_percent".into(),
            operator: Gt,
            threshold: 90.0,
            window_seconds: 60,
            severity: Severity::Warning,
        },
        Rule {
            name: "high_latency".into(),
            metric_name: "latency_p99_ms".into(),
            operator: Gt,
            threshold: 500.0,
            window_seconds: 30,
            severity: Severity::Warning,
        },
    ]
}

// ─── Snapshot flattening ───────────────────────────────────────────────────────

/// Flattens one snapshot's nodes/services into the append-only metric-row
/// batch the Signal Service submits in one insert per snapshot.
pub fn flatten_snapshot(snapshot: &MetricSnapshot) -> Vec<MetricRow> {
    let time: DateTime<Utc> = Utc::now();
    let mut rows = Vec::with_capacity(snapshot.nodes.len() * 3 + snapshot.services.len() * 4);

    for node in &snapshot.nodes {
        for (name, value) in [
            ("cpu_usage_percent", node.cpu_pct),
            ("memory_usage_percent", node.mem_pct),
            ("disk_usage_percent", node.disk_pct),
        ] {
            rows.push(MetricRow {
                time,
                tick_id: snapshot.tick.tick_id,
                node_id: Some(node.id),
                service_id: None,
                metric_name: name.into(),
                metric_value: value,
                labels: HashMap::new(),
            });
        }
    }

    for service in &snapshot.services {
        for (name, value) in [
            ("error_rate_percent", service.error_rate_pct),
            ("latency_p50_ms", service.latency_p50_ms),
            ("latency_p99_ms", service.latency_p99_ms),
            ("rps", service.rps),
        ] {
            rows.push(MetricRow {
                time,
                tick_id: snapshot.tick.tick_id,
                node_id: None,
                service_id: Some(service.id),
                metric_name: name.into(),
                metric_value: value,
                labels: HashMap::new(),
            });
        }
    }

    rows
}

// ─── Sliding window + hysteresis latch ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub entity_type: EntityType,
    pub entity_id: Uuid,
    pub rule_name: String,
}

/// Per-`(entity, rule)` sliding window plus its hysteresis latch.
#[derive(Debug, Default)]
pub struct DetectorWindow {
    samples: VecDeque<(f64, DateTime<Utc>)>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchTransition {
    Raised,
    Cleared,
    Unchanged,
}

pub struct DetectorCore;

impl DetectorCore {
    /// Appends `value`, evicts samples older than `rule.window_seconds`, and
    /// returns the latch transition (if any) this sample produced. Windows
    /// with fewer than 3 samples never fire.
    pub fn evaluate(window: &mut DetectorWindow, rule: &Rule, value: f64, now: DateTime<Utc>) -> LatchTransition {
        window.samples.push_back((value, now));
        let cutoff = now - Duration::seconds(rule.window_seconds);
        while window.samples.front().is_some_and(|(_, t)| *t <= cutoff) {
            window.samples.pop_front();
        }

        if window.samples.len() < 3 {
            return LatchTransition::Unchanged;
        }

        let breach_count = window
            .samples
            .iter()
            .filter(|(v, _)| rule.operator.apply(*v, rule.threshold))
            .count();
        let breach_ratio = breach_count as f64 / window.samples.len() as f64;

        if !window.active && breach_ratio > 0.7 {
            window.active = true;
            LatchTransition::Raised
        } else if window.active && breach_ratio < 0.3 {
            window.active = false;
            LatchTransition::Cleared
        } else {
            LatchTransition::Unchanged
        }
    }

    /// Builds the `Incident` payload raised for a latch transitioning to
    /// active. Title/description format per §4.2.
    pub fn build_incident(
        rule: &Rule,
        entity_type: EntityType,
        entity_id: Uuid,
        value: f64,
        detected_at: Timestamp,
    ) -> Incident {
        let short_id: String = entity_id.to_string().chars().take(8).collect();
        let title = format!("{}: {} on {entity_type} {short_id}", rule.name, rule.metric_name);
        let description = format!(
            "{} {} threshold {} over {}s window, current value {:.2}",
            rule.metric_name,
            rule.operator_word(),
            rule.threshold,
            rule.window_seconds,
            value
        );
        let mut metrics = HashMap::new();
        metrics.insert(rule.metric_name.clone(), value);

        Incident {
            id: Uuid::new_v4(),
            detected_at,
            severity: rule.severity,
            title,
            description,
            source_service: (entity_type == EntityType::Service).then_some(entity_id),
            affected_ids: vec![entity_id],
            rule_name: rule.name.clone(),
            metrics,
            resolved: false,
            resolved_at: None,
        }
    }
}

trait OperatorWord {
    fn operator_word(&self) -> &'static str;
}

impl OperatorWord for Rule {
    fn operator_word(&self) -> &'static str {
        use microcloud_proto::Operator::*;
        match self.operator {
            Gt => "above",
            Gte => "at or above",
            Lt => "below",
            Lte => "at or below",
            Eq => "equal to",
        }
    }
}
