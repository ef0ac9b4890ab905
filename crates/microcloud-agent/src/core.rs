//! Pure decider logic: the rule→action decision table and the
//! cooldown-guarded proposal decision. No I/O — the async subscriber loop in
//! [`crate::service`] owns the cooldown map and drives this module once per
//! incident, holding the decider lock across decide+publish (§5c).

use chrono::{DateTime, Duration, Utc};
use microcloud_proto::{Action, ActionStatus, ActionType, Incident, Severity};
use std::collections::HashMap;
use uuid::Uuid;

pub const DEFAULT_COOLDOWN_DURATION_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub rule_name: String,
    pub target_id: Uuid,
}

#[derive(Debug)]
pub enum DeciderOutcome {
    Propose(Box<Action>),
    Suppressed { key: CooldownKey, remaining: Duration },
    Skipped { reason: String },
}

/// Rule→action decision table (§4.3). Returns `None` for rules with no
/// mapped action ("(anything else) -> skip").
fn decision_for(rule_name: &str, severity: Severity) -> Option<(ActionType, String)> {
    match rule_name {
        "high_error_rate" | "critical_error_rate" => Some((
            ActionType::RestartService,
            format!("auto-restart / err% ({rule_name}, {severity})"),
        )),
        "high_cpu_usage" if severity == Severity::Warning => {
            Some((ActionType::RebalanceTraffic, "rebalance / cpu%".to_string()))
        }
        "critical_cpu_usage" if severity == Severity::Critical => {
            Some((ActionType::ScaleUp, "scale / cpu%".to_string()))
        }
        "high_memory_usage" => Some((ActionType::RestartService, "restart / mem%".to_string())),
        "high_latency" => Some((ActionType::ScaleUp, "scale / p99 ms".to_string())),
        _ => None,
    }
}

pub struct DeciderCore;

impl DeciderCore {
    /// Decide at most one proposed action for `incident`, honoring the
    /// per-`(rule_name, target)` cooldown. Mutates `cooldowns` only when a
    /// new proposal is actually emitted.
    ///
    /// Guards `incident.affected_ids` against emptiness before indexing
    /// `[0]` — an empty list is `Skipped`, never a panic.
    pub fn decide(
        incident: &Incident,
        cooldowns: &mut HashMap<CooldownKey, DateTime<Utc>>,
        cooldown_duration: Duration,
        now: DateTime<Utc>,
    ) -> DeciderOutcome {
        let Some(&target_id) = incident.affected_ids.first() else {
            return DeciderOutcome::Skipped {
                reason: "incident has empty affected_ids".to_string(),
            };
        };

        let Some((action_type, reason)) = decision_for(&incident.rule_name, incident.severity) else {
            return DeciderOutcome::Skipped {
                reason: format!("no decision mapped for rule {}", incident.rule_name),
            };
        };

        let key = CooldownKey {
            rule_name: incident.rule_name.clone(),
            target_id,
        };

        if let Some(&last) = cooldowns.get(&key) {
            let elapsed = now - last;
            if elapsed < cooldown_duration {
                return DeciderOutcome::Suppressed {
                    remaining: cooldown_duration - elapsed,
                    key,
                };
            }
        }

        cooldowns.insert(key, now);

        let action = Action {
            id: Uuid::new_v4(),
            incident_id: incident.id,
            proposed_at_tick: incident.detected_at.tick_id,
            action_type,
            target_id,
            status: ActionStatus::Pending,
            reason,
            parameters: serde_json::json!({}),
            created_at: now,
            executed_at: None,
            result_message: None,
        };
        DeciderOutcome::Propose(Box::new(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microcloud_proto::Timestamp;
    use std::collections::HashMap as StdHashMap;

    fn incident(rule_name: &str, severity: Severity, affected: Vec<Uuid>) -> Incident {
        Incident {
            id: Uuid::new_v4(),
            detected_at: Timestamp {
                tick_id: 3,
                wall_time_unix_ms: 0,
                sim_time_unix_ms: 0,
            },
            severity,
            title: "t".into(),
            description: "d".into(),
            source_service: None,
            affected_ids: affected,
            rule_name: rule_name.to_string(),
            metrics: StdHashMap::new(),
            resolved: false,
            resolved_at: None,
        }
    }

    #[test]
    fn proposes_restart_for_error_rate_rules() {
        let target = Uuid::new_v4();
        let inc = incident("critical_error_rate", Severity::Critical, vec![target]);
        let mut cooldowns = HashMap::new();
        let outcome = DeciderCore::decide(&inc, &mut cooldowns, Duration::seconds(30), Utc::now());
        match outcome {
            DeciderOutcome::Propose(action) => {
                assert_eq!(action.action_type, ActionType::RestartService);
                assert_eq!(action.target_id, target);
                assert_eq!(action.status, ActionStatus::Pending);
                assert_eq!(action.proposed_at_tick, inc.detected_at.tick_id);
            }
            other => panic!("expected Propose, got {other:?}"),
        }
    }

    #[test]
    fn second_incident_within_cooldown_is_suppressed() {
        let target = Uuid::new_v4();
        let mut cooldowns = HashMap::new();
        let now = Utc::now();
        let inc1 = incident("high_error_rate", Severity::Warning, vec![target]);
        let inc2 = incident("high_error_rate", Severity::Warning, vec![target]);

        let first = DeciderCore::decide(&inc1, &mut cooldowns, Duration::seconds(30), now);
        assert!(matches!(first, DeciderOutcome::Propose(_)));

        let second = DeciderCore::decide(&inc2, &mut cooldowns, Duration::seconds(30), now + Duration::seconds(5));
        assert!(matches!(second, DeciderOutcome::Suppressed { .. }));
    }

    #[test]
    fn proposal_allowed_again_after_cooldown_elapses() {
        let target = Uuid::new_v4();
        let mut cooldowns = HashMap::new();
        let now = Utc::now();
        let inc = incident("high_error_rate", Severity::Warning, vec![target]);

        let first = DeciderCore::decide(&inc, &mut cooldowns, Duration::seconds(30), now);
        assert!(matches!(first, DeciderOutcome::Propose(_)));

        let second = DeciderCore::decide(&inc, &mut cooldowns, Duration::seconds(30), now + Duration::seconds(31));
        assert!(matches!(second, DeciderOutcome::Propose(_)));
    }

    #[test]
    fn empty_affected_ids_is_skipped_not_a_panic() {
        let inc = incident("high_error_rate", Severity::Warning, vec![]);
        let mut cooldowns = HashMap::new();
        let outcome = DeciderCore::decide(&inc, &mut cooldowns, Duration::seconds(30), Utc::now());
        assert!(matches!(outcome, DeciderOutcome::Skipped { .. }));
    }

    #[test]
    fn unmapped_rule_is_skipped() {
        let inc = incident("unknown_rule", Severity::Info, vec![Uuid::new_v4()]);
        let mut cooldowns = HashMap::new();
        let outcome = DeciderCore::decide(&inc, &mut cooldowns, Duration::seconds(30), Utc::now());
        assert!(matches!(outcome, DeciderOutcome::Skipped { .. }));
    }

    #[test]
    fn high_cpu_usage_only_maps_at_warning_severity() {
        let inc_warning = incident("high_cpu_usage", Severity::Warning, vec![Uuid::new_v4()]);
        let mut cooldowns = HashMap::new();
        let outcome = DeciderCore::decide(&inc_warning, &mut cooldowns, Duration::seconds(30), Utc::now());
        assert!(matches!(outcome, DeciderOutcome::Propose(_)));

        let inc_critical = incident("high_cpu_usage", Severity::Critical, vec![Uuid::new_v4()]);
        let mut cooldowns2 = HashMap::new();
        let outcome2 = DeciderCore::decide(&inc_critical, &mut cooldowns2, Duration::seconds(30), Utc::now());
        assert!(matches!(outcome2, DeciderOutcome::Skipped { .. }));
    }
}
