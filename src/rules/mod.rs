//! RulesEngine — fixed, versioned hard/soft rule taxonomy (§4.4).

pub mod hard;
pub mod soft;

use std::collections::HashMap;

use crate::config::Settings;
use crate::types::{BaselineState, Evidence, FeatureVector, Severity};

/// The complete issue-code taxonomy, hard rules first then soft.
pub fn all_issue_codes() -> Vec<&'static str> {
    hard::HARD_RULE_CODES
        .iter()
        .chain(soft::SOFT_RULE_CODES.iter())
        .copied()
        .collect()
}

pub struct Detection {
    pub issue_code: &'static str,
    pub severity: Severity,
    pub evidence: Evidence,
}

pub struct RuleEvaluation {
    pub detections: Vec<Detection>,
    /// Every taxonomy code that did *not* fire this cycle — the
    /// orchestrator turns these into healthy signals for the EventEngine.
    pub healthy_codes: Vec<&'static str>,
}

pub struct RulesEngine {
    soft_rule_min_samples: i64,
}

impl RulesEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            soft_rule_min_samples: settings.soft_rule_min_samples,
        }
    }

    /// `evaluateAll` — runs hard then soft rules for one miner and splits
    /// the taxonomy into fired detections vs. healthy codes.
    pub fn evaluate_all(
        &self,
        features: &FeatureVector,
        baselines: &HashMap<String, BaselineState>,
    ) -> RuleEvaluation {
        let mut detections = Vec::new();

        for finding in hard::evaluate(features) {
            detections.push(Detection {
                issue_code: finding.issue_code,
                severity: finding.severity,
                evidence: finding.evidence,
            });
        }

        for finding in soft::evaluate(features, baselines, self.soft_rule_min_samples) {
            detections.push(Detection {
                issue_code: finding.issue_code,
                severity: finding.severity,
                evidence: finding.evidence,
            });
        }

        let fired: Vec<&str> = detections.iter().map(|d| d.issue_code).collect();
        let healthy_codes = all_issue_codes()
            .into_iter()
            .filter(|code| !fired.contains(code))
            .collect();

        RuleEvaluation {
            detections,
            healthy_codes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            database_url: "postgres://unused".into(),
            debounce_threshold: 2,
            resolve_threshold: 3,
            cooldown_hours: 24,
            evidence_max: 100,
            ewma_span: 12.0,
            soft_rule_min_samples: 6,
            fleet_cache_ttl_seconds: 300,
            max_notifications_per_cycle: 20,
            max_tickets_per_cycle: 5,
            p2_duration_gate_minutes: 30,
            p2_pfail_ticket_threshold: 0.5,
            min_train_samples: 50,
            min_positive_labels: 5,
            ml_retrain_interval_cycles: 288,
            scheduler_lock_timeout_seconds: 300,
            scheduler_heartbeat_seconds: 60,
            cycle_interval_seconds: 300,
            holder_id: "test".into(),
        }
    }

    fn feature() -> FeatureVector {
        FeatureVector {
            miner_id: "m1".into(),
            site_id: 1,
            model: "S19".into(),
            firmware: "v1".into(),
            is_online: true,
            hashrate_ratio: Some(1.0),
            boards_ratio: Some(1.0),
            temp_max: Some(60.0),
            efficiency: Some(30.0),
            fan_speed_min: Some(3000),
            fleet_z_hashrate: None,
            inferred_mode: "unknown".into(),
        }
    }

    #[test]
    fn cold_start_guard_blocks_soft_rules_except_temp_anomaly() {
        let engine = RulesEngine::new(&settings());
        let mut baselines = HashMap::new();
        let mut hr = baseline_row("hashrate_ratio");
        hr.sample_count = 2;
        hr.ewma_variance = 1.0;
        hr.last_residual = -3.0; // z_score = -3
        baselines.insert("hashrate_ratio".to_string(), hr);

        let mut temp = baseline_row("temp_max");
        temp.sample_count = 1;
        temp.ewma_variance = 1.0;
        temp.last_residual = 3.0; // z_score = 3, should still fire
        baselines.insert("temp_max".to_string(), temp);

        let result = engine.evaluate_all(&feature(), &baselines);
        let codes: Vec<&str> = result.detections.iter().map(|d| d.issue_code).collect();
        assert!(!codes.contains(&"hashrate_degradation"));
        assert!(codes.contains(&"temp_anomaly"));
    }

    fn baseline_row(metric_name: &str) -> BaselineState {
        BaselineState {
            miner_id: "m1".into(),
            site_id: 1,
            metric_name: metric_name.into(),
            ewma_value: 0.0,
            ewma_variance: 0.0,
            sample_count: 0,
            last_raw_value: 0.0,
            last_residual: 0.0,
            inferred_mode: None,
            mode_confidence: None,
            updated_at: chrono::Utc::now(),
        }
    }
}
