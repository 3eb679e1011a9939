//! Soft rules — consume baselines and fleet z-scores (§4.4). Gated by
//! `sample_count >= soft_rule_min_samples` except `temp_anomaly`, which
//! matters even for freshly enrolled miners.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::json;

use crate::types::{BaselineState, Evidence, FeatureVector, Severity};

pub const SOFT_RULE_CODES: [&str; 5] = [
    "hashrate_degradation",
    "efficiency_degradation",
    "temp_anomaly",
    "fleet_outlier",
    "boards_degrading",
];

pub struct SoftFinding {
    pub issue_code: &'static str,
    pub severity: Severity,
    pub evidence: Evidence,
}

fn evidence(rule_code: &str, description: String, inputs: serde_json::Value) -> Evidence {
    Evidence {
        rule_code: rule_code.to_string(),
        description,
        evaluated_at: Utc::now(),
        inputs,
    }
}

/// `baselines` is keyed by metric_name for this miner only.
pub fn evaluate(
    features: &FeatureVector,
    baselines: &HashMap<String, BaselineState>,
    min_samples: i64,
) -> Vec<SoftFinding> {
    let mut findings = Vec::new();

    if let Some(hr) = baselines.get("hashrate_ratio") {
        if hr.sample_count >= min_samples && hr.z_score() < -2.0 {
            findings.push(SoftFinding {
                issue_code: "hashrate_degradation",
                severity: Severity::P2,
                evidence: evidence(
                    "hashrate_degradation",
                    format!(
                        "hashrate_ratio z_score {:.2} < -2 with {} samples",
                        hr.z_score(),
                        hr.sample_count
                    ),
                    json!({"z_score": hr.z_score(), "sample_count": hr.sample_count, "threshold": -2.0}),
                ),
            });
        }
    }

    if let Some(eff) = baselines.get("efficiency") {
        if eff.sample_count >= min_samples && eff.z_score() > 2.0 {
            findings.push(SoftFinding {
                issue_code: "efficiency_degradation",
                severity: Severity::P2,
                evidence: evidence(
                    "efficiency_degradation",
                    format!(
                        "efficiency z_score {:.2} > 2 with {} samples",
                        eff.z_score(),
                        eff.sample_count
                    ),
                    json!({"z_score": eff.z_score(), "sample_count": eff.sample_count, "threshold": 2.0}),
                ),
            });
        }
    }

    // temp_anomaly is intentionally ungated by sample_count.
    if let Some(temp) = baselines.get("temp_max") {
        if temp.z_score() > 2.5 {
            findings.push(SoftFinding {
                issue_code: "temp_anomaly",
                severity: Severity::P2,
                evidence: evidence(
                    "temp_anomaly",
                    format!("temp_max z_score {:.2} > 2.5", temp.z_score()),
                    json!({"z_score": temp.z_score(), "threshold": 2.5}),
                ),
            });
        }
    }

    if let Some(z) = features.fleet_z_hashrate {
        if z.abs() > 3.0 {
            findings.push(SoftFinding {
                issue_code: "fleet_outlier",
                severity: Severity::P3,
                evidence: evidence(
                    "fleet_outlier",
                    format!("fleet_z_hashrate {z:.2} exceeds |3|"),
                    json!({"fleet_z_hashrate": z, "threshold": 3.0}),
                ),
            });
        }
    }

    if let Some(boards) = baselines.get("boards_ratio") {
        if boards.sample_count >= min_samples && boards.last_residual < -0.1 {
            findings.push(SoftFinding {
                issue_code: "boards_degrading",
                severity: Severity::P3,
                evidence: evidence(
                    "boards_degrading",
                    format!(
                        "boards_ratio residual {:.3} < -0.1 with {} samples",
                        boards.last_residual, boards.sample_count
                    ),
                    json!({"residual": boards.last_residual, "sample_count": boards.sample_count, "threshold": -0.1}),
                ),
            });
        }
    }

    findings
}
