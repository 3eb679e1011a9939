//! Hard rules — fire off raw current-cycle features, no history required
//! (§4.4).

use chrono::Utc;
use serde_json::json;

use crate::types::{Evidence, FeatureVector, Severity};

pub const HARD_RULE_CODES: [&str; 6] = [
    "overheat_crit",
    "offline",
    "hashrate_zero",
    "boards_dead",
    "fan_zero",
    "overheat_warn",
];

pub struct HardFinding {
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

/// Evaluate every hard rule for one miner's feature vector.
pub fn evaluate(features: &FeatureVector) -> Vec<HardFinding> {
    let mut findings = Vec::new();

    if let Some(temp) = features.temp_max {
        if temp >= 85.0 {
            findings.push(HardFinding {
                issue_code: "overheat_crit",
                severity: Severity::P0,
                evidence: evidence(
                    "overheat_crit",
                    format!("temperature {temp:.1} >= 85 critical threshold"),
                    json!({"temp_max": temp, "threshold": 85.0}),
                ),
            });
        } else if (75.0..85.0).contains(&temp) {
            findings.push(HardFinding {
                issue_code: "overheat_warn",
                severity: Severity::P1,
                evidence: evidence(
                    "overheat_warn",
                    format!("temperature {temp:.1} in warning band [75, 85)"),
                    json!({"temp_max": temp, "low": 75.0, "high": 85.0}),
                ),
            });
        }
    }

    if !features.is_online {
        findings.push(HardFinding {
            issue_code: "offline",
            severity: Severity::P0,
            evidence: evidence(
                "offline",
                "miner reported offline".to_string(),
                json!({"is_online": false}),
            ),
        });
    }

    if features.is_online {
        if let Some(ratio) = features.hashrate_ratio {
            if ratio <= 0.01 {
                findings.push(HardFinding {
                    issue_code: "hashrate_zero",
                    severity: Severity::P1,
                    evidence: evidence(
                        "hashrate_zero",
                        format!("hashrate_ratio {ratio:.4} <= 0.01 while online"),
                        json!({"hashrate_ratio": ratio, "threshold": 0.01}),
                    ),
                });
            }
        }

        if let Some(fan_min) = features.fan_speed_min {
            if fan_min == 0 {
                findings.push(HardFinding {
                    issue_code: "fan_zero",
                    severity: Severity::P1,
                    evidence: evidence(
                        "fan_zero",
                        "minimum fan speed is 0 while online".to_string(),
                        json!({"fan_speed_min": fan_min}),
                    ),
                });
            }
        }
    }

    if let Some(ratio) = features.boards_ratio {
        if ratio <= 0.5 {
            findings.push(HardFinding {
                issue_code: "boards_dead",
                severity: Severity::P1,
                evidence: evidence(
                    "boards_dead",
                    format!("boards_ratio {ratio:.4} <= 0.5"),
                    json!({"boards_ratio": ratio, "threshold": 0.5}),
                ),
            });
        }
    }

    findings
}
