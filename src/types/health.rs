//! Health Object — per-miner summary emitted at cycle end (§3.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Severity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthObject {
    pub site_id: i64,
    pub miner_id: String,
    pub health_state: String,
    pub issues: Vec<String>,
    pub p_fail_24h: f64,
    pub last_seen_ts: DateTime<Utc>,
    pub assessed_at: DateTime<Utc>,
}

impl HealthObject {
    /// `health_state` is the worst severity among active issues (`P0` >
    /// `P1` > `P2` > `P3` > `OK`), with a p_fail_24h override that can
    /// only make the state worse, never better.
    pub fn compute_health_state(worst_active: Option<Severity>, p_fail_24h: f64) -> String {
        let mut state = worst_active
            .map(|s| s.as_str().to_string())
            .unwrap_or_else(|| "OK".to_string());

        let floor = if p_fail_24h > 0.8 {
            Some(Severity::P1)
        } else if p_fail_24h > 0.5 {
            Some(Severity::P2)
        } else {
            None
        };

        if let Some(floor) = floor {
            let current_rank = worst_active.map(|s| s as i32).unwrap_or(-1);
            if (floor as i32) > current_rank {
                state = floor.as_str().to_string();
            }
        }

        state
    }
}
