//! PolicyEngine — budgeted dispatch from engine results to the outbox
//! (§4.6). Turns a cycle's worth of `EventResult`s into notifications and
//! tickets, capped per site per cycle, never silently dropping a P0/P1.

pub mod repo;

use std::collections::HashMap;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::PolicyError;
use crate::types::{
    EventAction, NotificationPayload, OutboxKind, Prediction, ProblemEvent, Severity, TicketPayload,
};

/// One miner's engine output for this cycle, as produced by step 8/9 of
/// the orchestrator cycle.
pub struct EngineResult {
    pub action: EventAction,
    pub event: ProblemEvent,
    pub prediction: Option<Prediction>,
}

#[derive(Debug, Default)]
pub struct DispatchTally {
    pub notifications_sent: usize,
    pub tickets_sent: usize,
    pub notifications_suppressed: usize,
    pub tickets_suppressed: usize,
}

pub struct PolicyEngine {
    pool: sqlx::PgPool,
    max_notifications: usize,
    max_tickets: usize,
    duration_gate_minutes: i64,
    pfail_ticket_threshold: f64,
}

impl PolicyEngine {
    pub fn new(pool: sqlx::PgPool, settings: &Settings) -> Self {
        Self {
            pool,
            max_notifications: settings.max_notifications_per_cycle,
            max_tickets: settings.max_tickets_per_cycle,
            duration_gate_minutes: settings.p2_duration_gate_minutes,
            pfail_ticket_threshold: settings.p2_pfail_ticket_threshold,
        }
    }

    fn top_k(site_miner_count: i64) -> usize {
        let pct = (site_miner_count as f64 * 0.05).floor() as i64;
        pct.max(3) as usize
    }

    /// `evaluateBatch` — group results by site, apply the P2 Top-K and
    /// duration gates, enforce per-site budgets, and write the outbox.
    pub async fn evaluate_batch(
        &self,
        results: Vec<EngineResult>,
        site_miner_counts: &HashMap<i64, i64>,
    ) -> DispatchTally {
        let mut tally = DispatchTally::default();
        let now = Utc::now();

        let mut by_site: HashMap<i64, Vec<EngineResult>> = HashMap::new();
        for result in results {
            if !result.action.is_dispatch_eligible() {
                continue;
            }
            by_site.entry(result.event.site_id).or_default().push(result);
        }

        for (site_id, site_results) in by_site {
            let miner_count = site_miner_counts.get(&site_id).copied().unwrap_or(0);
            self.dispatch_site(site_results, miner_count, now, &mut tally)
                .await;
        }

        tally
    }

    async fn dispatch_site(
        &self,
        results: Vec<EngineResult>,
        miner_count: i64,
        now: chrono::DateTime<Utc>,
        tally: &mut DispatchTally,
    ) {
        let k = Self::top_k(miner_count);

        let mut p0_p1 = Vec::new();
        let mut p2_candidates = Vec::new();

        for result in &results {
            match result.event.severity() {
                Severity::P0 | Severity::P1 => p0_p1.push(result),
                Severity::P2 => p2_candidates.push(result),
                Severity::P3 => {}
            }
        }

        p2_candidates.sort_by(|a, b| {
            let pa = a.prediction.as_ref().map(|p| p.p_fail_24h).unwrap_or(0.0);
            let pb = b.prediction.as_ref().map(|p| p.p_fail_24h).unwrap_or(0.0);
            pb.partial_cmp(&pa).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut notify_queue: Vec<&EngineResult> = Vec::new();
        let mut ticket_queue: Vec<&EngineResult> = Vec::new();

        for result in &p0_p1 {
            notify_queue.push(result);
            ticket_queue.push(result);
        }

        for (idx, result) in p2_candidates.iter().enumerate() {
            let open_minutes = (now - result.event.start_ts).num_minutes();
            let in_top_k = idx < k;
            let duration_gated = open_minutes > self.duration_gate_minutes;

            if in_top_k || duration_gated {
                notify_queue.push(result);
            }

            let pfail = result.prediction.as_ref().map(|p| p.p_fail_24h).unwrap_or(0.0);
            if pfail > self.pfail_ticket_threshold && duration_gated {
                ticket_queue.push(result);
            }
        }

        for (idx, result) in notify_queue.into_iter().enumerate() {
            if idx >= self.max_notifications {
                tally.notifications_suppressed += 1;
                continue;
            }
            if self.send_notification(result, now).await.is_ok() {
                tally.notifications_sent += 1;
            } else {
                tally.notifications_suppressed += 1;
            }
        }

        for (idx, result) in ticket_queue.into_iter().enumerate() {
            if idx >= self.max_tickets {
                tally.tickets_suppressed += 1;
                continue;
            }
            if self.send_ticket(result, now).await.is_ok() {
                tally.tickets_sent += 1;
            } else {
                tally.tickets_suppressed += 1;
            }
        }
    }

    async fn send_notification(
        &self,
        result: &EngineResult,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        let payload = self.build_notification(result, now);
        let json = serde_json::to_value(&payload).unwrap_or_else(|_| serde_json::json!({}));
        match repo::insert(&self.pool, Uuid::new_v4(), OutboxKind::Notification, json, now).await {
            Ok(()) => Ok(()),
            Err(source) => {
                warn!(event_id = %result.event.id, error = %source, "notification outbox unavailable, logging fallback");
                Err(PolicyError::OutboxUnavailable { source })
            }
        }
    }

    async fn send_ticket(&self, result: &EngineResult, now: chrono::DateTime<Utc>) -> Result<(), PolicyError> {
        let notification = self.build_notification(result, now);
        let pfail = result.prediction.as_ref().map(|p| p.p_fail_24h).unwrap_or(0.0);
        let subject = format!(
            "[{}] {} on miner {}",
            result.event.severity(),
            result.event.issue_code,
            result.event.miner_id
        );
        let description = format!(
            "Issue {} first detected at {} (p_fail_24h={:.2}).",
            result.event.issue_code, result.event.start_ts, pfail
        );
        let payload = TicketPayload {
            notification,
            subject,
            description,
        };
        let json = serde_json::to_value(&payload).unwrap_or_else(|_| serde_json::json!({}));
        match repo::insert(&self.pool, Uuid::new_v4(), OutboxKind::Ticket, json, now).await {
            Ok(()) => Ok(()),
            Err(source) => {
                warn!(event_id = %result.event.id, error = %source, "ticket outbox unavailable, logging fallback");
                Err(PolicyError::OutboxUnavailable { source })
            }
        }
    }

    fn build_notification(&self, result: &EngineResult, now: chrono::DateTime<Utc>) -> NotificationPayload {
        NotificationPayload {
            event_id: result.event.id,
            site_id: result.event.site_id,
            miner_id: result.event.miner_id.clone(),
            issue_code: result.event.issue_code.clone(),
            severity: result.event.severity().as_str().to_string(),
            reason: result.action.as_str().to_string(),
            priority: match result.event.severity() {
                Severity::P0 => 0,
                Severity::P1 => 1,
                Severity::P2 => 2,
                Severity::P3 => 3,
            },
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_k_enforces_floor_of_three() {
        assert_eq!(PolicyEngine::top_k(10), 3);
        assert_eq!(PolicyEngine::top_k(20), 3);
        assert_eq!(PolicyEngine::top_k(100), 5);
        assert_eq!(PolicyEngine::top_k(1000), 50);
    }
}
