//! EventEngine — lifecycle, dedup, debounce (§4.5). Heart of the system:
//! for a given `dedup_key` there is at most one row with
//! `status ∈ {ack, open, in_progress}`.

pub mod repo;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::config::Settings;
use crate::error::EventError;
use crate::types::{EventAction, EventResult, EventStatus, Evidence, ProblemEvent, Severity};

pub struct EventEngine {
    pool: PgPool,
    debounce_threshold: i32,
    resolve_threshold: i32,
    cooldown_hours: i64,
    evidence_max: usize,
}

impl EventEngine {
    pub fn new(pool: PgPool, settings: &Settings) -> Self {
        Self {
            pool,
            debounce_threshold: settings.debounce_threshold,
            resolve_threshold: settings.resolve_threshold,
            cooldown_hours: settings.cooldown_hours,
            evidence_max: settings.evidence_max,
        }
    }

    fn append_evidence(&self, existing: &serde_json::Value, new_item: &Evidence) -> serde_json::Value {
        let mut list: Vec<Evidence> = existing
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        list.push(new_item.clone());
        if list.len() > self.evidence_max {
            let drop = list.len() - self.evidence_max;
            list.drain(0..drop);
        }
        serde_json::to_value(list).unwrap_or_else(|_| serde_json::json!([]))
    }

    /// `processDetection` — see module docs and §4.5 for the full
    /// decision table.
    pub async fn process_detection(
        &self,
        site_id: i64,
        miner_id: &str,
        issue_code: &str,
        severity: Severity,
        evidence: Evidence,
        peer_metrics: Option<serde_json::Value>,
        ml_data: Option<serde_json::Value>,
    ) -> Result<EventResult, EventError> {
        let now = Utc::now();
        let dedup_key = ProblemEvent::dedup_key_for(site_id, miner_id, issue_code);

        let suppressed = repo::miner_is_suppressed(&self.pool, miner_id, now)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: dedup_key.clone(),
                source,
            })?;
        if suppressed {
            return Ok(EventResult {
                action: EventAction::Suppressed,
                event: None,
                reason: None,
            });
        }

        if let Some(active) = repo::get_active(&self.pool, &dedup_key)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: dedup_key.clone(),
                source,
            })?
        {
            return self
                .apply_to_active(active, severity, evidence, peer_metrics, ml_data, now)
                .await;
        }

        let cutoff = now - Duration::hours(self.cooldown_hours);
        if let Some(resolved) = repo::get_resolved_within_cooldown(&self.pool, &dedup_key, cutoff)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: dedup_key.clone(),
                source,
            })?
        {
            return self
                .apply_to_resolved_within_cooldown(resolved, severity, evidence, peer_metrics, ml_data, now)
                .await;
        }

        self.create_new(site_id, miner_id, issue_code, &dedup_key, severity, evidence, peer_metrics, ml_data, now)
            .await
    }

    async fn apply_to_active(
        &self,
        active: ProblemEvent,
        severity: Severity,
        evidence: Evidence,
        peer_metrics: Option<serde_json::Value>,
        ml_data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<EventResult, EventError> {
        let dedup_key = active.dedup_key.clone();
        let consecutive_fail = active.consecutive_fail + 1;
        let evidence_json = self.append_evidence(&active.evidence_json, &evidence);

        let escalate = active.would_escalate(severity);
        let new_severity = if escalate { severity } else { active.severity() };

        let new_status = match active.status() {
            EventStatus::Ack if consecutive_fail >= self.debounce_threshold => EventStatus::Open,
            other => other,
        };

        let updated = repo::update_active(
            &self.pool,
            active.id,
            new_severity.as_str(),
            new_status.as_str(),
            consecutive_fail,
            0,
            now,
            evidence_json,
            peer_metrics,
            ml_data,
        )
        .await
        .map_err(|source| EventError::Database {
            dedup_key: dedup_key.clone(),
            source,
        })?;

        let action = if escalate {
            EventAction::Escalated
        } else {
            EventAction::Updated
        };

        Ok(EventResult {
            action,
            event: Some(updated),
            reason: None,
        })
    }

    async fn apply_to_resolved_within_cooldown(
        &self,
        resolved: ProblemEvent,
        severity: Severity,
        evidence: Evidence,
        peer_metrics: Option<serde_json::Value>,
        ml_data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<EventResult, EventError> {
        let dedup_key = resolved.dedup_key.clone();
        let pending = resolved.consecutive_fail + 1;

        if pending < self.debounce_threshold {
            let updated = repo::bump_resolved_counter(&self.pool, resolved.id, pending)
                .await
                .map_err(|source| EventError::Database {
                    dedup_key: dedup_key.clone(),
                    source,
                })?;
            return Ok(EventResult {
                action: EventAction::Suppressed,
                event: Some(updated),
                reason: Some("cooldown".to_string()),
            });
        }

        let escalate = resolved.would_escalate(severity);
        let new_severity = if escalate { severity } else { resolved.severity() };
        let evidence_json = serde_json::to_value(vec![evidence]).unwrap_or_else(|_| serde_json::json!([]));

        let updated = repo::reopen(
            &self.pool,
            resolved.id,
            new_severity.as_str(),
            resolved.recurrence_count + 1,
            now,
            evidence_json,
            peer_metrics,
            ml_data,
        )
        .await
        .map_err(|source| EventError::Database {
            dedup_key: dedup_key.clone(),
            source,
        })?;

        Ok(EventResult {
            action: EventAction::Reopened,
            event: Some(updated),
            reason: None,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn create_new(
        &self,
        site_id: i64,
        miner_id: &str,
        issue_code: &str,
        dedup_key: &str,
        severity: Severity,
        evidence: Evidence,
        peer_metrics: Option<serde_json::Value>,
        ml_data: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<EventResult, EventError> {
        let initial_status = if self.debounce_threshold > 1 {
            EventStatus::Ack
        } else {
            EventStatus::Open
        };
        let evidence_json = serde_json::to_value(vec![evidence]).unwrap_or_else(|_| serde_json::json!([]));

        let insert_result = repo::insert_new(
            &self.pool,
            Uuid::new_v4(),
            dedup_key,
            site_id,
            miner_id,
            issue_code,
            severity.as_str(),
            initial_status.as_str(),
            now,
            evidence_json,
            peer_metrics.clone(),
            ml_data.clone(),
        )
        .await;

        let created = match insert_result {
            Ok(event) => event,
            Err(err) if repo::is_unique_violation(&err) => {
                // Another instance created the active row between our read
                // and our insert; re-read and apply as an update instead.
                let active = repo::get_active(&self.pool, dedup_key)
                    .await
                    .map_err(|source| EventError::Database {
                        dedup_key: dedup_key.to_string(),
                        source,
                    })?
                    .ok_or_else(|| EventError::Race {
                        dedup_key: dedup_key.to_string(),
                    })?;
                return self
                    .apply_to_active(active, severity, Evidence {
                        rule_code: "race_retry".to_string(),
                        description: "retried as update after insert race".to_string(),
                        evaluated_at: now,
                        inputs: serde_json::json!({}),
                    }, peer_metrics, ml_data, now)
                    .await;
            }
            Err(source) => {
                return Err(EventError::Database {
                    dedup_key: dedup_key.to_string(),
                    source,
                })
            }
        };

        let action = match initial_status {
            EventStatus::Ack => EventAction::Debouncing,
            _ => EventAction::Created,
        };

        Ok(EventResult {
            action,
            event: Some(created),
            reason: None,
        })
    }

    /// `processHealthy`.
    pub async fn process_healthy(
        &self,
        site_id: i64,
        miner_id: &str,
        issue_code: &str,
    ) -> Result<EventResult, EventError> {
        let now = Utc::now();
        let dedup_key = ProblemEvent::dedup_key_for(site_id, miner_id, issue_code);

        let Some(active) = repo::get_active(&self.pool, &dedup_key)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: dedup_key.clone(),
                source,
            })?
        else {
            return Ok(EventResult {
                action: EventAction::NoActiveEvent,
                event: None,
                reason: None,
            });
        };

        let consecutive_ok = active.consecutive_ok + 1;

        if consecutive_ok >= self.resolve_threshold {
            let updated = repo::resolve(&self.pool, active.id, now)
                .await
                .map_err(|source| EventError::Database {
                    dedup_key: dedup_key.clone(),
                    source,
                })?;
            Ok(EventResult {
                action: EventAction::Resolved,
                event: Some(updated),
                reason: None,
            })
        } else {
            let updated = repo::update_resolving(&self.pool, active.id, consecutive_ok, now)
                .await
                .map_err(|source| EventError::Database {
                    dedup_key: dedup_key.clone(),
                    source,
                })?;
            Ok(EventResult {
                action: EventAction::Resolving,
                event: Some(updated),
                reason: None,
            })
        }
    }

    /// `bulkProcess` — detections for every miner are consumed before any
    /// healthy signal, satisfying the per-miner ordering guarantee (§5)
    /// since the two phases don't interleave. Returns one `EventResult`
    /// per input that processed successfully; failures are logged and
    /// dropped rather than aborting the batch.
    pub async fn bulk_process(
        &self,
        detections: Vec<DetectionInput>,
        healthy: Vec<HealthyInput>,
    ) -> Vec<EventResult> {
        let mut results = Vec::with_capacity(detections.len() + healthy.len());

        for d in detections {
            match self
                .process_detection(d.site_id, &d.miner_id, d.issue_code, d.severity, d.evidence, d.peer_metrics, d.ml_data)
                .await
            {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(dedup_key = %ProblemEvent::dedup_key_for(d.site_id, &d.miner_id, d.issue_code), error = %err, "detection processing failed");
                }
            }
        }

        for h in healthy {
            match self.process_healthy(h.site_id, &h.miner_id, h.issue_code).await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(dedup_key = %ProblemEvent::dedup_key_for(h.site_id, &h.miner_id, h.issue_code), error = %err, "healthy processing failed");
                }
            }
        }

        results
    }

    /// Tally action kinds across a batch, for cycle-summary logging.
    pub fn summarize(results: &[EventResult]) -> BulkTally {
        let mut tally = BulkTally::default();
        for result in results {
            tally.record(result.action);
        }
        tally
    }

    pub async fn suppress_miner(
        &self,
        miner_id: &str,
        until: Option<DateTime<Utc>>,
        maintenance: bool,
    ) -> Result<u64, EventError> {
        repo::suppress_miner(&self.pool, miner_id, until, maintenance)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: miner_id.to_string(),
                source,
            })
    }

    pub async fn unsuppress_miner(&self, miner_id: &str) -> Result<u64, EventError> {
        repo::unsuppress_miner(&self.pool, miner_id)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: miner_id.to_string(),
                source,
            })
    }

    pub async fn get_active_events(&self, site_id: i64) -> Result<Vec<ProblemEvent>, EventError> {
        repo::get_active_for_site(&self.pool, site_id)
            .await
            .map_err(|source| EventError::Database {
                dedup_key: format!("site:{site_id}"),
                source,
            })
    }
}

pub struct DetectionInput {
    pub site_id: i64,
    pub miner_id: String,
    pub issue_code: &'static str,
    pub severity: Severity,
    pub evidence: Evidence,
    pub peer_metrics: Option<serde_json::Value>,
    pub ml_data: Option<serde_json::Value>,
}

pub struct HealthyInput {
    pub site_id: i64,
    pub miner_id: String,
    pub issue_code: &'static str,
}

#[derive(Debug, Default)]
pub struct BulkTally {
    pub created: usize,
    pub debouncing: usize,
    pub updated: usize,
    pub escalated: usize,
    pub reopened: usize,
    pub resolved: usize,
    pub resolving: usize,
    pub suppressed: usize,
    pub no_active_event: usize,
    pub errors: usize,
}

impl BulkTally {
    fn record(&mut self, action: EventAction) {
        match action {
            EventAction::Created => self.created += 1,
            EventAction::Debouncing => self.debouncing += 1,
            EventAction::Updated => self.updated += 1,
            EventAction::Escalated => self.escalated += 1,
            EventAction::Reopened => self.reopened += 1,
            EventAction::Resolved => self.resolved += 1,
            EventAction::Resolving => self.resolving += 1,
            EventAction::Suppressed => self.suppressed += 1,
            EventAction::NoActiveEvent => self.no_active_event += 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with_evidence_max(evidence_max: usize) -> EventEngine {
        EventEngine {
            pool: unreachable_pool(),
            debounce_threshold: 2,
            resolve_threshold: 3,
            cooldown_hours: 24,
            evidence_max,
        }
    }

    fn unreachable_pool() -> PgPool {
        // `append_evidence` is pure JSON manipulation and never touches
        // `self.pool`; this lazily-connecting pool is constructed but
        // never awaited against the network.
        PgPool::connect_lazy("postgres://unused/unused").expect("lazy pool construction")
    }

    fn evidence(rule_code: &str) -> Evidence {
        Evidence {
            rule_code: rule_code.to_string(),
            description: "test".to_string(),
            evaluated_at: Utc::now(),
            inputs: serde_json::json!({}),
        }
    }

    #[test]
    fn append_evidence_grows_under_the_cap() {
        let engine = engine_with_evidence_max(100);
        let existing = serde_json::json!([]);
        let updated = engine.append_evidence(&existing, &evidence("overheat_crit"));
        let arr = updated.as_array().expect("array");
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn append_evidence_truncates_from_the_front_at_the_cap() {
        let engine = engine_with_evidence_max(3);
        let mut existing = serde_json::json!([]);
        for i in 0..3 {
            existing = engine.append_evidence(&existing, &evidence(&format!("rule_{i}")));
        }
        // list is now at the cap; one more push should drop the oldest
        let updated = engine.append_evidence(&existing, &evidence("rule_new"));
        let arr = updated.as_array().expect("array");
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0]["rule_code"], "rule_1");
        assert_eq!(arr[2]["rule_code"], "rule_new");
    }

    #[test]
    fn append_evidence_tolerates_malformed_existing_json() {
        let engine = engine_with_evidence_max(10);
        let existing = serde_json::json!("not an array");
        let updated = engine.append_evidence(&existing, &evidence("overheat_warn"));
        let arr = updated.as_array().expect("array");
        assert_eq!(arr.len(), 1);
    }

    #[test]
    fn initial_status_is_ack_when_debounce_threshold_above_one() {
        let engine = engine_with_evidence_max(10);
        assert!(engine.debounce_threshold > 1);
        // mirrors `create_new`'s branch without touching the database
        let initial_status = if engine.debounce_threshold > 1 {
            EventStatus::Ack
        } else {
            EventStatus::Open
        };
        assert_eq!(initial_status, EventStatus::Ack);
    }

    #[test]
    fn initial_status_is_open_when_debounce_threshold_is_one() {
        let mut engine = engine_with_evidence_max(10);
        engine.debounce_threshold = 1;
        let initial_status = if engine.debounce_threshold > 1 {
            EventStatus::Ack
        } else {
            EventStatus::Open
        };
        assert_eq!(initial_status, EventStatus::Open);
    }

    fn sample_event(severity: Severity) -> ProblemEvent {
        let now = Utc::now();
        ProblemEvent {
            id: Uuid::new_v4(),
            dedup_key: "1:miner-1:overheat_crit".to_string(),
            site_id: 1,
            miner_id: "miner-1".to_string(),
            issue_code: "overheat_crit".to_string(),
            severity: severity.as_str().to_string(),
            status: EventStatus::Open.as_str().to_string(),
            consecutive_fail: 1,
            consecutive_ok: 0,
            recurrence_count: 0,
            start_ts: now,
            last_seen_ts: now,
            resolved_ts: None,
            evidence_json: serde_json::json!([]),
            peer_metrics_json: None,
            ml_json: None,
            maintenance_flag: false,
            suppress_until: None,
        }
    }

    #[test]
    fn would_escalate_is_strict_and_never_downgrades() {
        let active = sample_event(Severity::P2);
        assert!(active.would_escalate(Severity::P1));
        assert!(active.would_escalate(Severity::P0));
        assert!(!active.would_escalate(Severity::P2));
        assert!(!active.would_escalate(Severity::P3));
    }

    #[test]
    fn is_active_covers_only_ack_open_in_progress() {
        assert!(EventStatus::Ack.is_active());
        assert!(EventStatus::Open.is_active());
        assert!(EventStatus::InProgress.is_active());
        assert!(!EventStatus::Resolved.is_active());
        assert!(!EventStatus::Suppressed.is_active());
    }
}
