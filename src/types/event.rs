//! Problem Event — the central lifecycle entity (§3.5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Severity ranks, ordinal and strictly ordered: P0 (critical) > P1 > P2 > P3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    P3 = 0,
    P2 = 1,
    P1 = 2,
    P0 = 3,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::P0 => "P0",
            Severity::P1 => "P1",
            Severity::P2 => "P2",
            Severity::P3 => "P3",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "P0" => Ok(Severity::P0),
            "P1" => Ok(Severity::P1),
            "P2" => Ok(Severity::P2),
            "P3" => Ok(Severity::P3),
            other => Err(format!("unknown severity {other}")),
        }
    }
}

/// Lifecycle status. `ack -> open -> in_progress -> resolved`, with
/// `resolved -> open` the only backward transition (a recurrence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Ack,
    Open,
    InProgress,
    Resolved,
    Suppressed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Ack => "ack",
            EventStatus::Open => "open",
            EventStatus::InProgress => "in_progress",
            EventStatus::Resolved => "resolved",
            EventStatus::Suppressed => "suppressed",
        }
    }

    /// An event is "active" while in any of these three statuses; at most
    /// one active row may exist per dedup_key.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EventStatus::Ack | EventStatus::Open | EventStatus::InProgress
        )
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single evidence snapshot, as produced by `RulesEngine` and appended
/// (bounded) onto a `ProblemEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub rule_code: String,
    pub description: String,
    pub evaluated_at: DateTime<Utc>,
    /// Input quantities and thresholds used, e.g. `{"temp_max": 90.0, "threshold": 85.0}`.
    pub inputs: serde_json::Value,
}

/// The central mutable lifecycle entity. Uniquely addressed by
/// `dedup_key = site_id:miner_id:issue_code`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProblemEvent {
    pub id: Uuid,
    pub dedup_key: String,
    pub site_id: i64,
    pub miner_id: String,
    pub issue_code: String,
    pub severity: String,
    pub status: String,
    pub start_ts: DateTime<Utc>,
    pub last_seen_ts: DateTime<Utc>,
    pub resolved_ts: Option<DateTime<Utc>>,
    pub recurrence_count: i32,
    pub consecutive_fail: i32,
    pub consecutive_ok: i32,
    pub evidence_json: serde_json::Value,
    pub peer_metrics_json: Option<serde_json::Value>,
    pub ml_json: Option<serde_json::Value>,
    pub suppress_until: Option<DateTime<Utc>>,
    pub maintenance_flag: bool,
}

impl ProblemEvent {
    pub fn dedup_key_for(site_id: i64, miner_id: &str, issue_code: &str) -> String {
        format!("{site_id}:{miner_id}:{issue_code}")
    }

    pub fn severity(&self) -> Severity {
        self.severity.parse().unwrap_or(Severity::P3)
    }

    pub fn status(&self) -> EventStatus {
        match self.status.as_str() {
            "ack" => EventStatus::Ack,
            "open" => EventStatus::Open,
            "in_progress" => EventStatus::InProgress,
            "resolved" => EventStatus::Resolved,
            _ => EventStatus::Suppressed,
        }
    }

    pub fn is_suppressed(&self, now: DateTime<Utc>) -> bool {
        self.maintenance_flag || self.suppress_until.map(|until| until > now).unwrap_or(false)
    }

    /// Whether `candidate` outranks this event's stored severity, used to
    /// decide monotonic upward escalation.
    pub fn would_escalate(&self, candidate: Severity) -> bool {
        candidate.cmp(&self.severity()) == Ordering::Greater
    }
}

/// Outcome of a single `EventEngine` operation, reported back to the
/// orchestrator/PolicyEngine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Created,
    Debouncing,
    Updated,
    Escalated,
    Reopened,
    Resolved,
    Resolving,
    Suppressed,
    NoActiveEvent,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::Created => "created",
            EventAction::Debouncing => "debouncing",
            EventAction::Updated => "updated",
            EventAction::Escalated => "escalated",
            EventAction::Reopened => "reopened",
            EventAction::Resolved => "resolved",
            EventAction::Resolving => "resolving",
            EventAction::Suppressed => "suppressed",
            EventAction::NoActiveEvent => "no_active_event",
        }
    }

    /// Only these three action kinds are candidates for PolicyEngine
    /// dispatch (§4.6); reopen is folded into `Updated`-equivalent
    /// handling by virtue of `Reopened` also being eligible.
    pub fn is_dispatch_eligible(&self) -> bool {
        matches!(
            self,
            EventAction::Created
                | EventAction::Updated
                | EventAction::Escalated
                | EventAction::Reopened
        )
    }
}

/// Result returned from `EventEngine::process_detection` /
/// `process_healthy`.
#[derive(Debug, Clone)]
pub struct EventResult {
    pub action: EventAction,
    pub event: Option<ProblemEvent>,
    pub reason: Option<String>,
}
