//! Outbox Records — append-only notification/ticket entries produced by
//! the Policy Engine (§3.7). The pipeline never delivers these itself; an
//! independent relay drains `event_outbox`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    Notification,
    Ticket,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::Notification => "notification",
            OutboxKind::Ticket => "ticket",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxRecord {
    pub id: uuid::Uuid,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Notification payload shape (§4.6): `{event_id, site_id, miner_id,
/// issue_code, severity, reason, priority, timestamp}`.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationPayload {
    pub event_id: uuid::Uuid,
    pub site_id: i64,
    pub miner_id: String,
    pub issue_code: String,
    pub severity: String,
    pub reason: String,
    pub priority: i32,
    pub timestamp: DateTime<Utc>,
}

/// Ticket payload: notification fields plus a synthesized subject/description.
#[derive(Debug, Clone, Serialize)]
pub struct TicketPayload {
    #[serde(flatten)]
    pub notification: NotificationPayload,
    pub subject: String,
    pub description: String,
}
