//! Delivery log: one row per transport attempt, success or failure.

use chrono::{DateTime, Utc};
use leadflow_core::{error::LeadflowError, timefmt::format_ts};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

/// Which table the delivered row lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    FollowUp,
    Reminder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FollowUp => "follow_up",
            Self::Reminder => "reminder",
        }
    }
}

/// One attempt to write to the delivery log.
pub struct DeliveryAttempt<'a> {
    pub kind: ItemKind,
    pub item_id: &'a str,
    pub phone: &'a str,
    pub transport: &'a str,
    pub success: bool,
    pub provider_status: Option<&'a str>,
    pub error: Option<&'a str>,
    pub latency_ms: i64,
    pub attempted_at: DateTime<Utc>,
}

/// A stored attempt, as read back for a lead's detail view.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DeliveryRecord {
    pub item_kind: String,
    pub item_id: String,
    pub transport: String,
    pub success: bool,
    pub provider_status: Option<String>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i64>,
    pub attempted_at: String,
}

/// Delivery logger backed by SQLite.
#[derive(Clone)]
pub struct DeliveryLog {
    pool: SqlitePool,
}

impl DeliveryLog {
    /// Create a delivery log sharing the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, attempt: &DeliveryAttempt<'_>) -> Result<(), LeadflowError> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            "INSERT INTO delivery_attempts \
             (id, item_kind, item_id, customer_phone, transport, success, \
              provider_status, error_message, latency_ms, attempted_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(attempt.kind.as_str())
        .bind(attempt.item_id)
        .bind(attempt.phone)
        .bind(attempt.transport)
        .bind(attempt.success)
        .bind(attempt.provider_status)
        .bind(attempt.error)
        .bind(attempt.latency_ms)
        .bind(format_ts(attempt.attempted_at))
        .execute(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("delivery log write failed: {e}")))?;

        debug!(
            "delivery: {} {} to {} via {} [{}]",
            attempt.kind.as_str(),
            attempt.item_id,
            attempt.phone,
            attempt.transport,
            if attempt.success { "ok" } else { "failed" }
        );
        Ok(())
    }

    /// Attempts for one follow-up or reminder, oldest first.
    pub async fn attempts_for(
        &self,
        kind: ItemKind,
        item_id: &str,
    ) -> Result<Vec<DeliveryRecord>, LeadflowError> {
        sqlx::query_as(
            "SELECT item_kind, item_id, transport, success, provider_status, error_message, \
             latency_ms, attempted_at FROM delivery_attempts \
             WHERE item_kind = ? AND item_id = ? ORDER BY attempted_at ASC, rowid ASC",
        )
        .bind(kind.as_str())
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("delivery log read failed: {e}")))
    }

    /// Most recent attempts to reach a lead, newest first.
    pub async fn attempts_for_lead(
        &self,
        phone: &str,
        limit: i64,
    ) -> Result<Vec<DeliveryRecord>, LeadflowError> {
        sqlx::query_as(
            "SELECT item_kind, item_id, transport, success, provider_status, error_message, \
             latency_ms, attempted_at FROM delivery_attempts \
             WHERE customer_phone = ? ORDER BY attempted_at DESC, rowid DESC LIMIT ?",
        )
        .bind(phone)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("delivery log read failed: {e}")))
    }
}
