//! Conditional row updates for `follow_ups` and `appointment_reminders`.
//!
//! Every state change on a schedulable row is a single `UPDATE ... WHERE id = ?
//! AND is_active = 1 AND is_sent = 0`. Whichever actor commits first wins; the
//! loser sees zero rows affected and gets `CasOutcome::Stale`.

use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    model::{delivery, reason, CasOutcome, FailureOutcome},
    timefmt::format_ts,
};
use sqlx::SqliteConnection;

/// Tables holding schedulable rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Schedulable {
    FollowUps,
    Reminders,
}

impl Schedulable {
    fn table(self) -> &'static str {
        match self {
            Self::FollowUps => "follow_ups",
            Self::Reminders => "appointment_reminders",
        }
    }
}

/// Mark a pending row as sent.
///
/// `extra_set` is one more `(column, value)` assignment, e.g. `stage_when_sent`.
pub(super) async fn mark_sent_in(
    conn: &mut SqliteConnection,
    kind: Schedulable,
    id: &str,
    sent_at: DateTime<Utc>,
    extra_set: Option<(&str, &str)>,
) -> Result<CasOutcome, LeadflowError> {
    let (extra_sql, extra_value) = match extra_set {
        Some((column, value)) => (format!(", {column} = ?"), Some(value)),
        None => (String::new(), None),
    };
    let sql = format!(
        "UPDATE {} SET is_sent = 1, sent_time = ?, delivery_status = ?, \
         attempt_count = attempt_count + 1, error_message = NULL, updated_at = ?{extra_sql} \
         WHERE id = ? AND is_active = 1 AND is_sent = 0",
        kind.table()
    );
    let ts = format_ts(sent_at);
    let mut query = sqlx::query(&sql)
        .bind(&ts)
        .bind(delivery::SENT)
        .bind(&ts);
    if let Some(value) = extra_value {
        query = query.bind(value);
    }
    let result = query
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("mark sent failed for {id}: {e}")))?;
    Ok(CasOutcome::from_rows(result.rows_affected()))
}

/// Deactivate a pending row with a reason.
pub(super) async fn deactivate_in(
    conn: &mut SqliteConnection,
    kind: Schedulable,
    id: &str,
    why: &str,
    at: DateTime<Utc>,
) -> Result<CasOutcome, LeadflowError> {
    let sql = format!(
        "UPDATE {} SET is_active = 0, deactivated_at = ?, deactivation_reason = ?, updated_at = ? \
         WHERE id = ? AND is_active = 1 AND is_sent = 0",
        kind.table()
    );
    let ts = format_ts(at);
    let result = sqlx::query(&sql)
        .bind(&ts)
        .bind(why)
        .bind(&ts)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("deactivate failed for {id}: {e}")))?;
    Ok(CasOutcome::from_rows(result.rows_affected()))
}

/// Record a failed attempt; deactivate once `max_attempts` is reached.
///
/// The row's `scheduled_time` is left alone, so it stays due and the next
/// tick retries it.
pub(super) async fn record_failure_in(
    conn: &mut SqliteConnection,
    kind: Schedulable,
    id: &str,
    error: &str,
    max_attempts: i64,
    at: DateTime<Utc>,
) -> Result<FailureOutcome, LeadflowError> {
    let sql = format!(
        "UPDATE {} SET attempt_count = attempt_count + 1, delivery_status = ?, \
         error_message = ?, updated_at = ? \
         WHERE id = ? AND is_active = 1 AND is_sent = 0",
        kind.table()
    );
    let result = sqlx::query(&sql)
        .bind(delivery::FAILED)
        .bind(error)
        .bind(format_ts(at))
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("record failure failed for {id}: {e}")))?;

    if result.rows_affected() == 0 {
        return Ok(FailureOutcome::Stale);
    }

    let (attempts,): (i64,) = sqlx::query_as(&format!(
        "SELECT attempt_count FROM {} WHERE id = ?",
        kind.table()
    ))
    .bind(id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("attempt count fetch failed for {id}: {e}")))?;

    if attempts < max_attempts {
        return Ok(FailureOutcome::WillRetry { attempts });
    }

    match deactivate_in(conn, kind, id, reason::DELIVERY_EXHAUSTED, at).await? {
        CasOutcome::Applied => Ok(FailureOutcome::Exhausted { attempts }),
        CasOutcome::Stale => Ok(FailureOutcome::Stale),
    }
}
