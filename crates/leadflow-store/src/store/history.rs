//! Stage history ledger: an append-mostly log of stage entry and exit per lead.
//!
//! Entries are never deleted. Closing an entry sets `exited_at` and clears
//! `is_current_stage`; a partial unique index keeps at most one open entry
//! per lead.

use super::rows::{convert_all, HistoryRow, HISTORY_COLUMNS};
use super::{new_id, Store};
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError, model::StageHistoryEntry, stage::Stage, timefmt::format_ts,
};
use sqlx::SqliteConnection;

impl Store {
    /// Full ledger for a lead, oldest first.
    pub async fn stage_history(&self, phone: &str) -> Result<Vec<StageHistoryEntry>, LeadflowError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
            "SELECT {HISTORY_COLUMNS} FROM stage_history \
             WHERE customer_phone = ? ORDER BY entered_at ASC, rowid ASC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("stage history query failed: {e}")))?;
        convert_all(rows)
    }

    /// The open ledger entry for a lead, if any.
    pub async fn current_stage_entry(
        &self,
        phone: &str,
    ) -> Result<Option<StageHistoryEntry>, LeadflowError> {
        let row: Option<HistoryRow> = sqlx::query_as(&format!(
            "SELECT {HISTORY_COLUMNS} FROM stage_history \
             WHERE customer_phone = ? AND is_current_stage = 1"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("current stage query failed: {e}")))?;
        row.map(StageHistoryEntry::try_from).transpose()
    }
}

/// Open a new entry for `stage`. The caller must have closed the previous one.
pub(super) async fn append_in(
    conn: &mut SqliteConnection,
    phone: &str,
    stage: Stage,
    at: DateTime<Utc>,
) -> Result<String, LeadflowError> {
    let id = new_id();
    let ts = format_ts(at);
    sqlx::query(
        "INSERT INTO stage_history \
         (id, customer_phone, stage, entered_at, is_current_stage, created_at) \
         VALUES (?, ?, ?, ?, 1, ?)",
    )
    .bind(&id)
    .bind(phone)
    .bind(stage.as_str())
    .bind(&ts)
    .bind(&ts)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("append stage history failed: {e}")))?;
    Ok(id)
}

/// Close the open entry. Returns the number of entries closed (0 or 1).
pub(super) async fn close_open_in(
    conn: &mut SqliteConnection,
    phone: &str,
    at: DateTime<Utc>,
    completed: bool,
) -> Result<u64, LeadflowError> {
    let result = sqlx::query(
        "UPDATE stage_history \
         SET exited_at = ?, is_current_stage = 0, stage_completed = ? \
         WHERE customer_phone = ? AND is_current_stage = 1",
    )
    .bind(format_ts(at))
    .bind(completed)
    .bind(phone)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("close stage history failed: {e}")))?;
    Ok(result.rows_affected())
}

pub(super) async fn mark_response_in(
    conn: &mut SqliteConnection,
    phone: &str,
) -> Result<(), LeadflowError> {
    sqlx::query(
        "UPDATE stage_history SET response_received = 1 \
         WHERE customer_phone = ? AND is_current_stage = 1",
    )
    .bind(phone)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("mark stage response failed: {e}")))?;
    Ok(())
}

/// Count a sent follow-up against the open entry, if it is still `stage`.
pub(super) async fn count_follow_up_in(
    conn: &mut SqliteConnection,
    phone: &str,
    stage: Stage,
) -> Result<(), LeadflowError> {
    sqlx::query(
        "UPDATE stage_history SET follow_ups_sent = follow_ups_sent + 1 \
         WHERE customer_phone = ? AND is_current_stage = 1 AND stage = ?",
    )
    .bind(phone)
    .bind(stage.as_str())
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("count stage follow-up failed: {e}")))?;
    Ok(())
}
