//! Read-only projections for the dashboard.

use super::rows::{
    convert_all, FollowUpRow, HistoryRow, LeadRow, FOLLOW_UP_COLUMNS, HISTORY_COLUMNS,
    LEAD_COLUMNS,
};
use super::Store;
use leadflow_core::{
    error::LeadflowError,
    model::{
        DashboardSnapshot, FollowUp, FollowUpAnalytics, Lead, LeadDetail, LeadFilter, LeadOrder,
        StageCount, StageHistoryEntry,
    },
    stage::Stage,
};
use std::collections::HashMap;

const DEFAULT_LIST_LIMIT: i64 = 100;

fn order_by(order: LeadOrder) -> &'static str {
    match order {
        LeadOrder::LastMessageDesc => {
            "last_message_time IS NULL, last_message_time DESC, created_at DESC"
        }
        LeadOrder::CreatedDesc => "created_at DESC",
        LeadOrder::NameAsc => "name IS NULL, name COLLATE NOCASE ASC",
    }
}

impl Store {
    /// Aggregate KPIs plus the `recent` latest stage entries.
    pub async fn dashboard(&self, recent: i64) -> Result<DashboardSnapshot, LeadflowError> {
        Ok(DashboardSnapshot {
            total_leads: self.count("SELECT COUNT(*) FROM customer_leads").await?,
            qualified_leads: self.qualified_count().await?,
            pending_follow_ups: self.pending_follow_up_count().await?,
            pending_reminders: self.pending_reminder_count().await?,
            stage_distribution: self.stage_distribution().await?,
            recent_stage_changes: self.recent_stage_changes(recent).await?,
        })
    }

    /// Active, unsent follow-ups (due or not).
    pub async fn pending_follow_up_count(&self) -> Result<i64, LeadflowError> {
        self.count("SELECT COUNT(*) FROM follow_ups WHERE is_active = 1 AND is_sent = 0")
            .await
    }

    /// Active, unsent reminders (due or not).
    pub async fn pending_reminder_count(&self) -> Result<i64, LeadflowError> {
        self.count(
            "SELECT COUNT(*) FROM appointment_reminders WHERE is_active = 1 AND is_sent = 0",
        )
        .await
    }

    pub async fn qualified_count(&self) -> Result<i64, LeadflowError> {
        self.count("SELECT COUNT(*) FROM customer_leads WHERE is_qualified = 1")
            .await
    }

    /// Lead count per stage, in pipeline order, including empty stages.
    pub async fn stage_distribution(&self) -> Result<Vec<StageCount>, LeadflowError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT current_stage, COUNT(*) FROM customer_leads GROUP BY current_stage",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("stage distribution failed: {e}")))?;

        let mut counts: HashMap<Stage, i64> = HashMap::new();
        for (stage, count) in rows {
            counts.insert(stage.parse()?, count);
        }
        Ok(Stage::ALL
            .iter()
            .map(|stage| StageCount {
                stage: *stage,
                count: counts.get(stage).copied().unwrap_or(0),
            })
            .collect())
    }

    /// Most recent stage entries across all leads, newest first.
    pub async fn recent_stage_changes(
        &self,
        limit: i64,
    ) -> Result<Vec<StageHistoryEntry>, LeadflowError> {
        let rows: Vec<HistoryRow> = sqlx::query_as(&format!(
            "SELECT {HISTORY_COLUMNS} FROM stage_history \
             ORDER BY entered_at DESC, rowid DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("recent stage changes failed: {e}")))?;
        convert_all(rows)
    }

    pub async fn list_leads(&self, filter: &LeadFilter) -> Result<Vec<Lead>, LeadflowError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM customer_leads \
             WHERE (? IS NULL OR current_stage = ?) \
             AND (? IS NULL OR is_qualified = ?) \
             AND (? IS NULL OR appointment_booked = ?) \
             ORDER BY {} LIMIT ?",
            order_by(filter.order)
        );
        let stage = filter.stage.map(|s| s.as_str());
        let rows: Vec<LeadRow> = sqlx::query_as(&sql)
            .bind(stage)
            .bind(stage)
            .bind(filter.qualified)
            .bind(filter.qualified)
            .bind(filter.appointment_booked)
            .bind(filter.appointment_booked)
            .bind(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| LeadflowError::Store(format!("list leads failed: {e}")))?;
        convert_all(rows)
    }

    /// A lead with its full ledger and every follow-up.
    pub async fn lead_detail(&self, phone: &str) -> Result<Option<LeadDetail>, LeadflowError> {
        let Some(lead) = self.get_lead(phone).await? else {
            return Ok(None);
        };
        Ok(Some(LeadDetail {
            history: self.stage_history(phone).await?,
            follow_ups: self.follow_ups_for_lead(phone).await?,
            lead,
        }))
    }

    /// Pending follow-ups across all leads, soonest first.
    pub async fn upcoming_follow_ups(&self, limit: i64) -> Result<Vec<FollowUp>, LeadflowError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups \
             WHERE is_active = 1 AND is_sent = 0 \
             ORDER BY scheduled_time ASC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("upcoming follow-ups failed: {e}")))?;
        convert_all(rows)
    }

    /// Delivery totals per (campaign, position).
    ///
    /// `total_sent` counts rows that reached the transport at least once.
    pub async fn follow_up_analytics(&self) -> Result<Vec<FollowUpAnalytics>, LeadflowError> {
        let rows: Vec<(String, i64, i64, i64, i64)> = sqlx::query_as(
            "SELECT follow_up_type, follow_up_number, \
                    SUM(CASE WHEN attempt_count > 0 THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN is_sent = 1 THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN is_sent = 0 AND delivery_status = 'failed' THEN 1 ELSE 0 END) \
             FROM follow_ups \
             GROUP BY follow_up_type, follow_up_number \
             ORDER BY follow_up_type, follow_up_number",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("follow-up analytics failed: {e}")))?;
        Ok(rows
            .into_iter()
            .map(
                |(follow_up_type, follow_up_number, total_sent, successful, failed)| {
                    FollowUpAnalytics {
                        follow_up_type,
                        follow_up_number,
                        total_sent,
                        successful,
                        failed,
                    }
                },
            )
            .collect())
    }

    async fn count(&self, sql: &str) -> Result<i64, LeadflowError> {
        let (n,): (i64,) = sqlx::query_as(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| LeadflowError::Store(format!("count query failed: {e}")))?;
        Ok(n)
    }
}
