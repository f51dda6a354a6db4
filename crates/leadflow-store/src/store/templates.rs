//! Follow-up and reminder template catalog.
//!
//! The engine only reads templates; the upserts exist for the admin import
//! path and for seeding tests.

use super::rows::{
    convert_all, ReminderTemplateRow, TemplateRow, REMINDER_TEMPLATE_COLUMNS, TEMPLATE_COLUMNS,
};
use super::Store;
use chrono::Utc;
use leadflow_core::{
    error::LeadflowError,
    model::{FollowUpTemplate, ReminderKind, ReminderTemplate, MAX_TEMPLATE_DELAY_HOURS},
    stage::Stage,
    timefmt::format_ts,
};
use sqlx::SqliteConnection;

impl Store {
    /// Active templates for a (stage, campaign) pair, in sequence order.
    pub async fn list_active_templates(
        &self,
        stage: Stage,
        template_type: &str,
    ) -> Result<Vec<FollowUpTemplate>, LeadflowError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM follow_up_templates \
             WHERE stage = ? AND template_type = ? AND is_active = 1 \
             ORDER BY follow_up_number ASC"
        ))
        .bind(stage.as_str())
        .bind(template_type)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("list templates failed: {e}")))?;
        convert_all(rows)
    }

    /// Every follow-up template, active or not.
    pub async fn list_follow_up_templates(&self) -> Result<Vec<FollowUpTemplate>, LeadflowError> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM follow_up_templates \
             ORDER BY stage, template_type, follow_up_number"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("list templates failed: {e}")))?;
        convert_all(rows)
    }

    /// Insert or replace a follow-up template, keyed by `template_name`.
    pub async fn upsert_follow_up_template(
        &self,
        t: &FollowUpTemplate,
    ) -> Result<(), LeadflowError> {
        if t.follow_up_number < 1 {
            return Err(LeadflowError::Config(format!(
                "template {}: follow_up_number must be >= 1",
                t.template_name
            )));
        }
        if !t.delay_in_range() {
            return Err(LeadflowError::Config(format!(
                "template {}: delay must be between 0 and {MAX_TEMPLATE_DELAY_HOURS} hours",
                t.template_name
            )));
        }
        sqlx::query(
            "INSERT INTO follow_up_templates \
             (id, template_name, stage, template_type, follow_up_number, delay_hours, \
              delay_minutes, message_template, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(template_name) DO UPDATE SET \
               stage = excluded.stage, template_type = excluded.template_type, \
               follow_up_number = excluded.follow_up_number, \
               delay_hours = excluded.delay_hours, delay_minutes = excluded.delay_minutes, \
               message_template = excluded.message_template, is_active = excluded.is_active",
        )
        .bind(&t.id)
        .bind(&t.template_name)
        .bind(t.stage.as_str())
        .bind(&t.template_type)
        .bind(t.follow_up_number)
        .bind(t.delay_hours)
        .bind(t.delay_minutes)
        .bind(&t.message_template)
        .bind(t.is_active)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("upsert template failed: {e}")))?;
        Ok(())
    }

    /// Insert or replace a reminder template, keyed by `template_name`.
    pub async fn upsert_reminder_template(
        &self,
        t: &ReminderTemplate,
    ) -> Result<(), LeadflowError> {
        sqlx::query(
            "INSERT INTO reminder_templates \
             (id, template_name, reminder_type, message_template, is_active, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(template_name) DO UPDATE SET \
               reminder_type = excluded.reminder_type, \
               message_template = excluded.message_template, is_active = excluded.is_active",
        )
        .bind(&t.id)
        .bind(&t.template_name)
        .bind(t.reminder_type.as_str())
        .bind(&t.message_template)
        .bind(t.is_active)
        .bind(format_ts(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("upsert reminder template failed: {e}")))?;
        Ok(())
    }

    pub async fn list_reminder_templates(&self) -> Result<Vec<ReminderTemplate>, LeadflowError> {
        let rows: Vec<ReminderTemplateRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_TEMPLATE_COLUMNS} FROM reminder_templates \
             ORDER BY reminder_type, template_name"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("list reminder templates failed: {e}")))?;
        convert_all(rows)
    }
}

/// First active template continuing a chain past `after_number`.
pub(super) async fn next_template_in(
    conn: &mut SqliteConnection,
    stage: Stage,
    template_type: &str,
    after_number: i64,
) -> Result<Option<FollowUpTemplate>, LeadflowError> {
    let row: Option<TemplateRow> = sqlx::query_as(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM follow_up_templates \
         WHERE stage = ? AND template_type = ? AND is_active = 1 AND follow_up_number > ? \
         ORDER BY follow_up_number ASC LIMIT 1"
    ))
    .bind(stage.as_str())
    .bind(template_type)
    .bind(after_number)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("next template query failed: {e}")))?;
    row.map(FollowUpTemplate::try_from).transpose()
}

/// Active reminder template for a tier, if one is configured.
pub(super) async fn reminder_template_in(
    conn: &mut SqliteConnection,
    kind: ReminderKind,
) -> Result<Option<ReminderTemplate>, LeadflowError> {
    let row: Option<ReminderTemplateRow> = sqlx::query_as(&format!(
        "SELECT {REMINDER_TEMPLATE_COLUMNS} FROM reminder_templates \
         WHERE reminder_type = ? AND is_active = 1 \
         ORDER BY template_name ASC LIMIT 1"
    ))
    .bind(kind.as_str())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("reminder template query failed: {e}")))?;
    row.map(ReminderTemplate::try_from).transpose()
}
