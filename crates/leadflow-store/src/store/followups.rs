//! Follow-up scheduler and follow-up row lifecycle.
//!
//! A campaign chain is the ordered sequence of follow-ups for one
//! (lead, stage, campaign type). At most one chain item is pending at a time;
//! sending it schedules the next template in the sequence.

use super::guarded::{deactivate_in, mark_sent_in, record_failure_in, Schedulable};
use super::leads::get_lead_in;
use super::rows::{convert_all, FollowUpRow, FOLLOW_UP_COLUMNS};
use super::templates::next_template_in;
use super::{commit, history, lock_lead, new_id, Store};
use chrono::{DateTime, Duration, Utc};
use leadflow_core::{
    config::{FollowUpConfig, MAX_ATTRIBUTION_WINDOW_HOURS, MAX_GRACE_MINUTES},
    error::LeadflowError,
    model::{CasOutcome, FailureOutcome, FollowUp, ScheduleOutcome},
    stage::Stage,
    template::render_follow_up,
    timefmt::format_ts,
};
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};

/// Scheduling knobs, derived from `[followup]` config.
#[derive(Debug, Clone)]
pub struct FollowUpPolicy {
    pub default_campaign: String,
    /// Computed times older than `now - grace` are clamped to `now`.
    pub grace: Duration,
    /// Reply credit window when no next chain item bounds it.
    pub attribution_window: Duration,
}

impl FollowUpPolicy {
    pub fn from_config(cfg: &FollowUpConfig) -> Self {
        Self {
            default_campaign: cfg.default_campaign.clone(),
            grace: Duration::minutes(cfg.grace_minutes.clamp(0, MAX_GRACE_MINUTES)),
            attribution_window: Duration::hours(
                cfg.attribution_window_hours
                    .clamp(0, MAX_ATTRIBUTION_WINDOW_HOURS),
            ),
        }
    }
}

impl Default for FollowUpPolicy {
    fn default() -> Self {
        Self::from_config(&FollowUpConfig::default())
    }
}

/// What marking a follow-up as sent did.
#[derive(Debug, Clone)]
pub struct SendCompletion {
    pub cas: CasOutcome,
    /// Continuation of the chain, when the lead is still eligible.
    pub next: Option<ScheduleOutcome>,
}

impl Store {
    /// Schedule the next follow-up of a campaign for a lead.
    ///
    /// `campaign` defaults to the policy's default campaign; `trigger_at` is
    /// the event the template delay counts from.
    #[allow(clippy::too_many_arguments)]
    pub async fn schedule_follow_ups(
        &self,
        phone: &str,
        stage: Stage,
        campaign: Option<&str>,
        trigger_at: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &FollowUpPolicy,
    ) -> Result<ScheduleOutcome, LeadflowError> {
        let mut tx = self.begin().await?;
        if !lock_lead(&mut tx, phone, now).await? {
            return Err(LeadflowError::NotFound(format!("lead {phone}")));
        }
        let outcome = schedule_next_in(&mut tx, phone, stage, campaign, trigger_at, now, policy).await?;
        commit(tx).await?;
        Ok(outcome)
    }

    pub async fn get_follow_up(&self, id: &str) -> Result<Option<FollowUp>, LeadflowError> {
        let row: Option<FollowUpRow> = sqlx::query_as(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("get follow-up failed: {e}")))?;
        row.map(FollowUp::try_from).transpose()
    }

    /// Every follow-up for a lead, in schedule order.
    pub async fn follow_ups_for_lead(&self, phone: &str) -> Result<Vec<FollowUp>, LeadflowError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups \
             WHERE customer_phone = ? ORDER BY scheduled_time ASC, follow_up_number ASC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("follow-ups for lead failed: {e}")))?;
        convert_all(rows)
    }

    /// The canonical "currently due" query.
    ///
    /// Active, unsent, `scheduled_time <= now`, and the lead has follow-ups
    /// enabled and not manually stopped. Earliest first.
    pub async fn list_due_follow_ups(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<FollowUp>, LeadflowError> {
        let rows: Vec<FollowUpRow> = sqlx::query_as(&format!(
            "SELECT {FOLLOW_UP_COLUMNS} FROM follow_ups \
             WHERE is_active = 1 AND is_sent = 0 AND scheduled_time <= ? \
             AND customer_phone IN ( \
                 SELECT phone_number FROM customer_leads \
                 WHERE follow_up_enabled = 1 AND manual_stop_followups = 0) \
             ORDER BY scheduled_time ASC, rowid ASC LIMIT ?"
        ))
        .bind(format_ts(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("get due follow-ups failed: {e}")))?;
        convert_all(rows)
    }

    /// Mark a follow-up delivered and continue its chain.
    ///
    /// Guarded: if the row was deactivated concurrently the result is
    /// `Stale` and nothing else changes.
    pub async fn complete_follow_up(
        &self,
        id: &str,
        sent_at: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &FollowUpPolicy,
    ) -> Result<SendCompletion, LeadflowError> {
        let follow_up = self
            .get_follow_up(id)
            .await?
            .ok_or_else(|| LeadflowError::NotFound(format!("follow-up {id}")))?;
        let phone = follow_up.customer_phone.as_str();

        let mut tx = self.begin().await?;
        lock_lead(&mut tx, phone, now).await?;
        let lead = get_lead_in(&mut tx, phone).await?;

        let cas = mark_sent_in(
            &mut tx,
            Schedulable::FollowUps,
            id,
            sent_at,
            Some(("stage_when_sent", lead.current_stage.as_str())),
        )
        .await?;
        if cas == CasOutcome::Stale {
            commit(tx).await?;
            return Ok(SendCompletion { cas, next: None });
        }

        sqlx::query(
            "UPDATE customer_leads SET total_messages_sent = total_messages_sent + 1, \
             last_message_time = ? WHERE phone_number = ?",
        )
        .bind(format_ts(sent_at))
        .bind(phone)
        .execute(&mut *tx)
        .await
        .map_err(|e| LeadflowError::Store(format!("update lead counters failed: {e}")))?;
        history::count_follow_up_in(&mut tx, phone, follow_up.stage_when_scheduled).await?;

        let next = if lead.current_stage == follow_up.stage_when_scheduled && lead.accepts_follow_ups()
        {
            match schedule_next_in(
                &mut tx,
                phone,
                follow_up.stage_when_scheduled,
                Some(follow_up.follow_up_type.as_str()),
                sent_at,
                now,
                policy,
            )
            .await
            {
                Ok(outcome) => Some(outcome),
                // The message is out; a broken next template ends the chain
                // instead of rolling back the send.
                Err(LeadflowError::Config(e)) => {
                    error!("follow-up {id}: chain for {phone} ends: {e}");
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            debug!("follow-up {id}: lead {phone} moved on or opted out, chain ends");
            None
        };
        commit(tx).await?;
        Ok(SendCompletion { cas, next })
    }

    /// Record a failed delivery attempt for a follow-up.
    pub async fn fail_follow_up(
        &self,
        id: &str,
        error: &str,
        max_attempts: i64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, LeadflowError> {
        let mut tx = self.begin().await?;
        let outcome =
            record_failure_in(&mut tx, Schedulable::FollowUps, id, error, max_attempts, now)
                .await?;
        commit(tx).await?;
        Ok(outcome)
    }

    /// Deactivate one pending follow-up.
    pub async fn deactivate_follow_up(
        &self,
        id: &str,
        why: &str,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, LeadflowError> {
        let mut tx = self.begin().await?;
        let outcome = deactivate_in(&mut tx, Schedulable::FollowUps, id, why, now).await?;
        commit(tx).await?;
        Ok(outcome)
    }
}

/// The scheduling algorithm, inside the caller's transaction.
pub(super) async fn schedule_next_in(
    conn: &mut SqliteConnection,
    phone: &str,
    stage: Stage,
    campaign: Option<&str>,
    trigger_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &FollowUpPolicy,
) -> Result<ScheduleOutcome, LeadflowError> {
    let lead = get_lead_in(conn, phone).await?;
    if !lead.accepts_follow_ups() {
        debug!("follow-up scheduling skipped for {phone}: opted out");
        return Ok(ScheduleOutcome::OptedOut);
    }
    let campaign = campaign.unwrap_or(policy.default_campaign.as_str());

    // Idempotence: one pending item per chain.
    let pending: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM follow_ups \
         WHERE customer_phone = ? AND stage_when_scheduled = ? AND follow_up_type = ? \
         AND is_active = 1 AND is_sent = 0 LIMIT 1",
    )
    .bind(phone)
    .bind(stage.as_str())
    .bind(campaign)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("pending follow-up check failed: {e}")))?;
    if let Some((id,)) = pending {
        info!("follow-up dedup: {phone} {stage}/{campaign} already pending as {id}");
        return Ok(ScheduleOutcome::Duplicate { id });
    }

    // Chain position: highest number already sent or still pending.
    let last: Option<(String, i64)> = sqlx::query_as(
        "SELECT id, follow_up_number FROM follow_ups \
         WHERE customer_phone = ? AND stage_when_scheduled = ? AND follow_up_type = ? \
         AND (is_sent = 1 OR is_active = 1) \
         ORDER BY follow_up_number DESC LIMIT 1",
    )
    .bind(phone)
    .bind(stage.as_str())
    .bind(campaign)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("chain position query failed: {e}")))?;
    let (previous_id, last_number) = match last {
        Some((id, number)) => (Some(id), number),
        None => (None, 0),
    };

    let Some(template) = next_template_in(conn, stage, campaign, last_number).await? else {
        debug!("no template after #{last_number} for {stage}/{campaign}, chain ends for {phone}");
        return Ok(ScheduleOutcome::NoTemplate);
    };

    let mut scheduled_time = template
        .delay()
        .and_then(|delay| trigger_at.checked_add_signed(delay))
        .ok_or_else(|| {
            LeadflowError::Config(format!(
                "template {}: delay of {}h{}m is out of range",
                template.template_name, template.delay_hours, template.delay_minutes
            ))
        })?;
    let clamped = scheduled_time < now - policy.grace;
    if clamped {
        warn!(
            "follow-up #{} for {phone} computed at {} is past due, clamping to now",
            template.follow_up_number,
            format_ts(scheduled_time)
        );
        scheduled_time = now;
    }

    let id = new_id();
    let ts = format_ts(now);
    sqlx::query(
        "INSERT INTO follow_ups \
         (id, customer_phone, customer_name, follow_up_type, follow_up_number, delay_hours, \
          delay_minutes, scheduled_time, stage_when_scheduled, message_content, template_used, \
          previous_followup_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(phone)
    .bind(&lead.name)
    .bind(campaign)
    .bind(template.follow_up_number)
    .bind(template.delay_hours)
    .bind(template.delay_minutes)
    .bind(format_ts(scheduled_time))
    .bind(stage.as_str())
    .bind(render_follow_up(&template.message_template, &lead))
    .bind(&template.template_name)
    .bind(&previous_id)
    .bind(&ts)
    .bind(&ts)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("insert follow-up failed: {e}")))?;

    info!(
        "scheduled follow-up #{} for {phone} ({stage}/{campaign}) at {}",
        template.follow_up_number,
        format_ts(scheduled_time)
    );
    Ok(ScheduleOutcome::Scheduled {
        id,
        follow_up_number: template.follow_up_number,
        scheduled_time,
        clamped,
    })
}

/// Deactivate every pending follow-up of a lead. Returns how many.
pub(super) async fn deactivate_pending_in(
    conn: &mut SqliteConnection,
    phone: &str,
    why: &str,
    at: DateTime<Utc>,
) -> Result<u64, LeadflowError> {
    let ts = format_ts(at);
    let result = sqlx::query(
        "UPDATE follow_ups SET is_active = 0, deactivated_at = ?, deactivation_reason = ?, \
         updated_at = ? \
         WHERE customer_phone = ? AND is_active = 1 AND is_sent = 0",
    )
    .bind(&ts)
    .bind(why)
    .bind(&ts)
    .bind(phone)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("deactivate pending follow-ups failed: {e}")))?;
    Ok(result.rows_affected())
}
