//! Inbound response handling.
//!
//! One inbound message is one transaction: register the lead if unknown,
//! cancel its pending follow-ups, credit the follow-up it answers, merge the
//! extracted profile data, apply the classifier's transition, bump counters,
//! and record the response.

use super::followups::{deactivate_pending_in, schedule_next_in, FollowUpPolicy};
use super::leads::{apply_transition_in, get_lead_in, insert_lead_in, update_profile_in};
use super::rows::{convert_all, ResponseRow, RESPONSE_COLUMNS};
use super::{commit, history, lock_lead, new_id, Store};
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    message::InboundMessage,
    model::{reason, CustomerResponse, ScheduleOutcome, StageChange},
    timefmt::{format_ts, parse_ts},
};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

/// What handling one inbound message did.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseOutcome {
    pub response_id: String,
    /// The phone number was unknown and a lead was registered for it.
    pub lead_created: bool,
    /// Pending follow-ups deactivated with `customer_responded`.
    pub cancelled_follow_ups: u64,
    /// The sent follow-up this message was credited to, if any.
    pub attributed_follow_up: Option<String>,
    pub stage_change: Option<StageChange>,
    /// Campaign scheduled for a lead registered by this message.
    pub initial_schedule: Option<ScheduleOutcome>,
}

impl Store {
    /// Handle one inbound customer message atomically.
    pub async fn record_response(
        &self,
        msg: &InboundMessage,
        now: DateTime<Utc>,
        policy: &FollowUpPolicy,
    ) -> Result<ResponseOutcome, LeadflowError> {
        let phone = msg.phone.as_str();
        let at = msg.received_at;

        let mut tx = self.begin().await?;
        let lead_created = insert_lead_in(&mut tx, phone, msg.name.as_deref(), at).await?;
        lock_lead(&mut tx, phone, now).await?;
        let stage_at_response = get_lead_in(&mut tx, phone).await?.current_stage;

        let attributed_follow_up = attribute_in(&mut tx, phone, at, policy).await?;
        let cancelled_follow_ups =
            deactivate_pending_in(&mut tx, phone, reason::CUSTOMER_RESPONDED, at).await?;
        history::mark_response_in(&mut tx, phone).await?;
        update_profile_in(
            &mut tx,
            phone,
            msg.name.as_deref(),
            &msg.attributes,
            msg.interested,
            msg.angry_behaviour,
        )
        .await?;

        let stage_change = match &msg.transition {
            Some(transition) => {
                let lead = get_lead_in(&mut tx, phone).await?;
                match transition.target(lead.current_stage) {
                    Some(to) if lead.current_stage.can_move_to(to) => Some(
                        apply_transition_in(&mut tx, &lead, transition, at, now, policy).await?,
                    ),
                    _ => {
                        warn!(
                            "inbound from {phone}: ignoring transition {transition:?} at stage {}",
                            lead.current_stage
                        );
                        None
                    }
                }
            }
            None => None,
        };

        sqlx::query(
            "UPDATE customer_leads SET response_count = response_count + 1, \
             last_response_time = ? WHERE phone_number = ?",
        )
        .bind(format_ts(at))
        .bind(phone)
        .execute(&mut *tx)
        .await
        .map_err(|e| LeadflowError::Store(format!("update response counters failed: {e}")))?;

        let response_id = new_id();
        sqlx::query(
            "INSERT INTO customer_responses \
             (id, customer_phone, message_content, ai_detected_intent, response_type, \
              stage_at_response, follow_up_cancelled, stage_progressed, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&response_id)
        .bind(phone)
        .bind(&msg.content)
        .bind(&msg.detected_intent)
        .bind(&msg.response_type)
        .bind(stage_at_response.as_str())
        .bind(cancelled_follow_ups > 0)
        .bind(stage_change.is_some())
        .bind(format_ts(at))
        .execute(&mut *tx)
        .await
        .map_err(|e| LeadflowError::Store(format!("insert response failed: {e}")))?;

        let initial_schedule = if lead_created && stage_change.is_none() {
            Some(schedule_next_in(&mut tx, phone, stage_at_response, None, at, now, policy).await?)
        } else {
            None
        };

        commit(tx).await?;
        info!(
            "inbound from {phone}: cancelled {cancelled_follow_ups} follow-ups, \
             stage_progressed={}",
            stage_change.is_some()
        );
        Ok(ResponseOutcome {
            response_id,
            lead_created,
            cancelled_follow_ups,
            attributed_follow_up,
            stage_change,
            initial_schedule,
        })
    }

    /// Responses from a lead, oldest first.
    pub async fn responses_for_lead(
        &self,
        phone: &str,
    ) -> Result<Vec<CustomerResponse>, LeadflowError> {
        let rows: Vec<ResponseRow> = sqlx::query_as(&format!(
            "SELECT {RESPONSE_COLUMNS} FROM customer_responses \
             WHERE customer_phone = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("responses for lead failed: {e}")))?;
        convert_all(rows)
    }
}

/// Credit the latest sent follow-up if `at` falls inside its window.
///
/// The window runs from `sent_time` until the next item of the same chain
/// is scheduled to fire, or for `policy.attribution_window` when the chain
/// has no next item.
async fn attribute_in(
    conn: &mut SqliteConnection,
    phone: &str,
    at: DateTime<Utc>,
    policy: &FollowUpPolicy,
) -> Result<Option<String>, LeadflowError> {
    let last_sent: Option<(String, String)> = sqlx::query_as(
        "SELECT id, sent_time FROM follow_ups \
         WHERE customer_phone = ? AND is_sent = 1 AND sent_time <= ? \
         ORDER BY sent_time DESC, follow_up_number DESC LIMIT 1",
    )
    .bind(phone)
    .bind(format_ts(at))
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("attribution lookup failed: {e}")))?;
    let Some((id, sent_time)) = last_sent else {
        return Ok(None);
    };

    let next: Option<(String,)> = sqlx::query_as(
        "SELECT scheduled_time FROM follow_ups WHERE previous_followup_id = ? \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(&id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("attribution lookup failed: {e}")))?;
    let window_end = match next {
        Some((scheduled,)) => parse_ts(&scheduled)?,
        None => parse_ts(&sent_time)? + policy.attribution_window,
    };
    if at >= window_end {
        return Ok(None);
    }

    sqlx::query(
        "UPDATE follow_ups SET customer_response_to_followup = 1, response_received = 1, \
         updated_at = ? WHERE id = ?",
    )
    .bind(format_ts(at))
    .bind(&id)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("mark follow-up response failed: {e}")))?;
    Ok(Some(id))
}
