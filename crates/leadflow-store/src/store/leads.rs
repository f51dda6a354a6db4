//! Lead registration, lookup, stage transitions, and follow-up opt-out.

use super::followups::{deactivate_pending_in, schedule_next_in, FollowUpPolicy};
use super::rows::{LeadRow, LEAD_COLUMNS};
use super::{commit, history, lock_lead, Store};
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    model::{reason, Lead, LeadAttributes, ScheduleOutcome, StageChange, Transition},
    stage::Stage,
    timefmt::format_ts,
};
use sqlx::SqliteConnection;
use tracing::info;

impl Store {
    /// Register a lead at `initial_contact` and schedule that stage's campaign.
    ///
    /// Returns the stored lead and the schedule outcome, or `None` as the
    /// outcome when the phone number was already registered.
    pub async fn register_lead(
        &self,
        phone: &str,
        name: Option<&str>,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &FollowUpPolicy,
    ) -> Result<(Lead, Option<ScheduleOutcome>), LeadflowError> {
        let mut tx = self.begin().await?;
        let created = insert_lead_in(&mut tx, phone, name, at).await?;
        let schedule = if created {
            let outcome =
                schedule_next_in(&mut tx, phone, Stage::InitialContact, None, at, now, policy)
                    .await?;
            Some(outcome)
        } else {
            None
        };
        let lead = get_lead_in(&mut tx, phone).await?;
        commit(tx).await?;
        if created {
            info!("registered lead {phone}");
        }
        Ok((lead, schedule))
    }

    pub async fn get_lead(&self, phone: &str) -> Result<Option<Lead>, LeadflowError> {
        let row: Option<LeadRow> = sqlx::query_as(&format!(
            "SELECT {LEAD_COLUMNS} FROM customer_leads WHERE phone_number = ?"
        ))
        .bind(phone)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("get lead failed: {e}")))?;
        row.map(Lead::try_from).transpose()
    }

    /// Apply a stage change that is not tied to an inbound message.
    pub async fn advance_stage(
        &self,
        phone: &str,
        transition: &Transition,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
        policy: &FollowUpPolicy,
    ) -> Result<StageChange, LeadflowError> {
        let mut tx = self.begin().await?;
        if !lock_lead(&mut tx, phone, now).await? {
            return Err(LeadflowError::NotFound(format!("lead {phone}")));
        }
        let lead = get_lead_in(&mut tx, phone).await?;
        let change = apply_transition_in(&mut tx, &lead, transition, at, now, policy).await?;
        commit(tx).await?;
        Ok(change)
    }

    /// Turn the manual follow-up stop on or off.
    ///
    /// Stopping deactivates every pending follow-up; returns how many.
    pub async fn set_follow_ups_stopped(
        &self,
        phone: &str,
        stopped: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, LeadflowError> {
        let mut tx = self.begin().await?;
        if !lock_lead(&mut tx, phone, now).await? {
            return Err(LeadflowError::NotFound(format!("lead {phone}")));
        }
        sqlx::query("UPDATE customer_leads SET manual_stop_followups = ? WHERE phone_number = ?")
            .bind(stopped)
            .bind(phone)
            .execute(&mut *tx)
            .await
            .map_err(|e| LeadflowError::Store(format!("set follow-up stop failed: {e}")))?;
        let deactivated = if stopped {
            deactivate_pending_in(&mut tx, phone, reason::MANUAL_STOP, now).await?
        } else {
            0
        };
        commit(tx).await?;
        info!("lead {phone}: manual_stop_followups={stopped}, deactivated {deactivated}");
        Ok(deactivated)
    }
}

/// Insert a fresh lead with its opening ledger entry. `false` if it exists.
pub(super) async fn insert_lead_in(
    conn: &mut SqliteConnection,
    phone: &str,
    name: Option<&str>,
    at: DateTime<Utc>,
) -> Result<bool, LeadflowError> {
    if phone.trim().is_empty() {
        return Err(LeadflowError::InvalidInput(
            "phone number must not be empty".into(),
        ));
    }
    let ts = format_ts(at);
    let result = sqlx::query(
        "INSERT OR IGNORE INTO customer_leads \
         (phone_number, name, current_stage, last_stage_update, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(phone)
    .bind(name)
    .bind(Stage::InitialContact.as_str())
    .bind(&ts)
    .bind(&ts)
    .bind(&ts)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("insert lead failed: {e}")))?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    history::append_in(conn, phone, Stage::InitialContact, at).await?;
    Ok(true)
}

pub(super) async fn get_lead_in(
    conn: &mut SqliteConnection,
    phone: &str,
) -> Result<Lead, LeadflowError> {
    let row: Option<LeadRow> = sqlx::query_as(&format!(
        "SELECT {LEAD_COLUMNS} FROM customer_leads WHERE phone_number = ?"
    ))
    .bind(phone)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("get lead failed: {e}")))?;
    row.map(Lead::try_from)
        .transpose()?
        .ok_or_else(|| LeadflowError::NotFound(format!("lead {phone}")))
}

/// Merge inbound profile data into the lead. `None` fields keep stored values.
pub(super) async fn update_profile_in(
    conn: &mut SqliteConnection,
    phone: &str,
    name: Option<&str>,
    attrs: &LeadAttributes,
    interested: Option<bool>,
    angry: bool,
) -> Result<(), LeadflowError> {
    sqlx::query(
        "UPDATE customer_leads SET \
           name = COALESCE(?, name), email = COALESCE(?, email), \
           project_type = COALESCE(?, project_type), budget_range = COALESCE(?, budget_range), \
           timeline = COALESCE(?, timeline), location = COALESCE(?, location), \
           project_stage = COALESCE(?, project_stage), \
           design_preference = COALESCE(?, design_preference), \
           is_interested = COALESCE(?, is_interested), \
           angry_behaviour_detected = MAX(angry_behaviour_detected, ?) \
         WHERE phone_number = ?",
    )
    .bind(name)
    .bind(&attrs.email)
    .bind(&attrs.project_type)
    .bind(&attrs.budget_range)
    .bind(&attrs.timeline)
    .bind(&attrs.location)
    .bind(&attrs.project_stage)
    .bind(&attrs.design_preference)
    .bind(interested)
    .bind(angry)
    .bind(phone)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("update lead profile failed: {e}")))?;
    Ok(())
}

/// The mechanical stage transition.
///
/// Closes the open ledger entry, opens one for the target, moves
/// `current_stage`, deactivates pending follow-ups of the old stage, and
/// schedules the new stage's campaign from `at`.
pub(super) async fn apply_transition_in(
    conn: &mut SqliteConnection,
    lead: &Lead,
    transition: &Transition,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &FollowUpPolicy,
) -> Result<StageChange, LeadflowError> {
    let from = lead.current_stage;
    let to = transition.target(from).ok_or_else(|| {
        LeadflowError::InvalidTransition(format!(
            "lead {} is at terminal stage {from}",
            lead.phone_number
        ))
    })?;
    if !from.can_move_to(to) {
        return Err(LeadflowError::InvalidTransition(format!(
            "lead {}: {from} -> {to} is not allowed",
            lead.phone_number
        )));
    }
    let phone = lead.phone_number.as_str();

    history::close_open_in(conn, phone, at, to != Stage::Disqualified).await?;
    history::append_in(conn, phone, to, at).await?;

    let disqualification_reason = match transition {
        Transition::Disqualify { reason } => Some(reason.as_str()),
        _ => None,
    };
    sqlx::query(
        "UPDATE customer_leads SET current_stage = ?, last_stage_update = ?, \
           is_qualified = CASE WHEN ? = 'qualified' THEN 1 ELSE is_qualified END, \
           is_disqualified = CASE WHEN ? = 'disqualified' THEN 1 ELSE is_disqualified END, \
           disqualification_reason = COALESCE(?, disqualification_reason) \
         WHERE phone_number = ?",
    )
    .bind(to.as_str())
    .bind(format_ts(at))
    .bind(to.as_str())
    .bind(to.as_str())
    .bind(disqualification_reason)
    .bind(phone)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("update lead stage failed: {e}")))?;

    let deactivated = deactivate_pending_in(conn, phone, reason::STAGE_ADVANCED, at).await?;
    let schedule = schedule_next_in(conn, phone, to, None, at, now, policy).await?;

    info!("lead {phone}: stage {from} -> {to} ({deactivated} pending follow-ups dropped)");
    Ok(StageChange {
        from,
        to,
        deactivated_follow_ups: deactivated,
        schedule,
    })
}
