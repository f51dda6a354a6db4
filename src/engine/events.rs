//! Event intake: inbound messages, lead and stage events, bookings.
//!
//! Each handler is one store transaction stamped with the caller's clock.

use super::Engine;
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    message::{BookingRequest, InboundMessage},
    model::{Lead, ScheduleOutcome, StageChange, Transition},
};
use leadflow_store::{BookingOutcome, ResponseOutcome};
use tracing::{debug, info};

impl Engine {
    /// Response Handler entry point.
    pub async fn handle_inbound(
        &self,
        msg: &InboundMessage,
        now: DateTime<Utc>,
    ) -> Result<ResponseOutcome, LeadflowError> {
        let outcome = self.store.record_response(msg, now, &self.policy).await?;
        if let Some(change) = &outcome.stage_change {
            info!(
                "lead {} moved {} -> {} on reply",
                msg.phone, change.from, change.to
            );
        }
        debug!("inbound {} handled: {outcome:?}", outcome.response_id);
        Ok(outcome)
    }

    /// Register a new lead and start its `initial_contact` campaign.
    pub async fn register_lead(
        &self,
        phone: &str,
        name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(Lead, Option<ScheduleOutcome>), LeadflowError> {
        self.store
            .register_lead(phone, name, now, now, &self.policy)
            .await
    }

    /// Stage change not tied to an inbound message.
    pub async fn advance_stage(
        &self,
        phone: &str,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<StageChange, LeadflowError> {
        let change = self
            .store
            .advance_stage(phone, transition, now, now, &self.policy)
            .await?;
        info!("lead {phone} moved {} -> {}", change.from, change.to);
        Ok(change)
    }

    /// Operator stop; returns how many pending follow-ups were dropped.
    pub async fn stop_follow_ups(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, LeadflowError> {
        let n = self.store.set_follow_ups_stopped(phone, true, now).await?;
        info!("follow-ups stopped for {phone} ({n} pending dropped)");
        Ok(n)
    }

    /// Lift the operator stop. Does not reschedule anything by itself; the
    /// next stage change starts a new campaign.
    pub async fn resume_follow_ups(
        &self,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LeadflowError> {
        self.store.set_follow_ups_stopped(phone, false, now).await?;
        info!("follow-ups resumed for {phone}");
        Ok(())
    }

    /// Reminder Scheduler: book (or re-book) a consultation.
    pub async fn book_appointment(
        &self,
        req: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, LeadflowError> {
        let outcome = self.store.book_appointment(req, now).await?;
        let active = outcome.reminders.iter().filter(|r| r.is_active).count();
        info!(
            "appointment {} for {} at {}: {active} reminders queued",
            outcome.appointment.id, req.phone, outcome.appointment.appointment_date
        );
        Ok(outcome)
    }

    pub async fn cancel_appointment(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, LeadflowError> {
        self.store.cancel_appointment(id, now).await
    }

    pub async fn reschedule_appointment(
        &self,
        id: &str,
        new_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, LeadflowError> {
        let outcome = self.store.reschedule_appointment(id, new_date, now).await?;
        info!("appointment {id} moved to {new_date}");
        Ok(outcome)
    }
}
