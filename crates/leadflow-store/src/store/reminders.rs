//! Appointments and their two-tier reminders.
//!
//! Booking creates one reminder per `ReminderKind`. A reminder whose time is
//! already past at booking is stored inactive (`past_due_at_booking`) so the
//! audit trail shows it was considered.

use super::guarded::{deactivate_in, mark_sent_in, record_failure_in, Schedulable};
use super::rows::{convert_all, AppointmentRow, ReminderRow, APPOINTMENT_COLUMNS, REMINDER_COLUMNS};
use super::templates::reminder_template_in;
use super::{commit, lock_lead, new_id, Store};
use chrono::{DateTime, Utc};
use leadflow_core::{
    error::LeadflowError,
    message::BookingRequest,
    model::{
        reason, Appointment, AppointmentStatus, CasOutcome, FailureOutcome, Reminder,
        ReminderKind,
    },
    template::{default_reminder_body, render_reminder},
    timefmt::format_ts,
};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

/// An appointment together with the reminders created for it.
#[derive(Debug, Clone, Serialize)]
pub struct BookingOutcome {
    pub appointment: Appointment,
    pub reminders: Vec<Reminder>,
}

impl Store {
    /// Book a consultation and schedule its reminders.
    ///
    /// A request carrying the id of an existing appointment of the same lead
    /// reschedules it; an id owned by another lead is rejected.
    pub async fn book_appointment(
        &self,
        req: &BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, LeadflowError> {
        let phone = req.phone.as_str();
        let mut tx = self.begin().await?;
        if !lock_lead(&mut tx, phone, now).await? {
            return Err(LeadflowError::NotFound(format!("lead {phone}")));
        }

        if let Some(id) = req.appointment_id.as_deref() {
            if let Some(existing) = find_appointment_in(&mut tx, id).await? {
                if existing.customer_phone != phone {
                    return Err(LeadflowError::InvalidInput(format!(
                        "appointment {id} belongs to another lead"
                    )));
                }
                let (outcome, dropped) =
                    reschedule_in(&mut tx, id, phone, req.appointment_date, now).await?;
                commit(tx).await?;
                info!(
                    "rebooked appointment {id} for {phone} at {} ({dropped} old reminders dropped)",
                    format_ts(req.appointment_date)
                );
                return Ok(outcome);
            }
        }

        let id = req.appointment_id.clone().unwrap_or_else(new_id);
        let ts = format_ts(now);
        sqlx::query(
            "INSERT INTO appointments \
             (id, customer_phone, customer_name, customer_email, appointment_date, \
              consultation_type, event_id, status, created_at, updated_at) \
             VALUES (?, ?, COALESCE(?, (SELECT name FROM customer_leads WHERE phone_number = ?)), \
                     ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(phone)
        .bind(&req.name)
        .bind(phone)
        .bind(&req.email)
        .bind(format_ts(req.appointment_date))
        .bind(&req.consultation_type)
        .bind(&req.event_id)
        .bind(AppointmentStatus::Booked.as_str())
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await
        .map_err(|e| LeadflowError::Store(format!("insert appointment failed: {e}")))?;

        sqlx::query(
            "UPDATE customer_leads SET appointment_booked = 1, \
             appointment_event_id = COALESCE(?, appointment_event_id), \
             booking_confirmed_at = ? WHERE phone_number = ?",
        )
        .bind(&req.event_id)
        .bind(&ts)
        .bind(phone)
        .execute(&mut *tx)
        .await
        .map_err(|e| LeadflowError::Store(format!("mark lead booked failed: {e}")))?;

        let appointment = get_appointment_in(&mut tx, &id).await?;
        let reminders = schedule_reminders_in(&mut tx, &appointment, now).await?;
        let appointment = get_appointment_in(&mut tx, &id).await?;
        commit(tx).await?;

        info!(
            "booked appointment {id} for {phone} at {}",
            format_ts(appointment.appointment_date)
        );
        Ok(BookingOutcome {
            appointment,
            reminders,
        })
    }

    /// Cancel an appointment and deactivate its pending reminders.
    ///
    /// Returns how many reminders were deactivated.
    pub async fn cancel_appointment(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, LeadflowError> {
        let appointment = self
            .get_appointment(id)
            .await?
            .ok_or_else(|| LeadflowError::NotFound(format!("appointment {id}")))?;
        let phone = appointment.customer_phone.as_str();

        let mut tx = self.begin().await?;
        lock_lead(&mut tx, phone, now).await?;
        let ts = format_ts(now);
        sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(AppointmentStatus::Cancelled.as_str())
            .bind(&ts)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| LeadflowError::Store(format!("cancel appointment failed: {e}")))?;
        let deactivated =
            deactivate_reminders_in(&mut tx, id, reason::APPOINTMENT_CANCELLED, now).await?;

        sqlx::query(
            "UPDATE customer_leads SET appointment_booked = EXISTS ( \
                 SELECT 1 FROM appointments WHERE customer_phone = ? AND status = 'booked') \
             WHERE phone_number = ?",
        )
        .bind(phone)
        .bind(phone)
        .execute(&mut *tx)
        .await
        .map_err(|e| LeadflowError::Store(format!("update lead booking flag failed: {e}")))?;
        commit(tx).await?;

        info!("cancelled appointment {id} for {phone}, {deactivated} reminders dropped");
        Ok(deactivated)
    }

    /// Move an appointment and recompute its reminders.
    pub async fn reschedule_appointment(
        &self,
        id: &str,
        new_date: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, LeadflowError> {
        let existing = self
            .get_appointment(id)
            .await?
            .ok_or_else(|| LeadflowError::NotFound(format!("appointment {id}")))?;
        let phone = existing.customer_phone.as_str();

        let mut tx = self.begin().await?;
        lock_lead(&mut tx, phone, now).await?;
        let (outcome, dropped) = reschedule_in(&mut tx, id, phone, new_date, now).await?;
        commit(tx).await?;

        info!(
            "rescheduled appointment {id} to {} ({dropped} old reminders dropped)",
            format_ts(new_date)
        );
        Ok(outcome)
    }

    pub async fn get_appointment(&self, id: &str) -> Result<Option<Appointment>, LeadflowError> {
        let row: Option<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("get appointment failed: {e}")))?;
        row.map(Appointment::try_from).transpose()
    }

    pub async fn appointments_for_lead(
        &self,
        phone: &str,
    ) -> Result<Vec<Appointment>, LeadflowError> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            "SELECT {APPOINTMENT_COLUMNS} FROM appointments \
             WHERE customer_phone = ? ORDER BY appointment_date ASC"
        ))
        .bind(phone)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("appointments for lead failed: {e}")))?;
        convert_all(rows)
    }

    pub async fn get_reminder(&self, id: &str) -> Result<Option<Reminder>, LeadflowError> {
        let row: Option<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM appointment_reminders WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("get reminder failed: {e}")))?;
        row.map(Reminder::try_from).transpose()
    }

    /// All reminders ever created for an appointment, in fire order.
    pub async fn reminders_for_appointment(
        &self,
        appointment_id: &str,
    ) -> Result<Vec<Reminder>, LeadflowError> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM appointment_reminders \
             WHERE appointment_id = ? ORDER BY created_at ASC, scheduled_time ASC"
        ))
        .bind(appointment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("reminders for appointment failed: {e}")))?;
        convert_all(rows)
    }

    /// Active, unsent reminders of booked appointments due by `now`.
    pub async fn list_due_reminders(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Reminder>, LeadflowError> {
        let rows: Vec<ReminderRow> = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM appointment_reminders \
             WHERE is_active = 1 AND is_sent = 0 AND scheduled_time <= ? \
             AND appointment_id IN (SELECT id FROM appointments WHERE status = 'booked') \
             ORDER BY scheduled_time ASC, rowid ASC LIMIT ?"
        ))
        .bind(format_ts(now))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LeadflowError::Store(format!("get due reminders failed: {e}")))?;
        convert_all(rows)
    }

    /// Mark a reminder delivered and flag it on its appointment.
    pub async fn complete_reminder(
        &self,
        id: &str,
        sent_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, LeadflowError> {
        let reminder = self
            .get_reminder(id)
            .await?
            .ok_or_else(|| LeadflowError::NotFound(format!("reminder {id}")))?;
        let phone = reminder.customer_phone.as_str();

        let mut tx = self.begin().await?;
        lock_lead(&mut tx, phone, now).await?;
        let cas = mark_sent_in(&mut tx, Schedulable::Reminders, id, sent_at, None).await?;
        if cas == CasOutcome::Applied {
            let flag = match reminder.reminder_type {
                ReminderKind::DayBefore => "reminder_24h_sent",
                ReminderKind::TwoHoursBefore => "reminder_2h_sent",
            };
            sqlx::query(&format!(
                "UPDATE appointments SET {flag} = 1, updated_at = ? WHERE id = ?"
            ))
            .bind(format_ts(now))
            .bind(&reminder.appointment_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| LeadflowError::Store(format!("flag reminder sent failed: {e}")))?;
            sqlx::query(
                "UPDATE customer_leads SET total_messages_sent = total_messages_sent + 1, \
                 last_message_time = ? WHERE phone_number = ?",
            )
            .bind(format_ts(sent_at))
            .bind(phone)
            .execute(&mut *tx)
            .await
            .map_err(|e| LeadflowError::Store(format!("update lead counters failed: {e}")))?;
        }
        commit(tx).await?;
        Ok(cas)
    }

    pub async fn fail_reminder(
        &self,
        id: &str,
        error: &str,
        max_attempts: i64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, LeadflowError> {
        let mut tx = self.begin().await?;
        let outcome =
            record_failure_in(&mut tx, Schedulable::Reminders, id, error, max_attempts, now)
                .await?;
        commit(tx).await?;
        Ok(outcome)
    }

    pub async fn deactivate_reminder(
        &self,
        id: &str,
        why: &str,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, LeadflowError> {
        let mut tx = self.begin().await?;
        let outcome = deactivate_in(&mut tx, Schedulable::Reminders, id, why, now).await?;
        commit(tx).await?;
        Ok(outcome)
    }
}

async fn find_appointment_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Appointment>, LeadflowError> {
    let row: Option<AppointmentRow> = sqlx::query_as(&format!(
        "SELECT {APPOINTMENT_COLUMNS} FROM appointments WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("get appointment failed: {e}")))?;
    row.map(Appointment::try_from).transpose()
}

async fn get_appointment_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Appointment, LeadflowError> {
    find_appointment_in(conn, id)
        .await?
        .ok_or_else(|| LeadflowError::NotFound(format!("appointment {id}")))
}

/// Move an appointment and rebuild its reminders. The caller holds the
/// lead lock. Returns the outcome and how many old reminders were dropped.
async fn reschedule_in(
    conn: &mut SqliteConnection,
    id: &str,
    phone: &str,
    new_date: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(BookingOutcome, u64), LeadflowError> {
    let dropped = deactivate_reminders_in(conn, id, reason::APPOINTMENT_RESCHEDULED, now).await?;
    sqlx::query(
        "UPDATE appointments SET appointment_date = ?, status = ?, \
         reminder_24h_scheduled = NULL, reminder_24h_sent = 0, \
         reminder_2h_scheduled = NULL, reminder_2h_sent = 0, updated_at = ? \
         WHERE id = ?",
    )
    .bind(format_ts(new_date))
    .bind(AppointmentStatus::Booked.as_str())
    .bind(format_ts(now))
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("reschedule appointment failed: {e}")))?;
    sqlx::query("UPDATE customer_leads SET appointment_booked = 1 WHERE phone_number = ?")
        .bind(phone)
        .execute(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("mark lead booked failed: {e}")))?;

    let appointment = get_appointment_in(conn, id).await?;
    let reminders = schedule_reminders_in(conn, &appointment, now).await?;
    let appointment = get_appointment_in(conn, id).await?;
    Ok((
        BookingOutcome {
            appointment,
            reminders,
        },
        dropped,
    ))
}

async fn deactivate_reminders_in(
    conn: &mut SqliteConnection,
    appointment_id: &str,
    why: &str,
    at: DateTime<Utc>,
) -> Result<u64, LeadflowError> {
    let ts = format_ts(at);
    let result = sqlx::query(
        "UPDATE appointment_reminders SET is_active = 0, deactivated_at = ?, \
         deactivation_reason = ?, updated_at = ? \
         WHERE appointment_id = ? AND is_active = 1 AND is_sent = 0",
    )
    .bind(&ts)
    .bind(why)
    .bind(&ts)
    .bind(appointment_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| LeadflowError::Store(format!("deactivate reminders failed: {e}")))?;
    Ok(result.rows_affected())
}

/// Insert one reminder per tier and record the scheduled times on the
/// appointment. Returns the inserted rows in fire order.
async fn schedule_reminders_in(
    conn: &mut SqliteConnection,
    appointment: &Appointment,
    now: DateTime<Utc>,
) -> Result<Vec<Reminder>, LeadflowError> {
    let ts = format_ts(now);
    let mut ids = Vec::with_capacity(ReminderKind::ALL.len());

    for kind in ReminderKind::ALL {
        let scheduled_time = appointment.appointment_date - kind.lead_time();
        let past_due = scheduled_time < now;

        let template = reminder_template_in(conn, kind).await?;
        let (body, template_used) = match &template {
            Some(t) => (
                render_reminder(&t.message_template, appointment),
                Some(t.template_name.as_str()),
            ),
            None => (
                render_reminder(default_reminder_body(kind), appointment),
                None,
            ),
        };

        let id = new_id();
        sqlx::query(
            "INSERT INTO appointment_reminders \
             (id, appointment_id, customer_phone, customer_name, reminder_type, \
              appointment_date, scheduled_time, message_content, template_used, is_active, \
              deactivated_at, deactivation_reason, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&appointment.id)
        .bind(&appointment.customer_phone)
        .bind(&appointment.customer_name)
        .bind(kind.as_str())
        .bind(format_ts(appointment.appointment_date))
        .bind(format_ts(scheduled_time))
        .bind(&body)
        .bind(template_used)
        .bind(!past_due)
        .bind(past_due.then(|| ts.clone()))
        .bind(past_due.then_some(reason::PAST_DUE_AT_BOOKING))
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("insert reminder failed: {e}")))?;

        if past_due {
            warn!(
                "{} reminder for appointment {} was due at {}, stored inactive",
                kind.as_str(),
                appointment.id,
                format_ts(scheduled_time)
            );
        } else {
            let column = match kind {
                ReminderKind::DayBefore => "reminder_24h_scheduled",
                ReminderKind::TwoHoursBefore => "reminder_2h_scheduled",
            };
            sqlx::query(&format!("UPDATE appointments SET {column} = ? WHERE id = ?"))
                .bind(format_ts(scheduled_time))
                .bind(&appointment.id)
                .execute(&mut *conn)
                .await
                .map_err(|e| LeadflowError::Store(format!("record reminder time failed: {e}")))?;
        }
        ids.push(id);
    }

    let mut reminders = Vec::with_capacity(ids.len());
    for id in &ids {
        let row: ReminderRow = sqlx::query_as(&format!(
            "SELECT {REMINDER_COLUMNS} FROM appointment_reminders WHERE id = ?"
        ))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| LeadflowError::Store(format!("reload reminder failed: {e}")))?;
        reminders.push(Reminder::try_from(row)?);
    }
    Ok(reminders)
}
