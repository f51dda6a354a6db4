//! Raw row shapes and their conversion into domain records.
//!
//! Rows keep stage and timestamp columns as text; conversion validates them,
//! so a corrupt stage name surfaces as `UnknownStage` instead of a default.

use leadflow_core::{
    error::LeadflowError,
    model::{
        Appointment, AppointmentStatus, CustomerResponse, FollowUp, FollowUpTemplate, Lead,
        LeadAttributes, Reminder, ReminderKind, ReminderTemplate, StageHistoryEntry,
    },
    stage::Stage,
    timefmt::{parse_opt_ts, parse_ts},
};

pub(super) const LEAD_COLUMNS: &str = "phone_number, name, email, current_stage, is_qualified, \
     is_interested, is_disqualified, disqualification_reason, angry_behaviour_detected, \
     total_messages_sent, response_count, last_message_time, last_response_time, \
     last_stage_update, manual_stop_followups, follow_up_enabled, appointment_booked, \
     appointment_event_id, booking_confirmed_at, project_type, budget_range, timeline, \
     location, project_stage, design_preference, created_at";

pub(super) const HISTORY_COLUMNS: &str = "id, customer_phone, stage, entered_at, exited_at, \
     is_current_stage, follow_ups_sent, response_received, stage_completed";

pub(super) const FOLLOW_UP_COLUMNS: &str = "id, customer_phone, customer_name, follow_up_type, \
     follow_up_number, delay_hours, delay_minutes, scheduled_time, stage_when_scheduled, \
     stage_when_sent, message_content, template_used, is_active, is_sent, sent_time, \
     delivery_status, error_message, attempt_count, response_received, \
     customer_response_to_followup, previous_followup_id, deactivated_at, deactivation_reason";

pub(super) const TEMPLATE_COLUMNS: &str = "id, template_name, stage, template_type, \
     follow_up_number, delay_hours, delay_minutes, message_template, is_active";

pub(super) const REMINDER_TEMPLATE_COLUMNS: &str =
    "id, template_name, reminder_type, message_template, is_active";

pub(super) const APPOINTMENT_COLUMNS: &str = "id, customer_phone, customer_name, customer_email, \
     appointment_date, consultation_type, event_id, status, reminder_24h_scheduled, \
     reminder_24h_sent, reminder_2h_scheduled, reminder_2h_sent";

pub(super) const REMINDER_COLUMNS: &str = "id, appointment_id, customer_phone, customer_name, \
     reminder_type, appointment_date, scheduled_time, message_content, template_used, \
     is_active, is_sent, sent_time, delivery_status, error_message, attempt_count, \
     deactivated_at, deactivation_reason";

pub(super) const RESPONSE_COLUMNS: &str = "id, customer_phone, message_content, \
     ai_detected_intent, response_type, stage_at_response, follow_up_cancelled, \
     stage_progressed, created_at";

#[derive(sqlx::FromRow)]
pub(super) struct LeadRow {
    phone_number: String,
    name: Option<String>,
    email: Option<String>,
    current_stage: String,
    is_qualified: bool,
    is_interested: bool,
    is_disqualified: bool,
    disqualification_reason: Option<String>,
    angry_behaviour_detected: bool,
    total_messages_sent: i64,
    response_count: i64,
    last_message_time: Option<String>,
    last_response_time: Option<String>,
    last_stage_update: Option<String>,
    manual_stop_followups: bool,
    follow_up_enabled: bool,
    appointment_booked: bool,
    appointment_event_id: Option<String>,
    booking_confirmed_at: Option<String>,
    project_type: Option<String>,
    budget_range: Option<String>,
    timeline: Option<String>,
    location: Option<String>,
    project_stage: Option<String>,
    design_preference: Option<String>,
    created_at: String,
}

impl TryFrom<LeadRow> for Lead {
    type Error = LeadflowError;

    fn try_from(r: LeadRow) -> Result<Self, Self::Error> {
        Ok(Lead {
            current_stage: r.current_stage.parse::<Stage>()?,
            last_message_time: parse_opt_ts(r.last_message_time.as_deref())?,
            last_response_time: parse_opt_ts(r.last_response_time.as_deref())?,
            last_stage_update: parse_opt_ts(r.last_stage_update.as_deref())?,
            booking_confirmed_at: parse_opt_ts(r.booking_confirmed_at.as_deref())?,
            created_at: parse_ts(&r.created_at)?,
            phone_number: r.phone_number,
            name: r.name,
            is_qualified: r.is_qualified,
            is_interested: r.is_interested,
            is_disqualified: r.is_disqualified,
            disqualification_reason: r.disqualification_reason,
            angry_behaviour_detected: r.angry_behaviour_detected,
            total_messages_sent: r.total_messages_sent,
            response_count: r.response_count,
            manual_stop_followups: r.manual_stop_followups,
            follow_up_enabled: r.follow_up_enabled,
            appointment_booked: r.appointment_booked,
            appointment_event_id: r.appointment_event_id,
            attributes: LeadAttributes {
                email: r.email,
                project_type: r.project_type,
                budget_range: r.budget_range,
                timeline: r.timeline,
                location: r.location,
                project_stage: r.project_stage,
                design_preference: r.design_preference,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct HistoryRow {
    id: String,
    customer_phone: String,
    stage: String,
    entered_at: String,
    exited_at: Option<String>,
    is_current_stage: bool,
    follow_ups_sent: i64,
    response_received: bool,
    stage_completed: bool,
}

impl TryFrom<HistoryRow> for StageHistoryEntry {
    type Error = LeadflowError;

    fn try_from(r: HistoryRow) -> Result<Self, Self::Error> {
        Ok(StageHistoryEntry {
            stage: r.stage.parse::<Stage>()?,
            entered_at: parse_ts(&r.entered_at)?,
            exited_at: parse_opt_ts(r.exited_at.as_deref())?,
            id: r.id,
            customer_phone: r.customer_phone,
            is_current_stage: r.is_current_stage,
            follow_ups_sent: r.follow_ups_sent,
            response_received: r.response_received,
            stage_completed: r.stage_completed,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct FollowUpRow {
    id: String,
    customer_phone: String,
    customer_name: Option<String>,
    follow_up_type: String,
    follow_up_number: i64,
    delay_hours: i64,
    delay_minutes: i64,
    scheduled_time: String,
    stage_when_scheduled: String,
    stage_when_sent: Option<String>,
    message_content: String,
    template_used: Option<String>,
    is_active: bool,
    is_sent: bool,
    sent_time: Option<String>,
    delivery_status: String,
    error_message: Option<String>,
    attempt_count: i64,
    response_received: bool,
    customer_response_to_followup: bool,
    previous_followup_id: Option<String>,
    deactivated_at: Option<String>,
    deactivation_reason: Option<String>,
}

impl TryFrom<FollowUpRow> for FollowUp {
    type Error = LeadflowError;

    fn try_from(r: FollowUpRow) -> Result<Self, Self::Error> {
        Ok(FollowUp {
            scheduled_time: parse_ts(&r.scheduled_time)?,
            stage_when_scheduled: r.stage_when_scheduled.parse::<Stage>()?,
            stage_when_sent: r
                .stage_when_sent
                .as_deref()
                .map(str::parse::<Stage>)
                .transpose()?,
            sent_time: parse_opt_ts(r.sent_time.as_deref())?,
            deactivated_at: parse_opt_ts(r.deactivated_at.as_deref())?,
            id: r.id,
            customer_phone: r.customer_phone,
            customer_name: r.customer_name,
            follow_up_type: r.follow_up_type,
            follow_up_number: r.follow_up_number,
            delay_hours: r.delay_hours,
            delay_minutes: r.delay_minutes,
            message_content: r.message_content,
            template_used: r.template_used,
            is_active: r.is_active,
            is_sent: r.is_sent,
            delivery_status: r.delivery_status,
            error_message: r.error_message,
            attempt_count: r.attempt_count,
            response_received: r.response_received,
            customer_response_to_followup: r.customer_response_to_followup,
            previous_followup_id: r.previous_followup_id,
            deactivation_reason: r.deactivation_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct TemplateRow {
    id: String,
    template_name: String,
    stage: String,
    template_type: String,
    follow_up_number: i64,
    delay_hours: i64,
    delay_minutes: i64,
    message_template: String,
    is_active: bool,
}

impl TryFrom<TemplateRow> for FollowUpTemplate {
    type Error = LeadflowError;

    fn try_from(r: TemplateRow) -> Result<Self, Self::Error> {
        Ok(FollowUpTemplate {
            stage: r.stage.parse::<Stage>()?,
            id: r.id,
            template_name: r.template_name,
            template_type: r.template_type,
            follow_up_number: r.follow_up_number,
            delay_hours: r.delay_hours,
            delay_minutes: r.delay_minutes,
            message_template: r.message_template,
            is_active: r.is_active,
        })
    }
}

fn parse_reminder_kind(raw: &str) -> Result<ReminderKind, LeadflowError> {
    ReminderKind::parse(raw)
        .ok_or_else(|| LeadflowError::Store(format!("unknown reminder type: {raw}")))
}

#[derive(sqlx::FromRow)]
pub(super) struct ReminderTemplateRow {
    id: String,
    template_name: String,
    reminder_type: String,
    message_template: String,
    is_active: bool,
}

impl TryFrom<ReminderTemplateRow> for ReminderTemplate {
    type Error = LeadflowError;

    fn try_from(r: ReminderTemplateRow) -> Result<Self, Self::Error> {
        Ok(ReminderTemplate {
            reminder_type: parse_reminder_kind(&r.reminder_type)?,
            id: r.id,
            template_name: r.template_name,
            message_template: r.message_template,
            is_active: r.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct AppointmentRow {
    id: String,
    customer_phone: String,
    customer_name: Option<String>,
    customer_email: Option<String>,
    appointment_date: String,
    consultation_type: Option<String>,
    event_id: Option<String>,
    status: String,
    reminder_24h_scheduled: Option<String>,
    reminder_24h_sent: bool,
    reminder_2h_scheduled: Option<String>,
    reminder_2h_sent: bool,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = LeadflowError;

    fn try_from(r: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            appointment_date: parse_ts(&r.appointment_date)?,
            status: AppointmentStatus::parse(&r.status).ok_or_else(|| {
                LeadflowError::Store(format!("unknown appointment status: {}", r.status))
            })?,
            reminder_24h_scheduled: parse_opt_ts(r.reminder_24h_scheduled.as_deref())?,
            reminder_2h_scheduled: parse_opt_ts(r.reminder_2h_scheduled.as_deref())?,
            id: r.id,
            customer_phone: r.customer_phone,
            customer_name: r.customer_name,
            customer_email: r.customer_email,
            consultation_type: r.consultation_type,
            event_id: r.event_id,
            reminder_24h_sent: r.reminder_24h_sent,
            reminder_2h_sent: r.reminder_2h_sent,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct ReminderRow {
    id: String,
    appointment_id: String,
    customer_phone: String,
    customer_name: Option<String>,
    reminder_type: String,
    appointment_date: String,
    scheduled_time: String,
    message_content: String,
    template_used: Option<String>,
    is_active: bool,
    is_sent: bool,
    sent_time: Option<String>,
    delivery_status: String,
    error_message: Option<String>,
    attempt_count: i64,
    deactivated_at: Option<String>,
    deactivation_reason: Option<String>,
}

impl TryFrom<ReminderRow> for Reminder {
    type Error = LeadflowError;

    fn try_from(r: ReminderRow) -> Result<Self, Self::Error> {
        Ok(Reminder {
            reminder_type: parse_reminder_kind(&r.reminder_type)?,
            appointment_date: parse_ts(&r.appointment_date)?,
            scheduled_time: parse_ts(&r.scheduled_time)?,
            sent_time: parse_opt_ts(r.sent_time.as_deref())?,
            deactivated_at: parse_opt_ts(r.deactivated_at.as_deref())?,
            id: r.id,
            appointment_id: r.appointment_id,
            customer_phone: r.customer_phone,
            customer_name: r.customer_name,
            message_content: r.message_content,
            template_used: r.template_used,
            is_active: r.is_active,
            is_sent: r.is_sent,
            delivery_status: r.delivery_status,
            error_message: r.error_message,
            attempt_count: r.attempt_count,
            deactivation_reason: r.deactivation_reason,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct ResponseRow {
    id: String,
    customer_phone: String,
    message_content: String,
    ai_detected_intent: Option<String>,
    response_type: Option<String>,
    stage_at_response: String,
    follow_up_cancelled: bool,
    stage_progressed: bool,
    created_at: String,
}

impl TryFrom<ResponseRow> for CustomerResponse {
    type Error = LeadflowError;

    fn try_from(r: ResponseRow) -> Result<Self, Self::Error> {
        Ok(CustomerResponse {
            stage_at_response: r.stage_at_response.parse::<Stage>()?,
            created_at: parse_ts(&r.created_at)?,
            id: r.id,
            customer_phone: r.customer_phone,
            message_content: r.message_content,
            ai_detected_intent: r.ai_detected_intent,
            response_type: r.response_type,
            follow_up_cancelled: r.follow_up_cancelled,
            stage_progressed: r.stage_progressed,
        })
    }
}

/// Convert a batch of rows, failing on the first bad one.
pub(super) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, LeadflowError>
where
    T: TryFrom<R, Error = LeadflowError>,
{
    rows.into_iter().map(T::try_from).collect()
}
