//! Domain records shared by the store, the engine, and the API.

use crate::stage::Stage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Deactivation reasons written to `follow_ups` / `appointment_reminders`.
pub mod reason {
    pub const CUSTOMER_RESPONDED: &str = "customer_responded";
    pub const STAGE_ADVANCED: &str = "stage_advanced";
    pub const MANUAL_STOP: &str = "manual_stop";
    pub const DELIVERY_EXHAUSTED: &str = "delivery_exhausted";
    pub const PAST_DUE_AT_BOOKING: &str = "past_due_at_booking";
    pub const APPOINTMENT_CANCELLED: &str = "appointment_cancelled";
    pub const APPOINTMENT_RESCHEDULED: &str = "appointment_rescheduled";
    pub const LEAD_OPTED_OUT: &str = "lead_opted_out";
}

/// Delivery status values.
pub mod delivery {
    pub const PENDING: &str = "pending";
    pub const SENT: &str = "sent";
    pub const FAILED: &str = "failed";
}

/// Free-form project attributes. Display only; the engine never reads them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LeadAttributes {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub budget_range: Option<String>,
    #[serde(default)]
    pub timeline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub project_stage: Option<String>,
    #[serde(default)]
    pub design_preference: Option<String>,
}

impl LeadAttributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One customer's journey through the pipeline, keyed by phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub phone_number: String,
    pub name: Option<String>,
    pub current_stage: Stage,
    pub is_qualified: bool,
    pub is_interested: bool,
    pub is_disqualified: bool,
    pub disqualification_reason: Option<String>,
    pub angry_behaviour_detected: bool,
    pub total_messages_sent: i64,
    pub response_count: i64,
    pub last_message_time: Option<DateTime<Utc>>,
    pub last_response_time: Option<DateTime<Utc>>,
    pub last_stage_update: Option<DateTime<Utc>>,
    pub manual_stop_followups: bool,
    pub follow_up_enabled: bool,
    pub appointment_booked: bool,
    pub appointment_event_id: Option<String>,
    pub booking_confirmed_at: Option<DateTime<Utc>>,
    pub attributes: LeadAttributes,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Whether the lead accepts automated follow-ups right now.
    pub fn accepts_follow_ups(&self) -> bool {
        self.follow_up_enabled && !self.manual_stop_followups
    }

    /// Name used in rendered messages.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => "there",
        }
    }
}

/// One stage entry/exit in a lead's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageHistoryEntry {
    pub id: String,
    pub customer_phone: String,
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
    pub exited_at: Option<DateTime<Utc>>,
    pub is_current_stage: bool,
    pub follow_ups_sent: i64,
    pub response_received: bool,
    pub stage_completed: bool,
}

/// A scheduled follow-up message in a (stage, campaign) chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: String,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub follow_up_type: String,
    pub follow_up_number: i64,
    pub delay_hours: i64,
    pub delay_minutes: i64,
    pub scheduled_time: DateTime<Utc>,
    pub stage_when_scheduled: Stage,
    pub stage_when_sent: Option<Stage>,
    pub message_content: String,
    pub template_used: Option<String>,
    pub is_active: bool,
    pub is_sent: bool,
    pub sent_time: Option<DateTime<Utc>>,
    pub delivery_status: String,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub response_received: bool,
    pub customer_response_to_followup: bool,
    pub previous_followup_id: Option<String>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<String>,
}

/// Admin-managed follow-up template. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTemplate {
    pub id: String,
    pub template_name: String,
    pub stage: Stage,
    pub template_type: String,
    pub follow_up_number: i64,
    pub delay_hours: i64,
    #[serde(default)]
    pub delay_minutes: i64,
    pub message_template: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Longest delay a follow-up template may carry (one year).
pub const MAX_TEMPLATE_DELAY_HOURS: i64 = 24 * 366;

impl FollowUpTemplate {
    /// Total delay, or `None` when the fields do not fit a `Duration`.
    pub fn delay(&self) -> Option<Duration> {
        Duration::try_hours(self.delay_hours)?
            .checked_add(&Duration::try_minutes(self.delay_minutes)?)
    }

    /// Whether the delay is non-negative and within `MAX_TEMPLATE_DELAY_HOURS`.
    pub fn delay_in_range(&self) -> bool {
        let max_minutes = MAX_TEMPLATE_DELAY_HOURS * 60;
        (0..=MAX_TEMPLATE_DELAY_HOURS).contains(&self.delay_hours)
            && (0..=max_minutes).contains(&self.delay_minutes)
            && self.delay_hours * 60 + self.delay_minutes <= max_minutes
    }
}

/// Admin-managed reminder template, keyed by reminder type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderTemplate {
    pub id: String,
    pub template_name: String,
    pub reminder_type: ReminderKind,
    pub message_template: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// The two reminder tiers scheduled per appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderKind {
    #[serde(rename = "24h")]
    DayBefore,
    #[serde(rename = "2h")]
    TwoHoursBefore,
}

impl ReminderKind {
    pub const ALL: [ReminderKind; 2] = [ReminderKind::DayBefore, ReminderKind::TwoHoursBefore];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DayBefore => "24h",
            Self::TwoHoursBefore => "2h",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "24h" => Some(Self::DayBefore),
            "2h" => Some(Self::TwoHoursBefore),
            _ => None,
        }
    }

    /// How long before the appointment this reminder fires.
    pub fn lead_time(&self) -> Duration {
        match self {
            Self::DayBefore => Duration::hours(24),
            Self::TwoHoursBefore => Duration::hours(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Booked,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "booked" => Some(Self::Booked),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A booked consultation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: String,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub appointment_date: DateTime<Utc>,
    pub consultation_type: Option<String>,
    pub event_id: Option<String>,
    pub status: AppointmentStatus,
    pub reminder_24h_scheduled: Option<DateTime<Utc>>,
    pub reminder_24h_sent: bool,
    pub reminder_2h_scheduled: Option<DateTime<Utc>>,
    pub reminder_2h_sent: bool,
}

/// A one-shot reminder tied to an appointment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: String,
    pub appointment_id: String,
    pub customer_phone: String,
    pub customer_name: Option<String>,
    pub reminder_type: ReminderKind,
    pub appointment_date: DateTime<Utc>,
    pub scheduled_time: DateTime<Utc>,
    pub message_content: String,
    pub template_used: Option<String>,
    pub is_active: bool,
    pub is_sent: bool,
    pub sent_time: Option<DateTime<Utc>>,
    pub delivery_status: String,
    pub error_message: Option<String>,
    pub attempt_count: i64,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub deactivation_reason: Option<String>,
}

/// An inbound customer message as recorded in `customer_responses`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerResponse {
    pub id: String,
    pub customer_phone: String,
    pub message_content: String,
    pub ai_detected_intent: Option<String>,
    pub response_type: Option<String>,
    pub stage_at_response: Stage,
    pub follow_up_cancelled: bool,
    pub stage_progressed: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of asking the follow-up scheduler for the next item in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// A new follow-up row was inserted. `clamped` means the computed time
    /// was past the grace window and moved to "now".
    Scheduled {
        id: String,
        follow_up_number: i64,
        scheduled_time: DateTime<Utc>,
        clamped: bool,
    },
    /// An active unsent follow-up already exists for the chain.
    Duplicate { id: String },
    /// No active template continues the chain.
    NoTemplate,
    /// The lead has follow-ups disabled or manually stopped.
    OptedOut,
}

/// Result of a guarded (compare-and-set) row update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CasOutcome {
    Applied,
    /// Zero rows matched the expected state; another actor got there first.
    Stale,
}

impl CasOutcome {
    pub fn from_rows(rows: u64) -> Self {
        if rows > 0 {
            Self::Applied
        } else {
            Self::Stale
        }
    }
}

/// Result of recording a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    /// Still due; the next tick retries it.
    WillRetry { attempts: i64 },
    /// Hit the attempt bound and was deactivated.
    Exhausted { attempts: i64 },
    /// The row was no longer active/unsent.
    Stale,
}

/// A mechanical stage transition applied on top of a lead's current stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// Move to the successor stage.
    Next,
    /// Jump forward to a specific stage.
    To { stage: Stage },
    /// Move to `disqualified`.
    Disqualify { reason: String },
}

impl Transition {
    /// Resolve the target stage for a lead currently at `current`.
    pub fn target(&self, current: Stage) -> Option<Stage> {
        match self {
            Self::Next => current.next(),
            Self::To { stage } => Some(*stage),
            Self::Disqualify { .. } => Some(Stage::Disqualified),
        }
    }
}

/// What a stage transition did.
#[derive(Debug, Clone, Serialize)]
pub struct StageChange {
    pub from: Stage,
    pub to: Stage,
    pub deactivated_follow_ups: u64,
    pub schedule: ScheduleOutcome,
}

/// Dashboard filter for lead lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    #[serde(default)]
    pub stage: Option<Stage>,
    #[serde(default)]
    pub qualified: Option<bool>,
    #[serde(default)]
    pub appointment_booked: Option<bool>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub order: LeadOrder,
}

/// Sort order for lead lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadOrder {
    #[default]
    LastMessageDesc,
    CreatedDesc,
    NameAsc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCount {
    pub stage: Stage,
    pub count: i64,
}

/// Per-campaign delivery totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowUpAnalytics {
    pub follow_up_type: String,
    pub follow_up_number: i64,
    pub total_sent: i64,
    pub successful: i64,
    pub failed: i64,
}

/// Aggregate KPIs for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub total_leads: i64,
    pub qualified_leads: i64,
    pub pending_follow_ups: i64,
    pub pending_reminders: i64,
    pub stage_distribution: Vec<StageCount>,
    pub recent_stage_changes: Vec<StageHistoryEntry>,
}

/// A lead with its ledger and follow-ups.
#[derive(Debug, Clone, Serialize)]
pub struct LeadDetail {
    pub lead: Lead,
    pub history: Vec<StageHistoryEntry>,
    pub follow_ups: Vec<FollowUp>,
}
