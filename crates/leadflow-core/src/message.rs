//! Events flowing into the engine and reports flowing back from the transport.

use crate::model::{LeadAttributes, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound customer message, already classified upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Lead phone number (stable key).
    pub phone: String,
    /// Sender display name, if the channel knows it.
    #[serde(default)]
    pub name: Option<String>,
    pub received_at: DateTime<Utc>,
    pub content: String,
    /// Intent label from the external classifier.
    #[serde(default)]
    pub detected_intent: Option<String>,
    /// Free-form response category (e.g. "answer", "question").
    #[serde(default)]
    pub response_type: Option<String>,
    /// Stage change decided by the classifier, applied mechanically.
    #[serde(default)]
    pub transition: Option<Transition>,
    /// Qualification answers extracted from the message.
    #[serde(default)]
    pub attributes: LeadAttributes,
    #[serde(default)]
    pub interested: Option<bool>,
    #[serde(default)]
    pub angry_behaviour: bool,
}

/// A consultation booking event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub appointment_id: Option<String>,
    pub phone: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    pub appointment_date: DateTime<Utc>,
    #[serde(default)]
    pub consultation_type: Option<String>,
    /// Calendar event id from the booking system.
    #[serde(default)]
    pub event_id: Option<String>,
}

/// Outcome reported by a transport for one delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub success: bool,
    /// Provider-specific status string (e.g. "queued", "delivered", "rejected").
    pub provider_status: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn delivered(provider_status: impl Into<String>) -> Self {
        Self {
            success: true,
            provider_status: provider_status.into(),
            error: None,
        }
    }

    pub fn rejected(provider_status: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_status: provider_status.into(),
            error: Some(error.into()),
        }
    }
}
