use crate::{error::LeadflowError, message::DeliveryReport};
use async_trait::async_trait;

/// Outbound message transport. The only call the engine makes outward.
///
/// Every delivery backend (WhatsApp gateway webhook, dry-run logger, test
/// doubles) implements this trait. An `Err` and a report with
/// `success == false` are both treated as a failed attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable transport name.
    fn name(&self) -> &str;

    /// Deliver a rendered message to a phone number.
    async fn deliver(&self, phone: &str, message: &str) -> Result<DeliveryReport, LeadflowError>;
}
