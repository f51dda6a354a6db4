//! Dry-run transport: logs the message and reports it delivered.

use async_trait::async_trait;
use leadflow_core::{error::LeadflowError, message::DeliveryReport, traits::Transport};
use tracing::info;

pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, phone: &str, message: &str) -> Result<DeliveryReport, LeadflowError> {
        info!("[dry-run] to {phone}: {message}");
        Ok(DeliveryReport::delivered("logged"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_transport_always_delivers() {
        let report = LogTransport.deliver("+1555", "hello").await.unwrap();
        assert!(report.success);
        assert_eq!(report.provider_status, "logged");
        assert!(report.error.is_none());
    }
}
