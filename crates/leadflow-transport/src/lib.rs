//! # leadflow-transport
//!
//! Outbound message transports for the dispatch worker.

pub mod log;
pub mod webhook;

use leadflow_core::{config::TransportConfig, error::LeadflowError, traits::Transport};
use std::sync::Arc;
use std::time::Duration;

pub use self::log::LogTransport;
pub use webhook::WebhookTransport;

/// Build the transport named by `[transport] kind`.
pub fn build_transport(
    cfg: &TransportConfig,
    timeout: Duration,
) -> Result<Arc<dyn Transport>, LeadflowError> {
    match cfg.kind.as_str() {
        "log" => Ok(Arc::new(LogTransport)),
        "webhook" => {
            let api_key = if cfg.api_key.is_empty() {
                std::env::var("LEADFLOW_TRANSPORT_KEY").unwrap_or_default()
            } else {
                cfg.api_key.clone()
            };
            Ok(Arc::new(WebhookTransport::new(
                cfg.webhook_url.clone(),
                api_key,
                timeout,
            )?))
        }
        other => Err(LeadflowError::Config(format!(
            "unknown transport kind: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_log_transport() {
        let t = build_transport(&TransportConfig::default(), Duration::from_secs(5)).unwrap();
        assert_eq!(t.name(), "log");
    }

    #[test]
    fn test_build_webhook_transport() {
        let cfg = TransportConfig {
            kind: "webhook".into(),
            webhook_url: "http://127.0.0.1:1/send".into(),
            api_key: "secret".into(),
        };
        let t = build_transport(&cfg, Duration::from_secs(5)).unwrap();
        assert_eq!(t.name(), "webhook");
    }

    #[test]
    fn test_build_unknown_transport() {
        let cfg = TransportConfig {
            kind: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(matches!(
            build_transport(&cfg, Duration::from_secs(5)),
            Err(LeadflowError::Config(_))
        ));
    }
}
