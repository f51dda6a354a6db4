//! HTTP webhook transport.
//!
//! POSTs `{"phone": ..., "message": ...}` to a messaging gateway. A 2xx reply
//! is a delivery; any other status is a rejected attempt; a connection error
//! or timeout is a transport error.

use async_trait::async_trait;
use leadflow_core::{error::LeadflowError, message::DeliveryReport, traits::Transport};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct WebhookTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl WebhookTransport {
    pub fn new(url: String, api_key: String, timeout: Duration) -> Result<Self, LeadflowError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LeadflowError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self {
            client,
            url,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct SendRequest<'a> {
    phone: &'a str,
    message: &'a str,
}

/// Optional JSON body returned by the gateway.
#[derive(Deserialize, Default)]
struct SendResponse {
    #[serde(default)]
    status: Option<String>,
}

#[async_trait]
impl Transport for WebhookTransport {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, phone: &str, message: &str) -> Result<DeliveryReport, LeadflowError> {
        let start = Instant::now();
        let mut req = self
            .client
            .post(&self.url)
            .json(&SendRequest { phone, message });
        if !self.api_key.is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| LeadflowError::Transport(format!("webhook request failed: {e}")))?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        debug!(
            "webhook: {phone} -> {status} in {}ms",
            start.elapsed().as_millis()
        );

        if !status.is_success() {
            warn!("webhook rejected message to {phone}: {status} {text}");
            return Ok(DeliveryReport::rejected(
                status.as_u16().to_string(),
                format!("gateway returned {status}: {}", truncate(&text, 200)),
            ));
        }

        let parsed: SendResponse = serde_json::from_str(&text).unwrap_or_default();
        Ok(DeliveryReport::delivered(
            parsed.status.unwrap_or_else(|| "accepted".to_string()),
        ))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request.
    async fn one_shot_server(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/send", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (url, handle)
    }

    #[tokio::test]
    async fn test_webhook_delivers_with_auth() {
        let (url, server) = one_shot_server("200 OK", r#"{"status":"queued"}"#).await;
        let t = WebhookTransport::new(url, "secret".into(), Duration::from_secs(5)).unwrap();

        let report = t.deliver("+353871234567", "Hi there").await.unwrap();
        assert!(report.success);
        assert_eq!(report.provider_status, "queued");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /send"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer secret"));
        assert!(request.contains(r#""phone":"+353871234567""#));
        assert!(request.contains(r#""message":"Hi there""#));
    }

    #[tokio::test]
    async fn test_webhook_non_json_success_is_accepted() {
        let (url, server) = one_shot_server("202 Accepted", "ok").await;
        let t = WebhookTransport::new(url, String::new(), Duration::from_secs(5)).unwrap();
        let report = t.deliver("+1555", "hello").await.unwrap();
        assert!(report.success);
        assert_eq!(report.provider_status, "accepted");
        let request = server.await.unwrap();
        assert!(!request.to_ascii_lowercase().contains("authorization:"));
    }

    #[tokio::test]
    async fn test_webhook_error_status_is_rejection() {
        let (url, server) =
            one_shot_server("503 Service Unavailable", r#"{"error":"busy"}"#).await;
        let t = WebhookTransport::new(url, String::new(), Duration::from_secs(5)).unwrap();
        let report = t.deliver("+1555", "hello").await.unwrap();
        assert!(!report.success);
        assert_eq!(report.provider_status, "503");
        assert!(report.error.unwrap().contains("busy"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_unreachable_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/send", listener.local_addr().unwrap());
        drop(listener);
        let t = WebhookTransport::new(url, String::new(), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            t.deliver("+1555", "hello").await,
            Err(LeadflowError::Transport(_))
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
