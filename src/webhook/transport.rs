//! Outbound HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::{WebhookConfig, WebhookError};

/// Connection timeout for webhook requests. The per-webhook timeout bounds the whole attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Sends one delivery attempt.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` to the webhook. Success means a 2xx response.
    async fn post(&self, webhook: &WebhookConfig, body: &[u8]) -> Result<(), WebhookError>;
}

/// Build the shared HTTP client, falling back to defaults if the builder fails.
fn build_http_client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("combat-monitor/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
            Client::new()
        })
}

/// `reqwest`-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: build_http_client(),
        }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post(&self, webhook: &WebhookConfig, body: &[u8]) -> Result<(), WebhookError> {
        let mut request = self
            .client
            .post(&webhook.url)
            .timeout(webhook.timeout())
            .header(CONTENT_TYPE, "application/json");
        for (name, value) in &webhook.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.body(body.to_vec()).send().await.map_err(|e| {
            if e.is_timeout() {
                WebhookError::Timeout(webhook.timeout_ms)
            } else {
                WebhookError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WebhookError::Status {
                status: status.as_u16(),
            })
        }
    }
}
