//! Webhook error types.

/// Errors raised while registering or delivering webhooks.
#[derive(thiserror::Error, Debug)]
pub enum WebhookError {
    /// URL could not be parsed.
    #[error("Invalid webhook URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// URL parsed but is not http or https.
    #[error("Unsupported webhook URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Endpoint answered with a non-2xx status.
    #[error("Webhook endpoint returned HTTP {status}")]
    Status { status: u16 },

    /// Attempt exceeded its timeout.
    #[error("Webhook request timed out after {0}ms")]
    Timeout(u64),

    /// Network-level failure.
    #[error("Webhook request failed: {0}")]
    RequestFailed(String),

    /// Payload could not be encoded.
    #[error("Failed to serialize webhook payload: {0}")]
    Serialize(#[from] serde_json::Error),
}
