//! Webhook delivery.
//!
//! [`WebhookNotifier`] posts [`WebhookPayload`]s to registered endpoints,
//! retrying with exponential backoff and recording permanent failures as
//! [`DeadLetterEntry`]s.

mod error;
mod notifier;
mod transport;
mod types;

pub use error::WebhookError;
pub use notifier::WebhookNotifier;
pub use transport::{ReqwestTransport, WebhookTransport};
pub use types::{
    event_type_matches, DeadLetterEntry, PayloadMetadata, WebhookConfig, WebhookOutcome,
    WebhookPayload,
};
