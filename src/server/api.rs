//! Request and response bodies for the HTTP endpoints.

use serde::{Deserialize, Serialize};

use crate::watcher::TailPosition;

/// Response for lifecycle commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: String,
    /// Position after the command, when it has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<TailPosition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandResponse {
    #[must_use]
    pub fn success(message: impl Into<String>, position: TailPosition) -> Self {
        Self {
            success: true,
            message: message.into(),
            position: Some(position),
            error: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            position: None,
            error: Some(error.into()),
        }
    }
}

/// Query parameters for GET /api/events.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated notification filters, e.g. `event:death,session`.
    #[serde(default)]
    pub types: Option<String>,
}

impl EventsQuery {
    /// Parsed filters. Empty means every notification.
    #[must_use]
    pub fn filters(&self) -> Vec<String> {
        self.types
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

/// Response for POST /api/webhooks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCreated {
    pub id: String,
}
