//! Webhook registration and wire types.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One registered delivery target.
///
/// Deserializes from snake_case (TOML) or camelCase (HTTP API) field names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    #[serde(default = "generate_id")]
    pub id: String,
    pub url: String,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries", alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms", alias = "retryDelayMs")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_retry_multiplier", alias = "retryMultiplier")]
    pub retry_multiplier: f64,
    #[serde(default = "default_timeout_ms", alias = "timeoutMs")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Event-type filters. Empty subscribes to everything.
    #[serde(default)]
    pub events: Vec<String>,
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_retry_multiplier() -> f64 {
    2.0
}

fn default_timeout_ms() -> u64 {
    5000
}

impl WebhookConfig {
    /// Webhook with default retry policy, subscribed to every event.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            url: url.into(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            timeout_ms: default_timeout_ms(),
            headers: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `retry_delay_ms * retry_multiplier^(retry - 1)`, so the defaults wait
    /// 1s, 2s, 4s.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.retry_delay_ms as f64 * self.retry_multiplier.max(0.0).powi(exponent);
        if millis.is_finite() {
            Duration::from_millis(millis.min(u64::MAX as f64) as u64)
        } else {
            Duration::from_millis(u64::MAX)
        }
    }

    /// Total attempts including the first.
    #[must_use]
    pub fn total_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether this webhook receives `event_type`.
    #[must_use]
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.is_empty()
            || self
                .events
                .iter()
                .any(|filter| event_type_matches(filter, event_type))
    }
}

/// Hierarchical event-type match.
///
/// `*` matches everything, an exact name matches itself, and a prefix matches
/// at a `:` boundary (`event` matches `event:damage:dealt`, `event:damage`
/// matches `event:damage:received`).
#[must_use]
pub fn event_type_matches(filter: &str, event_type: &str) -> bool {
    if filter == "*" || filter == event_type {
        return true;
    }
    event_type
        .strip_prefix(filter)
        .is_some_and(|rest| rest.starts_with(':'))
}

/// Context attached to every payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadMetadata {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// JSON body posted to webhooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    pub metadata: PayloadMetadata,
}

impl WebhookPayload {
    /// Payload stamped with the current time.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        data: serde_json::Value,
        metadata: PayloadMetadata,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
            metadata,
        }
    }
}

/// A delivery that exhausted every attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEntry {
    pub webhook: WebhookConfig,
    pub payload: WebhookPayload,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
}

/// Result of one delivery, broadcast to notifier subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum WebhookOutcome {
    Delivered {
        webhook_id: String,
        event_type: String,
        attempts: u32,
    },
    Failed {
        webhook_id: String,
        event_type: String,
        attempts: u32,
        error: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let webhook = WebhookConfig::new("http://localhost/hook");
        assert_eq!(webhook.max_retries, 3);
        assert_eq!(webhook.retry_delay_ms, 1000);
        assert!((webhook.retry_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(webhook.timeout_ms, 5000);
        assert_eq!(webhook.total_attempts(), 4);
        assert!(!webhook.id.is_empty());
    }

    #[test]
    fn test_retry_delay_is_exponential() {
        let webhook = WebhookConfig::new("http://localhost/hook");
        assert_eq!(webhook.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(webhook.retry_delay(2), Duration::from_millis(2000));
        assert_eq!(webhook.retry_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_retry_delay_constant_with_unit_multiplier() {
        let webhook = WebhookConfig {
            retry_multiplier: 1.0,
            retry_delay_ms: 250,
            ..WebhookConfig::new("http://localhost/hook")
        };
        assert_eq!(webhook.retry_delay(5), Duration::from_millis(250));
    }

    #[test]
    fn test_event_type_matches() {
        assert!(event_type_matches("*", "session:end"));
        assert!(event_type_matches("session:end", "session:end"));
        assert!(event_type_matches("event", "event:damage:dealt"));
        assert!(event_type_matches("event:damage", "event:damage:received"));
        assert!(!event_type_matches("event:damage", "event:death"));
        assert!(!event_type_matches("session", "sessions:end"));
        assert!(!event_type_matches("session:end", "session"));
    }

    #[test]
    fn test_empty_filter_subscribes_to_all() {
        let all = WebhookConfig::new("http://localhost/hook");
        assert!(all.subscribes_to("file:rotate"));

        let sessions = all.with_events(["session:end", "event:death"]);
        assert!(sessions.subscribes_to("session:end"));
        assert!(sessions.subscribes_to("event:death"));
        assert!(!sessions.subscribes_to("session:update"));
    }

    #[test]
    fn test_deserialize_camel_case_body() {
        let json = r#"{"url":"http://x/hook","maxRetries":1,"retryDelayMs":10,"events":["session"]}"#;
        let webhook: WebhookConfig = serde_json::from_str(json).unwrap();
        assert_eq!(webhook.max_retries, 1);
        assert_eq!(webhook.retry_delay_ms, 10);
        assert_eq!(webhook.timeout_ms, 5000);
        assert_eq!(webhook.events, vec!["session".to_string()]);
    }

    #[test]
    fn test_payload_wire_format() {
        let payload = WebhookPayload::new(
            "session:end",
            serde_json::json!({"id": "abc"}),
            PayloadMetadata {
                filename: "chat.log".to_string(),
                line_number: None,
                session_id: Some("abc".to_string()),
            },
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["eventType"], "session:end");
        assert_eq!(json["metadata"]["sessionId"], "abc");
        assert!(json["metadata"].get("lineNumber").is_none());
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
