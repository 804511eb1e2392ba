//! Notifications and status snapshots exposed by the monitor.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::MonitorState;
use crate::config::LogTailerConfig;
use crate::parser::CombatEvent;
use crate::session::{SessionSummary, SessionUpdate};
use crate::watcher::{FileChangeEvent, StartPosition, TailLine, TailPosition, WatchMode};
use crate::webhook::{event_type_matches, PayloadMetadata, WebhookPayload};

/// One typed notification from the monitor.
///
/// Every variant has a notification name (see [`MonitorEvent::event_type`]);
/// the serialized form is the variant's data only.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MonitorEvent {
    Line(TailLine),
    Event(CombatEvent),
    Session(SessionUpdate),
    FileChange(FileChangeEvent),
    FileRotate(FileChangeEvent),
    Started {
        filename: PathBuf,
        position: TailPosition,
    },
    Stopped {
        position: TailPosition,
    },
    Paused {
        position: TailPosition,
    },
    Resumed {
        position: TailPosition,
    },
    /// Unrecoverable failure, e.g. the file could not be opened at start.
    MonitorError {
        message: String,
    },
    /// Recoverable failure. The loop keeps running.
    Error {
        message: String,
        #[serde(rename = "lineNumber", skip_serializing_if = "Option::is_none")]
        line_number: Option<u64>,
    },
}

impl MonitorEvent {
    /// Notification name: `line`, `event:<category>`, `session:start`,
    /// `file:rotate`, `monitor:paused`, `error` and so on.
    #[must_use]
    pub fn event_type(&self) -> String {
        match self {
            Self::Line(_) => "line".to_string(),
            Self::Event(event) => event.event_type(),
            Self::Session(update) => update.event_type().to_string(),
            Self::FileChange(_) => "file:change".to_string(),
            Self::FileRotate(_) => "file:rotate".to_string(),
            Self::Started { .. } => "monitor:started".to_string(),
            Self::Stopped { .. } => "monitor:stopped".to_string(),
            Self::Paused { .. } => "monitor:paused".to_string(),
            Self::Resumed { .. } => "monitor:resumed".to_string(),
            Self::MonitorError { .. } => "monitor:error".to_string(),
            Self::Error { .. } => "error".to_string(),
        }
    }

    /// Whether a subscriber filter selects this notification.
    ///
    /// Filters are hierarchical, so `event` selects every combat event.
    #[must_use]
    pub fn matches(&self, filter: &str) -> bool {
        event_type_matches(filter, &self.event_type())
    }

    /// Whether any of `filters` selects this notification. Empty selects all.
    #[must_use]
    pub fn matches_any(&self, filters: &[String]) -> bool {
        filters.is_empty() || filters.iter().any(|f| self.matches(f))
    }

    /// Webhook payload for the notifications forwarded to webhooks:
    /// combat events and session transitions.
    #[must_use]
    pub fn to_webhook_payload(&self, filename: &str) -> Option<WebhookPayload> {
        let (line_number, session_id) = match self {
            Self::Event(event) => (Some(event.line_number), None),
            Self::Session(update) => (None, Some(update.session.id.clone())),
            _ => return None,
        };
        let data = match serde_json::to_value(self) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode webhook data");
                return None;
            }
        };
        Some(WebhookPayload::new(
            self.event_type(),
            data,
            PayloadMetadata {
                filename: filename.to_string(),
                line_number,
                session_id,
            },
        ))
    }
}

/// Options for [`RealTimeMonitor::start`](super::RealTimeMonitor::start).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Resume at a saved position. Takes precedence over `from_beginning`.
    pub resume_from: Option<TailPosition>,
    /// Read the existing content. `None` uses the configured default.
    pub from_beginning: Option<bool>,
}

impl StartOptions {
    #[must_use]
    pub fn resume(position: TailPosition) -> Self {
        Self {
            resume_from: Some(position),
            from_beginning: None,
        }
    }

    #[must_use]
    pub fn from_beginning() -> Self {
        Self {
            resume_from: None,
            from_beginning: Some(true),
        }
    }

    pub(crate) fn start_position(self, config: &LogTailerConfig) -> StartPosition {
        match (self.resume_from, self.from_beginning) {
            (Some(position), _) => StartPosition::Resume(position),
            (None, Some(true)) => StartPosition::Beginning,
            (None, Some(false)) => StartPosition::End,
            (None, None) => StartPosition::from_config(config),
        }
    }
}

/// Cumulative counters since the last start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStats {
    pub lines_processed: u64,
    /// Combat events translated from lines.
    pub events_emitted: u64,
    /// Combat events per category.
    pub events_by_type: BTreeMap<String, u64>,
    pub webhooks_delivered: u64,
    pub webhooks_failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub runtime_ms: u64,
    pub lines_unrecognized: u64,
    pub translation_errors: u64,
    pub sessions_completed: u64,
    pub rotations: u64,
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorStatus {
    pub state: MonitorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    pub position: TailPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_session: Option<SessionSummary>,
    pub stats: MonitorStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_mode: Option<WatchMode>,
}
