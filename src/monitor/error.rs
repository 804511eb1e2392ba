//! Monitor error types.

use super::MonitorState;
use crate::watcher::WatcherError;
use crate::webhook::WebhookError;

/// Errors returned by monitor operations.
#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    /// Lifecycle call not allowed in the current state. Nothing changed.
    #[error("Cannot {operation} monitor while {state}")]
    InvalidState {
        operation: &'static str,
        state: MonitorState,
    },

    /// The file could not be opened or watched. The monitor is now in `error`.
    #[error("Failed to start monitor: {0}")]
    StartFailed(#[source] WatcherError),

    /// File access failed while running.
    #[error(transparent)]
    Watcher(#[from] WatcherError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}
