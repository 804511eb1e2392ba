//! Real-time log monitor.
//!
//! [`RealTimeMonitor`] owns a file watcher, a tailer, a session detector and
//! a webhook notifier, and runs the loop that connects them.

mod error;
mod events;
mod runner;
mod state;

pub use error::MonitorError;
pub use events::{MonitorEvent, MonitorStats, MonitorStatus, StartOptions};
pub use runner::RealTimeMonitor;
pub use state::MonitorState;
