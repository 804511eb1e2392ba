//! Configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::watcher::TailPosition;
use crate::webhook::WebhookConfig;

/// File change detection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileWatcherConfig {
    /// Window for coalescing bursts of native notifications.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Skip native notifications and poll from the start.
    #[serde(default)]
    pub use_polling: bool,
    /// Interval between stat checks in polling mode.
    #[serde(default = "default_watch_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_watch_poll_interval_ms() -> u64 {
    1000
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            use_polling: false,
            poll_interval_ms: default_watch_poll_interval_ms(),
        }
    }
}

impl FileWatcherConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Log tailing settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogTailerConfig {
    /// Maximum bytes read per `tail()` call.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Start at byte 0 instead of the end of file.
    #[serde(default)]
    pub from_beginning: bool,
    /// Explicit resume position; wins over `from_beginning`.
    #[serde(default)]
    pub start_position: Option<TailPosition>,
}

fn default_buffer_size() -> usize {
    65536
}

impl Default for LogTailerConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            from_beginning: false,
            start_position: None,
        }
    }
}

/// Session grouping thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDetectorConfig {
    /// Gap between events that closes a session.
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    /// Minimum events for a session to be reported on end.
    #[serde(default = "default_min_events")]
    pub min_events_for_session: usize,
    /// Minimum duration for a session to be reported on end.
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,
}

fn default_inactivity_timeout_ms() -> u64 {
    30_000
}

fn default_min_events() -> usize {
    3
}

fn default_min_duration_ms() -> u64 {
    1000
}

impl Default for SessionDetectorConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            min_events_for_session: default_min_events(),
            min_duration_ms: default_min_duration_ms(),
        }
    }
}

impl SessionDetectorConfig {
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }
}

/// Processing loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoopConfig {
    /// Reopen the file from the beginning when it is rotated.
    #[serde(default = "default_true")]
    pub follow_rotation: bool,
    /// Sleep between read iterations.
    #[serde(default = "default_loop_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Sleep after a failed read.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    /// Minimum spacing of forwarded `session:update` notifications.
    #[serde(default = "default_session_update_throttle_ms")]
    pub session_update_throttle_ms: u64,
    /// Buffer of the subscriber broadcast channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_loop_poll_interval_ms() -> u64 {
    50
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_session_update_throttle_ms() -> u64 {
    1000
}

fn default_event_channel_capacity() -> usize {
    1024
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            follow_rotation: true,
            poll_interval_ms: default_loop_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            session_update_throttle_ms: default_session_update_throttle_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl LoopConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    #[must_use]
    pub fn session_update_throttle(&self) -> Duration {
        Duration::from_millis(self.session_update_throttle_ms)
    }
}

/// Limits for the webhook delivery pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Upper bound on concurrent outbound requests.
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
    /// Dead-letter entries kept before the oldest are dropped.
    #[serde(default = "default_max_dead_letters")]
    pub max_dead_letters: usize,
}

fn default_max_concurrent_deliveries() -> usize {
    16
}

fn default_max_dead_letters() -> usize {
    1000
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
            max_dead_letters: default_max_dead_letters(),
        }
    }
}

/// HTTP control surface settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub cors_permissive: bool,
}

/// Default port for the HTTP server.
pub const DEFAULT_PORT: u16 = 3000;

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_permissive: true,
        }
    }
}

impl ServerConfig {
    /// Address string suitable for binding.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub file_watcher: FileWatcherConfig,
    pub log_tailer: LogTailerConfig,
    pub session_detector: SessionDetectorConfig,
    pub monitor: LoopConfig,
    pub webhook_delivery: DeliveryConfig,
    pub webhooks: Vec<WebhookConfig>,
    pub server: ServerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = MonitorConfig::default();
        assert_eq!(config.file_watcher.debounce_ms, 100);
        assert!(!config.file_watcher.use_polling);
        assert_eq!(config.file_watcher.poll_interval_ms, 1000);
        assert_eq!(config.log_tailer.buffer_size, 65536);
        assert!(!config.log_tailer.from_beginning);
        assert!(config.log_tailer.start_position.is_none());
        assert_eq!(config.session_detector.inactivity_timeout_ms, 30_000);
        assert_eq!(config.session_detector.min_events_for_session, 3);
        assert_eq!(config.session_detector.min_duration_ms, 1000);
        assert!(config.monitor.follow_rotation);
        assert_eq!(config.monitor.poll_interval_ms, 50);
        assert_eq!(config.monitor.error_backoff_ms, 1000);
        assert!(config.webhooks.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let toml = r"
            [session_detector]
            min_events_for_session = 5
        ";
        let config: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.session_detector.min_events_for_session, 5);
        assert_eq!(config.session_detector.inactivity_timeout_ms, 30_000);
    }

    #[test]
    fn test_start_position_deserializes() {
        let toml = r"
            [log_tailer]
            start_position = { byteOffset = 128, lineNumber = 4 }
        ";
        let config: MonitorConfig = toml::from_str(toml).unwrap();
        assert_eq!(
            config.log_tailer.start_position,
            Some(TailPosition {
                byte_offset: 128,
                line_number: 4
            })
        );
    }

    #[test]
    fn test_server_address() {
        assert_eq!(ServerConfig::default().address(), "127.0.0.1:3000");
    }

    #[test]
    fn test_duration_helpers() {
        let watcher = FileWatcherConfig::default();
        assert_eq!(watcher.debounce(), Duration::from_millis(100));
        let looping = LoopConfig::default();
        assert_eq!(looping.error_backoff(), Duration::from_secs(1));
        let detector = SessionDetectorConfig::default();
        assert_eq!(detector.inactivity_timeout(), Duration::from_secs(30));
    }
}
