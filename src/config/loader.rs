//! TOML configuration discovery and validation.

use std::path::{Path, PathBuf};

use super::MonitorConfig;

const LOCAL_FILE: &str = ".combat-monitor.toml";

/// Finds and reads the monitor configuration.
///
/// Candidates are tried in order and the first existing file wins. With no
/// file at all the defaults apply, unless the path was given explicitly.
#[derive(Debug)]
pub struct ConfigLoader {
    candidates: Vec<PathBuf>,
    explicit: bool,
}

impl ConfigLoader {
    /// `./.combat-monitor.toml`, then `<config dir>/combat-monitor/config.toml`.
    #[must_use]
    pub fn new() -> Self {
        let mut candidates = vec![PathBuf::from(LOCAL_FILE)];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("combat-monitor").join("config.toml"));
        }
        Self {
            candidates,
            explicit: false,
        }
    }

    /// Loader for a path named by the user. A missing file is an error.
    #[must_use]
    pub fn with_path(path: PathBuf) -> Self {
        Self {
            candidates: vec![path],
            explicit: true,
        }
    }

    /// Loader over custom candidates that falls back to defaults.
    #[must_use]
    pub fn with_candidates(candidates: Vec<PathBuf>) -> Self {
        Self {
            candidates,
            explicit: false,
        }
    }

    /// Read, parse and validate the first existing candidate.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing explicit path, `ReadError` or
    /// `ParseError` for a broken file, and `Invalid` for unusable values.
    pub fn load(&self) -> Result<MonitorConfig, ConfigError> {
        let Some(path) = self.find_config_file() else {
            if self.explicit {
                let path = self.candidates.first().cloned().unwrap_or_default();
                return Err(ConfigError::NotFound(path));
            }
            tracing::debug!("No config file found, using defaults");
            return Ok(MonitorConfig::default());
        };

        tracing::debug!(path = %path.display(), "Loading config file");
        let config = read_file(&path)?;
        validate(&config).map_err(|reason| ConfigError::Invalid { path, reason })?;
        Ok(config)
    }

    #[must_use]
    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }

    #[must_use]
    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.candidates.iter().find(|p| p.is_file()).cloned()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(path: &Path) -> Result<MonitorConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Reject values the monitor cannot run with.
fn validate(config: &MonitorConfig) -> Result<(), String> {
    if config.log_tailer.buffer_size == 0 {
        return Err("log_tailer.buffer_size must be positive".to_string());
    }
    if config.monitor.event_channel_capacity == 0 {
        return Err("monitor.event_channel_capacity must be positive".to_string());
    }
    if config.webhook_delivery.max_concurrent_deliveries == 0 {
        return Err("webhook_delivery.max_concurrent_deliveries must be positive".to_string());
    }
    for webhook in &config.webhooks {
        if !webhook.retry_multiplier.is_finite() || webhook.retry_multiplier < 1.0 {
            return Err(format!(
                "webhook {} has retry_multiplier {}, expected at least 1",
                webhook.url, webhook.retry_multiplier
            ));
        }
    }
    Ok(())
}

/// Errors that can occur during configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read config file {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config in {path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_candidates_start_with_local_file() {
        let loader = ConfigLoader::new();
        assert!(loader.candidates()[0].ends_with(LOCAL_FILE));
    }

    #[test]
    fn test_missing_candidates_fall_back_to_defaults() {
        let loader = ConfigLoader::with_candidates(vec![PathBuf::from("/nonexistent/path.toml")]);
        assert_eq!(loader.load().unwrap(), MonitorConfig::default());
        assert!(loader.find_config_file().is_none());
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let loader = ConfigLoader::with_path(PathBuf::from("/nonexistent/path.toml"));
        assert!(matches!(loader.load(), Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [file_watcher]
            use_polling = true
            poll_interval_ms = 250

            [monitor]
            follow_rotation = false

            [[webhooks]]
            url = "http://localhost:9000/hook"
            events = ["session:end"]
            max_retries = 1
            "#,
        )
        .unwrap();

        let config = ConfigLoader::with_path(path.clone()).load().unwrap();
        assert!(config.file_watcher.use_polling);
        assert_eq!(config.file_watcher.poll_interval_ms, 250);
        assert!(!config.monitor.follow_rotation);
        assert_eq!(config.webhooks.len(), 1);
        assert_eq!(config.webhooks[0].url, "http://localhost:9000/hook");
        assert_eq!(config.webhooks[0].max_retries, 1);
        assert_eq!(config.webhooks[0].retry_delay_ms, 1000);
        assert_eq!(ConfigLoader::with_path(path.clone()).find_config_file(), Some(path));
    }

    #[test]
    fn test_first_existing_candidate_wins() {
        let dir = tempfile::tempdir().unwrap();
        let second = dir.path().join("second.toml");
        std::fs::write(&second, "[server]\nport = 4000\n").unwrap();

        let loader = ConfigLoader::with_candidates(vec![dir.path().join("first.toml"), second]);
        assert_eq!(loader.load().unwrap().server.port, 4000);
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[file_watcher\nuse_polling = ").unwrap();

        let result = ConfigLoader::with_path(path).load();
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_unusable_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[log_tailer]\nbuffer_size = 0\n").unwrap();
        let result = ConfigLoader::with_path(path.clone()).load();
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));

        std::fs::write(
            &path,
            "[[webhooks]]\nurl = \"http://localhost/hook\"\nretry_multiplier = 0.5\n",
        )
        .unwrap();
        let err = ConfigLoader::with_path(path).load().unwrap_err();
        assert!(err.to_string().contains("retry_multiplier"));
    }
}
