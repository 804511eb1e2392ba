//! Line-to-event translation.
//!
//! The monitor treats translation as a pluggable collaborator behind
//! [`LineTranslator`]. [`DaocTranslator`] is the built-in implementation.

mod daoc;
mod event;

use std::path::Path;

pub use daoc::{DaocTranslator, TranslationRule};
pub use event::{CombatEvent, CombatEventKind};

use crate::watcher::TailLine;

/// Errors raised while translating a line.
#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
    /// Invalid regex pattern.
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Line matched but its timestamp is not a valid time of day.
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Line matched but its amount does not fit.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Translator-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Converts one raw line into zero or one combat event.
///
/// Implementations must not touch anything outside themselves. They may keep
/// per-file context such as the current log date, which [`reset`] clears when
/// a new file, or a new instance of the same file, starts. Unrecognized input
/// is `Ok(None)`; an `Err` is counted as a per-line failure and skipped.
///
/// [`reset`]: LineTranslator::reset
pub trait LineTranslator: Send + Sync {
    fn translate(&self, line: &TailLine) -> Result<Option<CombatEvent>, TranslateError>;

    /// Forget per-file context.
    fn reset(&self) {}
}

impl<F> LineTranslator for F
where
    F: Fn(&TailLine) -> Result<Option<CombatEvent>, TranslateError> + Send + Sync,
{
    fn translate(&self, line: &TailLine) -> Result<Option<CombatEvent>, TranslateError> {
        self(line)
    }
}

/// Translate every line of `content`.
///
/// Unrecognized lines are skipped; failing lines are skipped with a warning.
#[must_use]
pub fn parse_log_content(content: &str, translator: &dyn LineTranslator) -> Vec<CombatEvent> {
    translator.reset();
    let mut offset = 0u64;
    content
        .split_inclusive('\n')
        .zip(1u64..)
        .filter_map(|(raw, line_number)| {
            let line = TailLine {
                content: raw.trim_end_matches(['\n', '\r']).to_string(),
                line_number,
                byte_offset: offset,
            };
            offset += raw.len() as u64;
            match translator.translate(&line) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(line = line_number, error = %e, "Failed to translate line");
                    None
                }
            }
        })
        .collect()
}

/// Translate a whole log file from disk.
///
/// Invalid UTF-8 is replaced rather than rejected.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn parse_log_file(
    path: &Path,
    translator: &dyn LineTranslator,
) -> std::io::Result<Vec<CombatEvent>> {
    let bytes = tokio::fs::read(path).await?;
    let content = String::from_utf8_lossy(&bytes);
    Ok(parse_log_content(&content, translator))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn translator() -> DaocTranslator {
        DaocTranslator::with_date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
    }

    #[test]
    fn test_parse_log_content_skips_noise() {
        let content = "*** Chat Log Opened: Sat Mar 09 10:00:00 2024\r\n\
            [10:00:01] You hit the goblin for 25 points of slash damage!\r\n\
            [10:00:02] @@Aelric sends, \"hi\"\n\
            [99:00:00] You hit the goblin for 1 points of damage!\n\
            [10:00:03] The goblin dies!";

        let events = parse_log_content(content, &translator());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].line_number, 2);
        assert_eq!(events[0].raw, "[10:00:01] You hit the goblin for 25 points of slash damage!");
        assert_eq!(events[1].kind, CombatEventKind::Death);
        assert_eq!(events[1].line_number, 5);
    }

    #[test]
    fn test_closure_translator() {
        let always_none = |_: &TailLine| -> Result<Option<CombatEvent>, TranslateError> { Ok(None) };
        assert!(parse_log_content("a\nb\n", &always_none).is_empty());
    }

    #[tokio::test]
    async fn test_parse_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.log");
        std::fs::write(
            &path,
            "[01:23:45] You hit a goblin for 25 points of slash damage!\n",
        )
        .unwrap();

        let events = parse_log_file(&path, &translator()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].amount, Some(25));
    }

    #[tokio::test]
    async fn test_parse_missing_file_is_error() {
        let result = parse_log_file(Path::new("/tmp/no-such-chat-4242.log"), &translator()).await;
        assert!(result.is_err());
    }
}
