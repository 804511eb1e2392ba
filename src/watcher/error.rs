//! Watcher and tailer error types.

use std::path::PathBuf;

/// Errors that can occur while watching or tailing a log file.
#[derive(thiserror::Error, Debug)]
pub enum WatcherError {
    /// Watched file was deleted or does not exist.
    #[error("Watched file not found: {0}")]
    FileDeleted(PathBuf),

    /// Permission denied accessing file.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// File shrank below the tailer's read offset.
    #[error("File truncated below read offset {offset}: {path}")]
    FileTruncated { path: PathBuf, offset: u64 },

    /// `tail()` was called before `open()`.
    #[error("Tailer is not open")]
    NotOpen,

    /// Notify watcher error.
    #[error("File watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error.
    #[error("Channel closed")]
    ChannelClosed,
}

impl WatcherError {
    /// Map an I/O error on `path` to the most specific variant.
    #[must_use]
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::FileDeleted(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err),
        }
    }
}
