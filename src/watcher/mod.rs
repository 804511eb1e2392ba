//! File watching and tailing for growing log files.
//!
//! `FileWatcher` reports growth and rotation; `LogTailer` reads the new
//! bytes and yields complete lines with a resumable position.

mod error;
mod file_watcher;
mod rotation;
mod tailer;

pub use error::WatcherError;
pub use file_watcher::{FileChangeEvent, FileChangeKind, FileWatchEvent, FileWatcher, WatchMode};
pub use rotation::{FileSnapshot, InodeOrShrink, RotationPredicate, ShrinkOnly};
pub use tailer::{LogTailer, StartPosition, TailBatch, TailLine, TailPosition};
