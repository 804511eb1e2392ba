//! Incremental log file tailer.
//!
//! Reads only the bytes appended since the last read and yields complete
//! lines, holding back a trailing fragment until its terminator arrives.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::error::WatcherError;
use super::rotation::FileSnapshot;
use crate::config::LogTailerConfig;

/// Resumable cursor into a tailed file.
///
/// `byte_offset` is the start of the first line not yet emitted, so a tailer
/// reopened at this position re-reads any fragment that was still buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailPosition {
    pub byte_offset: u64,
    pub line_number: u64,
}

/// One complete line read from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TailLine {
    /// Line content without its terminator.
    pub content: String,
    /// 1-based line number within the current file instance.
    pub line_number: u64,
    /// Offset of the first byte of this line.
    pub byte_offset: u64,
}

/// Where `open()` places the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// After the last complete line currently in the file.
    End,
    /// Byte 0, line 0.
    Beginning,
    /// A previously saved position.
    Resume(TailPosition),
}

impl StartPosition {
    /// Resolve the start position from tailer configuration.
    #[must_use]
    pub fn from_config(config: &LogTailerConfig) -> Self {
        match (config.start_position, config.from_beginning) {
            (Some(position), _) => Self::Resume(position),
            (None, true) => Self::Beginning,
            (None, false) => Self::End,
        }
    }
}

/// Result of a single `tail()` call.
#[derive(Debug, Clone, Default)]
pub struct TailBatch {
    /// Complete lines found in this read, in file order.
    pub lines: Vec<TailLine>,
    /// Bytes consumed from the file by this read.
    pub bytes_read: usize,
}

impl TailBatch {
    /// True when the read hit end of file.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.bytes_read == 0
    }
}

/// Byte-exact incremental reader for a growing log file.
///
/// Tracks the read offset (bytes consumed, including a buffered partial
/// line) separately from the committed position (start of the partial).
#[derive(Debug)]
pub struct LogTailer {
    buffer_size: usize,
    path: Option<PathBuf>,
    file: Option<File>,
    /// Identity of the file behind `file`.
    identity: Option<FileSnapshot>,
    /// Offset of the next byte to read.
    read_offset: u64,
    /// Offset where the buffered partial line begins.
    line_start: u64,
    line_number: u64,
    partial: Vec<u8>,
    /// Set after rotation when the path did not exist yet.
    pending_reopen: bool,
}

impl LogTailer {
    /// Create a closed tailer reading at most `buffer_size` bytes per call.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            path: None,
            file: None,
            identity: None,
            read_offset: 0,
            line_start: 0,
            line_number: 0,
            partial: Vec::new(),
            pending_reopen: false,
        }
    }

    /// Create a closed tailer from configuration.
    #[must_use]
    pub fn from_config(config: &LogTailerConfig) -> Self {
        Self::new(config.buffer_size)
    }

    /// Open `path` and place the cursor according to `start`.
    ///
    /// A resume position beyond the current end of file means the file was
    /// replaced while we were away, so reading restarts from the beginning.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub async fn open(
        &mut self,
        path: impl Into<PathBuf>,
        start: StartPosition,
    ) -> Result<TailPosition, WatcherError> {
        let path = path.into();
        let mut file = File::open(&path)
            .await
            .map_err(|e| WatcherError::from_io(&path, e))?;
        let metadata = file.metadata().await?;

        let position = match start {
            StartPosition::Beginning => TailPosition::default(),
            StartPosition::End => self.scan_to_end(&mut file).await?,
            StartPosition::Resume(position) if position.byte_offset <= metadata.len() => position,
            StartPosition::Resume(position) => {
                tracing::warn!(
                    path = %path.display(),
                    offset = position.byte_offset,
                    len = metadata.len(),
                    "Resume offset beyond end of file, reading from beginning"
                );
                TailPosition::default()
            }
        };

        self.reset_to(position);
        self.identity = Some(FileSnapshot::from_metadata(&metadata));
        self.file = Some(file);
        self.pending_reopen = false;
        tracing::debug!(
            path = %path.display(),
            offset = position.byte_offset,
            line = position.line_number,
            "Tailer opened"
        );
        self.path = Some(path);

        Ok(position)
    }

    /// Count newlines from byte 0 so the end position carries a real line number.
    async fn scan_to_end(&self, file: &mut File) -> Result<TailPosition, WatcherError> {
        file.seek(SeekFrom::Start(0)).await?;
        let mut buf = vec![0u8; self.buffer_size];
        let mut offset = 0u64;
        let mut position = TailPosition::default();

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            for (i, byte) in buf[..n].iter().enumerate() {
                if *byte == b'\n' {
                    position.line_number += 1;
                    position.byte_offset = offset + i as u64 + 1;
                }
            }
            offset += n as u64;
        }

        Ok(position)
    }

    /// Read at most one buffer of new bytes and return the complete lines in it.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` before `open()`, `FileTruncated` when the file
    /// shrank below the read offset, or an I/O error.
    pub async fn tail(&mut self) -> Result<TailBatch, WatcherError> {
        if self.file.is_none() && self.pending_reopen {
            self.try_reopen().await?;
        }

        let Some(file) = self.file.as_mut() else {
            return if self.pending_reopen {
                Ok(TailBatch::default())
            } else {
                Err(WatcherError::NotOpen)
            };
        };

        let len = file.metadata().await?.len();
        if len < self.read_offset {
            return Err(WatcherError::FileTruncated {
                path: self.path.clone().unwrap_or_default(),
                offset: self.read_offset,
            });
        }
        if len == self.read_offset {
            return Ok(TailBatch::default());
        }

        file.seek(SeekFrom::Start(self.read_offset)).await?;
        let mut buf = vec![0u8; self.buffer_size];
        let bytes_read = file.read(&mut buf).await?;
        if bytes_read == 0 {
            return Ok(TailBatch::default());
        }

        // The only place the read offset moves forward.
        self.read_offset += bytes_read as u64;
        self.partial.extend_from_slice(&buf[..bytes_read]);

        Ok(TailBatch {
            lines: self.drain_complete_lines(),
            bytes_read,
        })
    }

    fn drain_complete_lines(&mut self) -> Vec<TailLine> {
        let mut lines = Vec::new();
        let mut consumed = 0;

        while let Some(rel) = self.partial[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + rel;
            let raw = &self.partial[consumed..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

            self.line_number += 1;
            lines.push(TailLine {
                content: String::from_utf8_lossy(raw).into_owned(),
                line_number: self.line_number,
                byte_offset: self.line_start,
            });
            self.line_start += (end + 1 - consumed) as u64;
            consumed = end + 1;
        }

        self.partial.drain(..consumed);
        lines
    }

    /// Emit the buffered incomplete line as a line of its own.
    pub fn flush_partial(&mut self) -> Option<TailLine> {
        if self.partial.is_empty() {
            return None;
        }

        self.line_number += 1;
        let line = TailLine {
            content: String::from_utf8_lossy(&self.partial).into_owned(),
            line_number: self.line_number,
            byte_offset: self.line_start,
        };
        self.line_start = self.read_offset;
        self.partial.clear();
        Some(line)
    }

    /// Close the old handle and reopen the path from the beginning.
    ///
    /// A stale partial line is dropped. If the path does not exist yet the
    /// tailer waits for it to reappear and `tail()` reopens it lazily.
    ///
    /// # Errors
    ///
    /// Returns `NotOpen` if the tailer was never opened, or the open error
    /// for failures other than a missing file.
    pub async fn handle_rotation(&mut self) -> Result<TailPosition, WatcherError> {
        let path = self.path.clone().ok_or(WatcherError::NotOpen)?;

        if !self.partial.is_empty() {
            tracing::debug!(
                path = %path.display(),
                bytes = self.partial.len(),
                "Dropping partial line from rotated file"
            );
        }

        self.file = None;
        self.identity = None;
        self.reset_to(TailPosition::default());
        self.pending_reopen = true;
        self.try_reopen().await?;

        tracing::info!(
            path = %path.display(),
            reopened = !self.pending_reopen,
            "Tailer reset after rotation"
        );
        Ok(self.position())
    }

    async fn try_reopen(&mut self) -> Result<(), WatcherError> {
        let Some(path) = self.path.as_deref() else {
            return Err(WatcherError::NotOpen);
        };

        match File::open(path).await {
            Ok(file) => {
                let metadata = file.metadata().await?;
                self.identity = Some(FileSnapshot::from_metadata(&metadata));
                self.file = Some(file);
                self.pending_reopen = false;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WatcherError::from_io(path, e)),
        }
    }

    /// True when the path no longer refers to the open handle's file, or the
    /// file at the path is shorter than what has already been read.
    pub async fn is_rotated(&self) -> bool {
        let (Some(path), Some(identity)) = (self.path.as_deref(), self.identity) else {
            return false;
        };

        match FileSnapshot::stat(path).await {
            Ok(current) => current.inode != identity.inode || current.size < self.read_offset,
            Err(_) => false,
        }
    }

    /// Release the file handle. The position is kept for persistence.
    pub fn close(&mut self) {
        self.file = None;
        self.identity = None;
        self.pending_reopen = false;
        self.partial.clear();
        self.read_offset = self.line_start;
    }

    /// Committed position, safe to persist and resume from.
    #[must_use]
    pub fn position(&self) -> TailPosition {
        TailPosition {
            byte_offset: self.line_start,
            line_number: self.line_number,
        }
    }

    /// Move the cursor to `position`, discarding any buffered partial line.
    pub fn set_position(&mut self, position: TailPosition) {
        self.reset_to(position);
    }

    fn reset_to(&mut self, position: TailPosition) {
        self.read_offset = position.byte_offset;
        self.line_start = position.byte_offset;
        self.line_number = position.line_number;
        self.partial.clear();
    }

    /// Offset of the next byte to read, including buffered partial bytes.
    #[must_use]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// Bytes of an incomplete trailing line currently held back.
    #[must_use]
    pub fn partial_len(&self) -> usize {
        self.partial.len()
    }

    /// Whether a file handle is held.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Path of the file being tailed, kept across close for reopening.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
