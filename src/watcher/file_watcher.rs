//! File change and rotation detection.
//!
//! Native notifications come from notify-debouncer-full on the file's parent
//! directory. If they cannot be set up, or fail at runtime, the watcher
//! switches to fixed-interval stat polling and reports the failure once on
//! its event channel.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_full::{
    new_debouncer,
    notify::{event::ModifyKind, EventKind, RecursiveMode},
    DebounceEventResult,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::WatcherError;
use super::rotation::{FileSnapshot, InodeOrShrink, RotationPredicate};
use crate::config::FileWatcherConfig;

/// Kind of detected file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileChangeKind {
    /// Size changed in place.
    Change,
    /// A rename touched the path without rotating it.
    Rename,
    /// The file was replaced or truncated.
    Rotate,
}

/// A detected filesystem change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangeEvent {
    #[serde(rename = "type")]
    pub kind: FileChangeKind,
    pub filename: PathBuf,
    pub current_size: u64,
    pub current_inode: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_inode: Option<u64>,
}

/// Signals emitted by the file watcher.
#[derive(Debug)]
pub enum FileWatchEvent {
    Changed(FileChangeEvent),
    Error(WatcherError),
}

/// Active change-detection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    Native,
    Polling,
}

enum Trigger {
    /// Stat the file. `renamed` is set when a name-level event touched it.
    Check { renamed: bool },
    Failed(WatcherError),
}

/// A source of "something may have changed" triggers.
#[async_trait]
trait ChangeSource: Send {
    fn mode(&self) -> WatchMode;
    async fn next_trigger(&mut self) -> Trigger;
}

struct NativeSource<D> {
    /// Dropping the debouncer releases the native watch.
    _debouncer: D,
    rx: mpsc::UnboundedReceiver<DebounceEventResult>,
    file_name: OsString,
}

#[async_trait]
impl<D: Send + 'static> ChangeSource for NativeSource<D> {
    fn mode(&self) -> WatchMode {
        WatchMode::Native
    }

    async fn next_trigger(&mut self) -> Trigger {
        loop {
            match self.rx.recv().await {
                Some(Ok(events)) => {
                    let relevant: Vec<_> = events
                        .iter()
                        .filter(|event| {
                            event
                                .paths
                                .iter()
                                .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
                        })
                        .collect();
                    if relevant.is_empty() {
                        continue;
                    }
                    let renamed = relevant.iter().any(|event| {
                        matches!(
                            event.kind,
                            EventKind::Create(_)
                                | EventKind::Remove(_)
                                | EventKind::Modify(ModifyKind::Name(_))
                        )
                    });
                    return Trigger::Check { renamed };
                }
                Some(Err(errors)) => {
                    let error = errors
                        .into_iter()
                        .next()
                        .map_or(WatcherError::ChannelClosed, WatcherError::Notify);
                    return Trigger::Failed(error);
                }
                None => return Trigger::Failed(WatcherError::ChannelClosed),
            }
        }
    }
}

fn native_source(path: &Path, debounce: Duration) -> Result<Box<dyn ChangeSource>, WatcherError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| WatcherError::FileDeleted(path.to_path_buf()))?
        .to_os_string();
    // Watch the directory so replacement and recreation of the file are seen.
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let (tx, rx) = mpsc::unbounded_channel();
    let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        let _ = tx.send(result);
    })?;
    debouncer.watch(parent, RecursiveMode::NonRecursive)?;

    Ok(Box::new(NativeSource {
        _debouncer: debouncer,
        rx,
        file_name,
    }))
}

struct PollingSource {
    interval: tokio::time::Interval,
}

impl PollingSource {
    fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl ChangeSource for PollingSource {
    fn mode(&self) -> WatchMode {
        WatchMode::Polling
    }

    async fn next_trigger(&mut self) -> Trigger {
        self.interval.tick().await;
        Trigger::Check { renamed: false }
    }
}

/// Compare a fresh snapshot against the last one and decide what to report.
fn classify(
    path: &Path,
    previous: FileSnapshot,
    current: FileSnapshot,
    renamed: bool,
    predicate: &dyn RotationPredicate,
) -> Option<FileChangeEvent> {
    let kind = if predicate.is_rotation(&previous, &current) {
        FileChangeKind::Rotate
    } else if renamed {
        FileChangeKind::Rename
    } else if current.size != previous.size {
        FileChangeKind::Change
    } else {
        return None;
    };

    Some(FileChangeEvent {
        kind,
        filename: path.to_path_buf(),
        current_size: current.size,
        current_inode: current.inode,
        previous_size: Some(previous.size),
        previous_inode: Some(previous.inode),
    })
}

struct RunningWatch {
    path: PathBuf,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    mode_rx: watch::Receiver<WatchMode>,
}

/// Watches one file for growth, renames and rotation.
pub struct FileWatcher {
    config: FileWatcherConfig,
    predicate: Arc<dyn RotationPredicate>,
    running: Option<RunningWatch>,
}

impl FileWatcher {
    /// Create a stopped watcher using the inode-or-shrink rotation rule.
    #[must_use]
    pub fn new(config: FileWatcherConfig) -> Self {
        Self::with_predicate(config, Arc::new(InodeOrShrink))
    }

    /// Create a stopped watcher with a custom rotation rule.
    #[must_use]
    pub fn with_predicate(config: FileWatcherConfig, predicate: Arc<dyn RotationPredicate>) -> Self {
        Self {
            config,
            predicate,
            running: None,
        }
    }

    /// Start watching `path`, capturing its current size and inode.
    ///
    /// Returns the receiver for change and error signals. Restarting an
    /// active watcher stops the previous watch first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be stat'ed.
    pub async fn start(
        &mut self,
        path: impl Into<PathBuf>,
    ) -> Result<mpsc::UnboundedReceiver<FileWatchEvent>, WatcherError> {
        self.stop().await;

        let path = path.into();
        let initial = FileSnapshot::stat(&path)
            .await
            .map_err(|e| WatcherError::from_io(&path, e))?;
        let (tx, rx) = mpsc::unbounded_channel();

        let source: Box<dyn ChangeSource> = if self.config.use_polling {
            Box::new(PollingSource::new(self.config.poll_interval()))
        } else {
            match native_source(&path, self.config.debounce()) {
                Ok(source) => source,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Native file watch unavailable, falling back to polling"
                    );
                    let _ = tx.send(FileWatchEvent::Error(e));
                    Box::new(PollingSource::new(self.config.poll_interval()))
                }
            }
        };

        let (mode_tx, mode_rx) = watch::channel(source.mode());
        let cancel = CancellationToken::new();
        let task = WatchTask {
            path: path.clone(),
            last: initial,
            predicate: Arc::clone(&self.predicate),
            poll_interval: self.config.poll_interval(),
            tx,
            mode_tx,
        };
        let mode = *mode_rx.borrow();
        let handle = tokio::spawn(task.run(source, cancel.clone()));

        tracing::debug!(
            path = %path.display(),
            size = initial.size,
            inode = initial.inode,
            mode = ?mode,
            "File watcher started"
        );

        self.running = Some(RunningWatch {
            path,
            cancel,
            handle,
            mode_rx,
        });
        Ok(rx)
    }

    /// Stop watching and release the native handle. No-op when stopped.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
            if let Err(e) = running.handle.await {
                tracing::warn!(error = %e, "File watcher task ended abnormally");
            }
            tracing::debug!(path = %running.path.display(), "File watcher stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Current strategy, or `None` when stopped.
    #[must_use]
    pub fn mode(&self) -> Option<WatchMode> {
        self.running.as_ref().map(|r| *r.mode_rx.borrow())
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.running.as_ref().map(|r| r.path.as_path())
    }
}

struct WatchTask {
    path: PathBuf,
    last: FileSnapshot,
    predicate: Arc<dyn RotationPredicate>,
    poll_interval: Duration,
    tx: mpsc::UnboundedSender<FileWatchEvent>,
    mode_tx: watch::Sender<WatchMode>,
}

impl WatchTask {
    async fn run(mut self, mut source: Box<dyn ChangeSource>, cancel: CancellationToken) {
        loop {
            let trigger = tokio::select! {
                () = cancel.cancelled() => break,
                trigger = source.next_trigger() => trigger,
            };

            match trigger {
                Trigger::Check { renamed } => self.check(renamed).await,
                Trigger::Failed(error) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %error,
                        "Native file watch failed, switching to polling"
                    );
                    let _ = self.tx.send(FileWatchEvent::Error(error));
                    if source.mode() == WatchMode::Native {
                        source = Box::new(PollingSource::new(self.poll_interval));
                        let _ = self.mode_tx.send(WatchMode::Polling);
                    }
                }
            }

            if self.tx.is_closed() {
                break;
            }
        }
    }

    async fn check(&mut self, renamed: bool) {
        let current = match FileSnapshot::stat(&self.path).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // Keep the last snapshot so a recreated file registers as rotation.
                tracing::debug!(path = %self.path.display(), error = %e, "Stat failed");
                let _ = self
                    .tx
                    .send(FileWatchEvent::Error(WatcherError::from_io(&self.path, e)));
                return;
            }
        };

        if let Some(event) = classify(
            &self.path,
            self.last,
            current,
            renamed,
            self.predicate.as_ref(),
        ) {
            tracing::debug!(
                path = %self.path.display(),
                kind = ?event.kind,
                size = current.size,
                "File change detected"
            );
            let _ = self.tx.send(FileWatchEvent::Changed(event));
        }
        self.last = current;
    }
}
