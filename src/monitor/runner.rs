//! The real-time monitor: lifecycle and the read-translate-detect loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::events::{MonitorEvent, MonitorStats, MonitorStatus, StartOptions};
use super::{MonitorError, MonitorState};
use crate::config::MonitorConfig;
use crate::parser::{DaocTranslator, LineTranslator};
use crate::session::{SessionSignal, SessionUpdate, SessionUpdateKind, StreamingSessionDetector};
use crate::watcher::{
    FileChangeEvent, FileChangeKind, FileWatchEvent, FileWatcher, InodeOrShrink, LogTailer, RotationPredicate,
    TailLine, TailPosition, WatcherError,
};
use crate::webhook::WebhookNotifier;

/// State touched by the processing loop. Locked per step, never across a sleep.
struct Core {
    tailer: LogTailer,
    detector: StreamingSessionDetector,
    watch_rx: Option<mpsc::UnboundedReceiver<FileWatchEvent>>,
    filename: Option<PathBuf>,
    /// Last forwarded `session:update`, for the active session only.
    last_update_sent: Option<(String, Instant)>,
    /// Truncations the reader handled before the watcher reported them.
    unclaimed_truncations: u32,
    /// Wall-clock arrival of the last combat event.
    last_event_at: Option<Instant>,
    stats: MonitorStats,
    started: Option<Instant>,
    last_error: Option<String>,
}

impl Core {
    fn runtime_ms(&self) -> u64 {
        self.started
            .map_or(0, |s| u64::try_from(s.elapsed().as_millis()).unwrap_or(u64::MAX))
    }

    fn filename_str(&self) -> String {
        self.filename
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned by lifecycle calls, which are serialized by its lock.
struct Lifecycle {
    watcher: FileWatcher,
    worker: Option<Worker>,
}

struct Shared {
    config: MonitorConfig,
    translator: Arc<dyn LineTranslator>,
    notifier: WebhookNotifier,
    events: broadcast::Sender<MonitorEvent>,
    state: watch::Sender<MonitorState>,
    lifecycle: Mutex<Lifecycle>,
    core: Mutex<Core>,
}

/// Tails one log file and turns it into combat events and sessions.
///
/// Cloning yields another handle to the same monitor.
#[derive(Clone)]
pub struct RealTimeMonitor {
    shared: Arc<Shared>,
}

impl RealTimeMonitor {
    /// Monitor using the built-in DAoC translator and an HTTP notifier.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_translator(config, Arc::new(DaocTranslator::new()))
    }

    /// Monitor using a custom line translator.
    #[must_use]
    pub fn with_translator(config: MonitorConfig, translator: Arc<dyn LineTranslator>) -> Self {
        let notifier = WebhookNotifier::new(&config.webhook_delivery);
        Self::with_parts(config, translator, notifier, Arc::new(InodeOrShrink))
    }

    /// Monitor with every collaborator supplied.
    #[must_use]
    pub fn with_parts(
        config: MonitorConfig,
        translator: Arc<dyn LineTranslator>,
        notifier: WebhookNotifier,
        rotation: Arc<dyn RotationPredicate>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.monitor.event_channel_capacity.max(1));
        let (state, _) = watch::channel(MonitorState::Stopped);
        let core = Core {
            tailer: LogTailer::from_config(&config.log_tailer),
            detector: StreamingSessionDetector::new(config.session_detector.clone()),
            watch_rx: None,
            filename: None,
            last_update_sent: None,
            unclaimed_truncations: 0,
            last_event_at: None,
            stats: MonitorStats::default(),
            started: None,
            last_error: None,
        };
        let lifecycle = Lifecycle {
            watcher: FileWatcher::with_predicate(config.file_watcher.clone(), rotation),
            worker: None,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                translator,
                notifier,
                events,
                state,
                lifecycle: Mutex::new(lifecycle),
                core: Mutex::new(core),
            }),
        }
    }

    /// Build a monitor and register the webhooks listed in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured webhook URL is invalid.
    pub async fn from_config(config: MonitorConfig) -> Result<Self, MonitorError> {
        let webhooks = config.webhooks.clone();
        let monitor = Self::new(config);
        for webhook in webhooks {
            monitor.shared.notifier.add_webhook(webhook).await?;
        }
        Ok(monitor)
    }

    /// Open `filename` and begin processing.
    ///
    /// Returns the position reading starts from.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless stopped, or `StartFailed` if the file
    /// cannot be opened or watched, leaving the monitor in `error`.
    pub async fn start(
        &self,
        filename: impl Into<PathBuf>,
        options: StartOptions,
    ) -> Result<TailPosition, MonitorError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        self.require("start", MonitorState::Stopped)?;
        self.shared.transition(MonitorState::Starting);

        let path = filename.into();
        let start = options.start_position(&self.shared.config.log_tailer);

        let mut core = self.shared.core.lock().await;
        let position = match core.tailer.open(&path, start).await {
            Ok(position) => position,
            Err(e) => return Err(self.shared.fail_start(&mut core, &path, e)),
        };
        let watch_rx = match lifecycle.watcher.start(&path).await {
            Ok(rx) => rx,
            Err(e) => {
                core.tailer.close();
                return Err(self.shared.fail_start(&mut core, &path, e));
            }
        };

        core.watch_rx = Some(watch_rx);
        core.detector = StreamingSessionDetector::new(self.shared.config.session_detector.clone());
        core.filename = Some(path.clone());
        core.last_update_sent = None;
        core.unclaimed_truncations = 0;
        core.last_event_at = None;
        self.shared.translator.reset();
        core.stats = MonitorStats {
            started_at: Some(Utc::now()),
            ..MonitorStats::default()
        };
        core.started = Some(Instant::now());
        core.last_error = None;
        drop(core);

        self.shared.transition(MonitorState::Running);
        self.shared.publish(MonitorEvent::Started {
            filename: path.clone(),
            position,
        });
        lifecycle.worker = Some(self.spawn_worker());

        tracing::info!(
            path = %path.display(),
            offset = position.byte_offset,
            line = position.line_number,
            "Monitor started"
        );
        Ok(position)
    }

    /// Stop processing, end any active session and release the file.
    ///
    /// Returns the final position. Calling it when already stopped is a no-op.
    pub async fn stop(&self) -> TailPosition {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        if self.state() == MonitorState::Stopped {
            return self.shared.core.lock().await.tailer.position();
        }
        self.shared.transition(MonitorState::Stopping);

        if let Some(worker) = lifecycle.worker.take() {
            worker.join().await;
        }
        lifecycle.watcher.stop().await;

        let mut core = self.shared.core.lock().await;
        if let Some(end) = core.detector.force_end_session() {
            self.shared.forward_session(&mut core, end).await;
        }
        core.last_update_sent = None;
        core.watch_rx = None;
        core.stats.runtime_ms = core.runtime_ms();
        let position = core.tailer.position();
        core.tailer.close();
        let filename = core.filename_str();
        drop(core);

        self.shared.transition(MonitorState::Stopped);
        self.shared.publish(MonitorEvent::Stopped { position });
        tracing::info!(
            path = %filename,
            offset = position.byte_offset,
            line = position.line_number,
            "Monitor stopped"
        );
        position
    }

    /// Halt the processing loop, keeping the file handle and position.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless running.
    pub async fn pause(&self) -> Result<TailPosition, MonitorError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        self.require("pause", MonitorState::Running)?;

        if let Some(worker) = lifecycle.worker.take() {
            worker.join().await;
        }
        let position = self.get_position().await;

        self.shared.transition(MonitorState::Paused);
        self.shared.publish(MonitorEvent::Paused { position });
        tracing::info!(offset = position.byte_offset, "Monitor paused");
        Ok(position)
    }

    /// Restart the processing loop from the saved position.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless paused.
    pub async fn resume(&self) -> Result<TailPosition, MonitorError> {
        let mut lifecycle = self.shared.lifecycle.lock().await;
        self.require("resume", MonitorState::Paused)?;

        let position = self.get_position().await;
        self.shared.transition(MonitorState::Running);
        self.shared.publish(MonitorEvent::Resumed { position });
        lifecycle.worker = Some(self.spawn_worker());

        tracing::info!(offset = position.byte_offset, "Monitor resumed");
        Ok(position)
    }

    /// Committed tail position, safe to persist and resume from.
    pub async fn get_position(&self) -> TailPosition {
        self.shared.core.lock().await.tailer.position()
    }

    /// Snapshot of state, position, active session and counters.
    ///
    /// Runtime keeps counting while running or paused and is frozen by `stop`.
    pub async fn status(&self) -> MonitorStatus {
        let watch_mode = self.shared.lifecycle.lock().await.watcher.mode();
        let core = self.shared.core.lock().await;

        let mut stats = core.stats.clone();
        stats.webhooks_delivered = self.shared.notifier.delivered();
        stats.webhooks_failed = self.shared.notifier.failed();
        if self.state().is_active() {
            stats.runtime_ms = core.runtime_ms();
        }

        MonitorStatus {
            state: self.state(),
            filename: core.filename.clone(),
            position: core.tailer.position(),
            active_session: core.detector.active_session_ref().map(|s| s.summary()),
            stats,
            last_error: core.last_error.clone(),
            watch_mode,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MonitorState {
        *self.shared.state.borrow()
    }

    /// Receive state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.shared.state.subscribe()
    }

    /// Attach a subscriber. Slow subscribers lag without affecting others.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.shared.events.subscribe()
    }

    /// Webhook registry and delivery counters.
    #[must_use]
    pub fn webhooks(&self) -> &WebhookNotifier {
        &self.shared.notifier
    }

    /// Configuration the monitor was built with.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    fn require(&self, operation: &'static str, expected: MonitorState) -> Result<(), MonitorError> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            tracing::debug!(operation, state = %state, "Rejected lifecycle call");
            Err(MonitorError::InvalidState { operation, state })
        }
    }

    fn spawn_worker(&self) -> Worker {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&self.shared).run(cancel.clone()));
        Worker { cancel, handle }
    }
}

impl Worker {
    /// Cancel the loop and wait for its current step to finish.
    async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Monitor loop ended abnormally");
        }
    }
}

impl Shared {
    fn transition(&self, to: MonitorState) {
        let from = *self.state.borrow();
        tracing::debug!(from = %from, to = %to, "State transition");
        self.state.send_replace(to);
    }

    fn fail_start(&self, core: &mut Core, path: &Path, error: WatcherError) -> MonitorError {
        let message = error.to_string();
        tracing::error!(path = %path.display(), error = %message, "Monitor failed to start");
        core.last_error = Some(message.clone());
        core.filename = Some(path.to_path_buf());
        self.transition(MonitorState::Error);
        self.publish(MonitorEvent::MonitorError { message });
        MonitorError::StartFailed(error)
    }

    /// Send to in-process subscribers only.
    fn publish(&self, event: MonitorEvent) {
        let _ = self.events.send(event);
    }

    /// Send to subscribers and, for events and sessions, to webhooks.
    async fn dispatch(&self, filename: &str, event: MonitorEvent) {
        if let Some(payload) = event.to_webhook_payload(filename) {
            self.notifier.notify(payload).await;
        }
        self.publish(event);
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let loop_config = &self.config.monitor;
        tracing::debug!("Monitor loop started");

        while !cancel.is_cancelled() {
            let delay = match self.step(&cancel).await {
                Ok(()) => loop_config.poll_interval(),
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(error = %message, "Read failed, backing off");
                    self.core.lock().await.last_error = Some(message.clone());
                    self.publish(MonitorEvent::Error {
                        message,
                        line_number: None,
                    });
                    loop_config.error_backoff()
                }
            };

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::debug!("Monitor loop exited");
    }

    /// One pass: watcher signals, all available lines, then the idle sweep.
    async fn step(&self, cancel: &CancellationToken) -> Result<(), MonitorError> {
        self.drain_watch_events(cancel).await?;
        self.read_available(cancel).await?;

        let mut core = self.core.lock().await;
        if let Some(arrived) = core.last_event_at {
            if let Some(end) = core.detector.end_if_idle(arrived.elapsed()) {
                self.forward_session(&mut core, end).await;
            }
            if core.detector.active_session_ref().is_none() {
                core.last_update_sent = None;
            }
        }
        Ok(())
    }

    async fn drain_watch_events(&self, cancel: &CancellationToken) -> Result<(), MonitorError> {
        loop {
            let mut core = self.core.lock().await;
            let Some(rx) = core.watch_rx.as_mut() else {
                return Ok(());
            };
            let signal = match rx.try_recv() {
                Ok(signal) => signal,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    core.watch_rx = None;
                    return Ok(());
                }
            };
            let filename = core.filename_str();
            drop(core);

            match signal {
                FileWatchEvent::Changed(change) if change.kind == FileChangeKind::Rotate => {
                    tracing::info!(
                        path = %filename,
                        previous_size = ?change.previous_size,
                        current_size = change.current_size,
                        "File rotated"
                    );
                    self.publish(MonitorEvent::FileRotate(change.clone()));
                    if self.config.monitor.follow_rotation {
                        self.follow_rotation(cancel, &change).await?;
                    }
                }
                FileWatchEvent::Changed(change) => {
                    self.publish(MonitorEvent::FileChange(change));
                }
                FileWatchEvent::Error(error) => {
                    tracing::debug!(path = %filename, error = %error, "File watcher error");
                    let message = error.to_string();
                    self.core.lock().await.last_error = Some(message.clone());
                    self.publish(MonitorEvent::Error {
                        message,
                        line_number: None,
                    });
                }
            }
        }
    }

    /// Finish the old file, then reopen unless the tailer already did.
    ///
    /// A shrink seen by the watcher is followed even when the file regrew
    /// past the read offset before the tailer could notice.
    async fn follow_rotation(
        &self,
        cancel: &CancellationToken,
        change: &FileChangeEvent,
    ) -> Result<(), MonitorError> {
        let shrank = change
            .previous_size
            .is_some_and(|previous| previous > change.current_size);
        let same_file = change.previous_inode == Some(change.current_inode);

        // Bytes past the offset of a truncated file belong to the new content.
        if !(shrank && same_file) {
            if let Err(e) = self.read_available(cancel).await {
                tracing::debug!(error = %e, "Could not drain rotated file");
            }
        }

        let mut core = self.core.lock().await;
        if shrank && core.unclaimed_truncations > 0 {
            core.unclaimed_truncations -= 1;
            tracing::debug!("Truncation already followed by the reader");
            return Ok(());
        }
        if shrank || core.tailer.is_rotated().await {
            self.reopen_rotated(&mut core).await?;
        }
        Ok(())
    }

    async fn reopen_rotated(&self, core: &mut Core) -> Result<(), MonitorError> {
        if let Some(end) = core.detector.force_end_session() {
            self.forward_session(core, end).await;
        }
        core.last_update_sent = None;
        core.last_event_at = None;

        let position = core.tailer.handle_rotation().await?;
        self.translator.reset();
        core.stats.rotations += 1;
        tracing::info!(
            path = %core.filename_str(),
            offset = position.byte_offset,
            "Following rotated file from the beginning"
        );
        Ok(())
    }

    /// Read and process batches until the file is exhausted.
    async fn read_available(&self, cancel: &CancellationToken) -> Result<(), MonitorError> {
        while !cancel.is_cancelled() {
            let mut core = self.core.lock().await;
            let batch = match core.tailer.tail().await {
                Ok(batch) => batch,
                Err(WatcherError::FileTruncated { path, offset })
                    if self.config.monitor.follow_rotation =>
                {
                    tracing::info!(path = %path.display(), offset, "File truncated under the reader");
                    core.unclaimed_truncations += 1;
                    self.reopen_rotated(&mut core).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if batch.is_exhausted() {
                return Ok(());
            }

            tracing::debug!(bytes = batch.bytes_read, lines = batch.lines.len(), "Read batch");
            for line in batch.lines {
                self.process_line(&mut core, line).await;
            }
        }
        Ok(())
    }

    async fn process_line(&self, core: &mut Core, line: TailLine) {
        core.stats.lines_processed += 1;
        let filename = core.filename_str();

        match self.translator.translate(&line) {
            Ok(Some(event)) => {
                core.stats.events_emitted += 1;
                *core
                    .stats
                    .events_by_type
                    .entry(event.kind.category().to_string())
                    .or_insert(0) += 1;
                core.last_event_at = Some(Instant::now());

                let signals = core.detector.process_event(event.clone());
                self.publish(MonitorEvent::Line(line));
                for signal in signals {
                    self.forward_signal(core, signal).await;
                }
                self.dispatch(&filename, MonitorEvent::Event(event)).await;
            }
            Ok(None) => {
                core.stats.lines_unrecognized += 1;
                self.publish(MonitorEvent::Line(line));
            }
            Err(e) => {
                core.stats.translation_errors += 1;
                tracing::debug!(line = line.line_number, error = %e, "Failed to translate line");
                let line_number = line.line_number;
                self.publish(MonitorEvent::Line(line));
                self.publish(MonitorEvent::Error {
                    message: e.to_string(),
                    line_number: Some(line_number),
                });
            }
        }
    }

    /// Forward what one event did to the sessions.
    ///
    /// Growth is throttled and its snapshot is only built when it goes out.
    async fn forward_signal(&self, core: &mut Core, signal: SessionSignal) {
        let session_id = match signal {
            SessionSignal::Transition(update) => return self.forward_session(core, update).await,
            SessionSignal::Updated { session_id } => session_id,
        };

        let throttle = self.config.monitor.session_update_throttle();
        let now = Instant::now();
        if core
            .last_update_sent
            .as_ref()
            .is_some_and(|(id, last)| *id == session_id && now.duration_since(*last) < throttle)
        {
            return;
        }
        let Some(update) = core.detector.update_snapshot() else {
            return;
        };
        core.last_update_sent = Some((session_id, now));

        let filename = core.filename_str();
        self.dispatch(&filename, MonitorEvent::Session(update)).await;
    }

    /// Forward a session start or end.
    async fn forward_session(&self, core: &mut Core, update: SessionUpdate) {
        core.last_update_sent = None;
        match update.kind {
            SessionUpdateKind::Start => {
                tracing::debug!(session_id = %update.session.id, "Session start");
            }
            SessionUpdateKind::Update => {}
            SessionUpdateKind::End => {
                core.stats.sessions_completed += 1;
                tracing::info!(
                    session_id = %update.session.id,
                    events = update.session.event_count(),
                    duration_ms = update.session.duration_ms(),
                    "Session completed"
                );
            }
        }

        let filename = core.filename_str();
        self.dispatch(&filename, MonitorEvent::Session(update)).await;
    }
}
