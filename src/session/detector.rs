//! Streaming session detector.
//!
//! Groups timestamped combat events into sessions separated by an
//! inactivity gap. Sessions below the size thresholds are dropped as noise
//! when they end.

use std::time::Duration;

use super::types::{ActiveSession, SessionSignal, SessionState, SessionUpdate, SessionUpdateKind};
use crate::config::SessionDetectorConfig;
use crate::parser::CombatEvent;

/// State machine turning a stream of events into session transitions.
#[derive(Debug, Clone)]
pub struct StreamingSessionDetector {
    config: SessionDetectorConfig,
    active: Option<ActiveSession>,
    sessions_completed: u64,
    sessions_discarded: u64,
}

impl Default for StreamingSessionDetector {
    fn default() -> Self {
        Self::new(SessionDetectorConfig::default())
    }
}

impl StreamingSessionDetector {
    #[must_use]
    pub fn new(config: SessionDetectorConfig) -> Self {
        Self {
            config,
            active: None,
            sessions_completed: 0,
            sessions_discarded: 0,
        }
    }

    /// Feed one event. Returns the signals it caused, in order.
    ///
    /// A gap larger than the inactivity timeout ends the current session
    /// before the event opens a new one. Growth of the active session is
    /// reported without a snapshot.
    pub fn process_event(&mut self, event: CombatEvent) -> Vec<SessionSignal> {
        let mut signals = Vec::new();

        if let Some(session) = self.active.as_ref() {
            let gap_ms = event
                .timestamp
                .signed_duration_since(session.last_event_time)
                .num_milliseconds();
            if gap_ms > i64::try_from(self.config.inactivity_timeout_ms).unwrap_or(i64::MAX) {
                tracing::debug!(
                    session_id = %session.id,
                    gap_ms,
                    "Inactivity gap exceeded, closing session"
                );
                signals.extend(self.finalize().map(SessionSignal::Transition));
            }
        }

        match self.active.as_mut() {
            Some(session) => {
                session.push(event);
                signals.push(SessionSignal::Updated {
                    session_id: session.id.clone(),
                });
            }
            None => {
                let session = ActiveSession::begin(event);
                tracing::debug!(session_id = %session.id, "Session started");
                signals.push(SessionSignal::Transition(SessionUpdate {
                    kind: SessionUpdateKind::Start,
                    session: session.clone(),
                }));
                self.active = Some(session);
            }
        }

        signals
    }

    /// `update` notification carrying a copy of the active session.
    #[must_use]
    pub fn update_snapshot(&self) -> Option<SessionUpdate> {
        self.active.as_ref().map(|session| SessionUpdate {
            kind: SessionUpdateKind::Update,
            session: session.clone(),
        })
    }

    /// End the active session now, e.g. on rotation or shutdown.
    ///
    /// The size thresholds still apply, so a one-event session ends silently.
    pub fn force_end_session(&mut self) -> Option<SessionUpdate> {
        self.finalize()
    }

    /// End the active session if nothing has arrived for the inactivity timeout.
    ///
    /// `idle_for` is wall-clock time since the last event was processed.
    pub fn end_if_idle(&mut self, idle_for: Duration) -> Option<SessionUpdate> {
        if self.active.is_some() && idle_for > self.config.inactivity_timeout() {
            return self.finalize();
        }
        None
    }

    fn finalize(&mut self) -> Option<SessionUpdate> {
        let mut session = self.active.take()?;

        if !self.qualifies(&session) {
            self.sessions_discarded += 1;
            tracing::debug!(
                session_id = %session.id,
                events = session.event_count(),
                duration_ms = session.duration_ms(),
                "Discarding session below thresholds"
            );
            return None;
        }

        self.sessions_completed += 1;
        session.state = SessionState::Ending;
        tracing::debug!(
            session_id = %session.id,
            events = session.event_count(),
            duration_ms = session.duration_ms(),
            "Session ended"
        );
        Some(SessionUpdate {
            kind: SessionUpdateKind::End,
            session,
        })
    }

    fn qualifies(&self, session: &ActiveSession) -> bool {
        session.event_count() >= self.config.min_events_for_session
            && session.duration_ms() >= self.config.min_duration_ms
    }

    /// Copy of the session under construction.
    #[must_use]
    pub fn active_session(&self) -> Option<ActiveSession> {
        self.active.clone()
    }

    /// Borrowed view of the session under construction.
    #[must_use]
    pub fn active_session_ref(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    /// `Active` while a session is open, otherwise `Idle`.
    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.active.is_some() {
            SessionState::Active
        } else {
            SessionState::Idle
        }
    }

    /// Sessions that ended and met the thresholds.
    #[must_use]
    pub fn sessions_completed(&self) -> u64 {
        self.sessions_completed
    }

    /// Sessions dropped below the thresholds.
    #[must_use]
    pub fn sessions_discarded(&self) -> u64 {
        self.sessions_discarded
    }

    /// Gap and threshold settings in use.
    #[must_use]
    pub fn config(&self) -> &SessionDetectorConfig {
        &self.config
    }
}
