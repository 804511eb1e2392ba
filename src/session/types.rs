//! Session data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::parser::{CombatEvent, CombatEventKind};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    Ending,
}

/// Running totals for one entity inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParticipantState {
    pub entity: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub event_count: u64,
    pub damage_dealt: u64,
    pub healing_done: u64,
    pub death_count: u64,
}

impl SessionParticipantState {
    fn new(entity: &str, seen: DateTime<Utc>) -> Self {
        Self {
            entity: entity.to_string(),
            first_seen: seen,
            last_seen: seen,
            event_count: 0,
            damage_dealt: 0,
            healing_done: 0,
            death_count: 0,
        }
    }

    fn touch(&mut self, seen: DateTime<Utc>) {
        self.event_count = self.event_count.saturating_add(1);
        self.last_seen = self.last_seen.max(seen);
    }
}

/// A combat session under construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSession {
    pub id: String,
    pub state: SessionState,
    pub start_time: DateTime<Utc>,
    pub last_event_time: DateTime<Utc>,
    /// Events in arrival order.
    pub events: Vec<CombatEvent>,
    /// Entity name to running totals.
    #[serde(rename = "participants")]
    pub participant_map: BTreeMap<String, SessionParticipantState>,
}

impl ActiveSession {
    pub(crate) fn begin(first: CombatEvent) -> Self {
        let mut session = Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: SessionState::Active,
            start_time: first.timestamp,
            last_event_time: first.timestamp,
            events: Vec::new(),
            participant_map: BTreeMap::new(),
        };
        session.push(first);
        session
    }

    pub(crate) fn push(&mut self, event: CombatEvent) {
        // Out-of-order timestamps never move the session window backwards.
        self.last_event_time = self.last_event_time.max(event.timestamp);
        self.record_participants(&event);
        self.events.push(event);
    }

    fn record_participants(&mut self, event: &CombatEvent) {
        let amount = event.amount.unwrap_or(0);

        if let Some(source) = event.source.as_deref() {
            let state = self
                .participant_map
                .entry(source.to_string())
                .or_insert_with(|| SessionParticipantState::new(source, event.timestamp));
            state.touch(event.timestamp);
            if event.kind.is_damage() {
                state.damage_dealt = state.damage_dealt.saturating_add(amount);
            } else if event.kind.is_healing() {
                state.healing_done = state.healing_done.saturating_add(amount);
            }
        }

        if let Some(target) = event.target.as_deref() {
            let state = self
                .participant_map
                .entry(target.to_string())
                .or_insert_with(|| SessionParticipantState::new(target, event.timestamp));
            if event.source.as_deref() != Some(target) {
                state.touch(event.timestamp);
            }
            if event.kind == CombatEventKind::Death {
                state.death_count = state.death_count.saturating_add(1);
            }
        }
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        let millis = self
            .last_event_time
            .signed_duration_since(self.start_time)
            .num_milliseconds();
        u64::try_from(millis).unwrap_or(0)
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn participant(&self, entity: &str) -> Option<&SessionParticipantState> {
        self.participant_map.get(entity)
    }

    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            event_count: self.event_count(),
            duration_ms: self.duration_ms(),
        }
    }
}

/// Compact view of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub event_count: usize,
    pub duration_ms: u64,
}

/// Kind of session transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionUpdateKind {
    Start,
    Update,
    End,
}

/// Outward notification of a session transition, carrying a copy of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    pub kind: SessionUpdateKind,
    pub session: ActiveSession,
}

impl SessionUpdate {
    /// Notification name, e.g. `session:end`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            SessionUpdateKind::Start => "session:start",
            SessionUpdateKind::Update => "session:update",
            SessionUpdateKind::End => "session:end",
        }
    }
}

/// What one processed event did to the session stream.
///
/// Growth of the active session carries only its id; callers that forward
/// it take a snapshot with [`StreamingSessionDetector::update_snapshot`].
///
/// [`StreamingSessionDetector::update_snapshot`]: super::StreamingSessionDetector::update_snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// A session started or ended.
    Transition(SessionUpdate),
    /// The active session absorbed the event.
    Updated { session_id: String },
}

impl SessionSignal {
    #[must_use]
    pub fn kind(&self) -> SessionUpdateKind {
        match self {
            Self::Transition(update) => update.kind,
            Self::Updated { .. } => SessionUpdateKind::Update,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            Self::Transition(update) => &update.session.id,
            Self::Updated { session_id } => session_id,
        }
    }
}
