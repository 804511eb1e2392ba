//! Combat session detection.

mod detector;
mod types;

pub use detector::StreamingSessionDetector;
pub use types::{
    ActiveSession, SessionParticipantState, SessionSignal, SessionState, SessionSummary,
    SessionUpdate, SessionUpdateKind,
};
