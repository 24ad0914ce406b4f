//! Engine error taxonomy.
//!
//! Errors that cross the usecase boundary. Failures scoped to a single
//! runner (price unavailable) or a single recipient (transfer failure)
//! are contained where they occur and recorded, never raised here —
//! only violations of race-wide or system-wide rules surface as errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::race::RaceStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Requested state change is not an edge of the transition graph.
    /// Never retried automatically.
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: RaceStatus, to: RaceStatus },

    /// An Open -> Locked attempt while another race holds the live slot.
    /// The scheduler retries on a later tick or sweep cycle.
    #[error("another race is already live: {holder}")]
    ConcurrentLiveRace { holder: String },

    /// The transition's window has not elapsed yet. Only admin actors
    /// may force past this.
    #[error("transition not due until {due_at}")]
    TransitionNotDue { due_at: DateTime<Utc> },

    /// No race with this id exists in the repository.
    #[error("race not found: {0}")]
    RaceNotFound(String),

    /// Persistence failed mid-transition. The transition is considered
    /// not applied; retrying from scratch is always safe because
    /// transitions are idempotent.
    #[error("repository error: {0}")]
    Repository(#[from] anyhow::Error),
}
