//! Failure taxonomy for raffle projections
//!
//! `NotFound` and `InconsistentState` are structural: retrying will not help.
//! `SourceUnavailable` is transient and left to the caller to retry.
//! Non-fatal findings are never errors, see `Anomaly`.

use super::events::RaffleId;
use crate::event_source::SourceError;

#[derive(Debug)]
pub enum ProjectionError {
    /// No creation event exists for the raffle
    NotFound(RaffleId),
    /// The event history cannot be folded into a single state
    InconsistentState { raffle_id: RaffleId, reason: String },
    /// The event source could not be reached or timed out
    SourceUnavailable(SourceError),
}

impl ProjectionError {
    pub fn inconsistent(raffle_id: RaffleId, reason: impl Into<String>) -> Self {
        ProjectionError::InconsistentState {
            raffle_id,
            reason: reason.into(),
        }
    }

    /// True when a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ProjectionError::SourceUnavailable(_))
    }
}

impl From<SourceError> for ProjectionError {
    fn from(err: SourceError) -> Self {
        ProjectionError::SourceUnavailable(err)
    }
}

impl std::fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectionError::NotFound(id) => write!(f, "No raffle found for raffleId {}", id),
            ProjectionError::InconsistentState { raffle_id, reason } => {
                write!(f, "Inconsistent state for raffle {}: {}", raffle_id, reason)
            }
            ProjectionError::SourceUnavailable(e) => write!(f, "Event source unavailable: {}", e),
        }
    }
}

impl std::error::Error for ProjectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProjectionError::SourceUnavailable(e) => Some(e),
            _ => None,
        }
    }
}
