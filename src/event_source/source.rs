//! Event source trait and query filter
//!
//! Defines the read interface the projection engine consumes. Delivery is
//! treated as at-least-once, ordered-on-request but not guaranteed, and
//! eventually consistent.

use crate::projection_core::events::{Address, EventKind, LedgerPosition, RaffleEvent, RaffleId};
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug)]
pub enum SourceError {
    Unavailable(String),
    Timeout(Duration),
    Database(rusqlite::Error),
    Decode(String),
}

impl From<rusqlite::Error> for SourceError {
    fn from(err: rusqlite::Error) -> Self {
        SourceError::Database(err)
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        SourceError::Decode(err.to_string())
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Unavailable(msg) => write!(f, "Source unavailable: {}", msg),
            SourceError::Timeout(d) => write!(f, "Read timed out after {}ms", d.as_millis()),
            SourceError::Database(e) => write!(f, "Database error: {}", e),
            SourceError::Decode(msg) => write!(f, "Decode error: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Query filter for a single event kind
///
/// `participant` matches the indexed identity of the event: the participant
/// of a participation, the organizer of a creation, the winner of a trigger.
/// `since` is exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFilter {
    pub kind: EventKind,
    pub raffle_id: Option<RaffleId>,
    pub participant: Option<Address>,
    pub since: Option<LedgerPosition>,
}

impl EventFilter {
    pub fn kind(kind: EventKind) -> Self {
        Self {
            kind,
            raffle_id: None,
            participant: None,
            since: None,
        }
    }

    pub fn for_raffle(mut self, raffle_id: RaffleId) -> Self {
        self.raffle_id = Some(raffle_id);
        self
    }

    pub fn for_participant(mut self, participant: Address) -> Self {
        self.participant = Some(participant);
        self
    }

    pub fn since(mut self, position: Option<LedgerPosition>) -> Self {
        self.since = position;
        self
    }

    pub fn matches(&self, event: &RaffleEvent) -> bool {
        if event.kind() != self.kind {
            return false;
        }
        if let Some(raffle_id) = self.raffle_id {
            if event.raffle_id != raffle_id {
                return false;
            }
        }
        if let Some(participant) = &self.participant {
            if event.payload.identity() != participant {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.position <= since {
                return false;
            }
        }
        true
    }
}

/// Event with its source-local sequence number (1-based, strictly increasing)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    pub sequence: u64,
    pub event: RaffleEvent,
}

/// Read side of the ledger event log
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Return all events matching the filter
    ///
    /// Results may contain duplicates and are not guaranteed to be in ledger order.
    async fn query(&self, filter: &EventFilter) -> Result<Vec<RaffleEvent>, SourceError>;

    /// Get source type for logging
    fn source_name(&self) -> &'static str;
}

/// Event source that can be tailed by sequence cursor
#[async_trait]
pub trait TailableSource: EventSource {
    /// Return up to `limit` events with sequence > `cursor`, ordered by sequence
    async fn read_after(&self, cursor: u64, limit: usize) -> Result<Vec<SequencedEvent>, SourceError>;
}
