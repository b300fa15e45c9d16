//! Projection Core - Event-Sourced Raffle State
//!
//! Rebuilds raffle state from an append-only ledger event log. Nothing here
//! writes back to the ledger; every result is reproducible from raw events.
//!
//! # Architecture
//!
//! ```text
//! EventSource (Created / Participated / Triggered)
//!     ↓
//! RaffleAggregator (+ ParticipationDeduplicator) → AggregatedRaffle
//!     ↓                                              ↑
//! UserHistoryIndex (participant → raffle ids)        SnapshotCache (optional)
//!     ↓
//! RaffleStatsProjector → RaffleStats / UserHistory
//! ```

pub mod aggregator;
pub mod deduplicator;
pub mod error;
pub mod events;
pub mod projector;
pub mod snapshot;
pub mod user_history;

pub use aggregator::{AggregatedRaffle, Anomaly, DrawOutcome, RaffleAggregator, RaffleState};
pub use deduplicator::ParticipationDeduplicator;
pub use error::ProjectionError;
pub use events::{
    Address, EventKind, EventPayload, LedgerPosition, RaffleEvent, RaffleId, SubjectReference,
};
pub use projector::{
    ProjectorConfig, RaffleStats, RaffleStatsProjector, SkipPolicy, SkippedRaffle, UserHistory,
    UserRaffleEntry,
};
pub use snapshot::{SnapshotCache, SnapshotError};
pub use user_history::UserHistoryIndex;
