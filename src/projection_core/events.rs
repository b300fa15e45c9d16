//! Raffle event model and typed identifiers
//!
//! Events are immutable facts read from the ledger. Everything the projection
//! engine knows about a raffle is derived from these three variants.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Ledger-assigned raffle identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RaffleId(pub u64);

impl fmt::Display for RaffleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Account identity (organizer, participant, winner)
///
/// Hex addresses are not case-preserving in text form, so equality and
/// hashing ignore ASCII case. The original spelling is kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used for indexing and filtering
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Total-order position of an event in the ledger
///
/// Orders by block first, then by the log index inside the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerPosition {
    pub block_number: u64,
    pub log_index: u32,
}

impl LedgerPosition {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }
}

impl fmt::Display for LedgerPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Prize reference: NFT contract plus token id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectReference {
    pub nft_address: Address,
    pub token_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Created,
    Participated,
    Triggered,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Participated => "participated",
            EventKind::Triggered => "triggered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventKind::Created),
            "participated" => Some(EventKind::Participated),
            "triggered" => Some(EventKind::Triggered),
            _ => None,
        }
    }

    pub fn all() -> [EventKind; 3] {
        [
            EventKind::Created,
            EventKind::Participated,
            EventKind::Triggered,
        ]
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventPayload {
    Created {
        organizer: Address,
        max_participants: u32,
        deadline: i64,
        subject: SubjectReference,
        randomness_request_id: u64,
    },
    Participated {
        participant: Address,
    },
    Triggered {
        winner: Address,
        random_index: u64,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Created { .. } => EventKind::Created,
            EventPayload::Participated { .. } => EventKind::Participated,
            EventPayload::Triggered { .. } => EventKind::Triggered,
        }
    }

    /// The indexed identity of the event (organizer, participant or winner)
    pub fn identity(&self) -> &Address {
        match self {
            EventPayload::Created { organizer, .. } => organizer,
            EventPayload::Participated { participant } => participant,
            EventPayload::Triggered { winner, .. } => winner,
        }
    }
}

/// A single ledger event scoped to one raffle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleEvent {
    pub raffle_id: RaffleId,
    pub position: LedgerPosition,
    pub payload: EventPayload,
}

impl RaffleEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Parse a RaffleEvent from a JSONL line
    pub fn from_jsonl(line: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let event: RaffleEvent = serde_json::from_str(line)?;
        Ok(event)
    }

    pub fn created(
        raffle_id: u64,
        position: LedgerPosition,
        organizer: &str,
        max_participants: u32,
        deadline: i64,
        subject: SubjectReference,
        randomness_request_id: u64,
    ) -> Self {
        Self {
            raffle_id: RaffleId(raffle_id),
            position,
            payload: EventPayload::Created {
                organizer: Address::new(organizer),
                max_participants,
                deadline,
                subject,
                randomness_request_id,
            },
        }
    }

    pub fn participated(raffle_id: u64, position: LedgerPosition, participant: &str) -> Self {
        Self {
            raffle_id: RaffleId(raffle_id),
            position,
            payload: EventPayload::Participated {
                participant: Address::new(participant),
            },
        }
    }

    pub fn triggered(
        raffle_id: u64,
        position: LedgerPosition,
        winner: &str,
        random_index: u64,
    ) -> Self {
        Self {
            raffle_id: RaffleId(raffle_id),
            position,
            payload: EventPayload::Triggered {
                winner: Address::new(winner),
                random_index,
            },
        }
    }
}
