//! Reverse index: participant → raffles entered

use super::events::{Address, EventPayload, RaffleEvent, RaffleId};
use std::collections::HashSet;

/// Distinct raffle ids a single participant entered
///
/// Built from participation events regardless of which raffle they belong to.
/// Output order is unspecified; use `sorted_raffle_ids` when determinism matters.
#[derive(Debug, Clone)]
pub struct UserHistoryIndex {
    participant: Address,
    raffle_ids: HashSet<RaffleId>,
}

impl UserHistoryIndex {
    pub fn new(participant: Address) -> Self {
        Self {
            participant,
            raffle_ids: HashSet::new(),
        }
    }

    /// Build the index from an unordered collection of events
    pub fn from_events<'a>(
        participant: Address,
        events: impl IntoIterator<Item = &'a RaffleEvent>,
    ) -> Self {
        let mut index = Self::new(participant);
        for event in events {
            index.add_event(event);
        }
        index
    }

    /// Record a participation event; returns true if the raffle id is new
    ///
    /// Events of other kinds or for other participants are ignored.
    pub fn add_event(&mut self, event: &RaffleEvent) -> bool {
        match &event.payload {
            EventPayload::Participated { participant } if *participant == self.participant => {
                self.raffle_ids.insert(event.raffle_id)
            }
            EventPayload::Participated { participant } => {
                log::debug!(
                    "Ignoring participation by {} in raffle {} (index for {})",
                    participant,
                    event.raffle_id,
                    self.participant
                );
                false
            }
            _ => false,
        }
    }

    pub fn participant(&self) -> &Address {
        &self.participant
    }

    pub fn contains(&self, raffle_id: RaffleId) -> bool {
        self.raffle_ids.contains(&raffle_id)
    }

    pub fn raffle_ids(&self) -> impl Iterator<Item = RaffleId> + '_ {
        self.raffle_ids.iter().copied()
    }

    pub fn sorted_raffle_ids(&self) -> Vec<RaffleId> {
        let mut ids: Vec<RaffleId> = self.raffle_ids.iter().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.raffle_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raffle_ids.is_empty()
    }
}
