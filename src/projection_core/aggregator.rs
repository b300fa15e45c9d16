//! Event fold for a single raffle
//!
//! Folds the raw event history of one raffle id into a `RaffleState`.
//!
//! Key invariants:
//! - Events are applied in ledger order, never in retrieval order
//! - Exactly one creation event per raffle id
//! - A participant is counted at most once
//! - The first trigger wins, `triggered` never reverts
//!
//! Conditions that are unexpected but survivable are recorded as `Anomaly`
//! values on the result instead of failing the fold.

use super::deduplicator::ParticipationDeduplicator;
use super::error::ProjectionError;
use super::events::{
    Address, EventKind, EventPayload, LedgerPosition, RaffleEvent, RaffleId, SubjectReference,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Winner selection outcome recorded from the trigger event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawOutcome {
    pub winner: Address,
    pub random_index: u64,
    pub position: LedgerPosition,
}

/// Derived state of one raffle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleState {
    pub raffle_id: RaffleId,
    pub organizer: Address,
    pub max_participants: u32,
    /// Unix timestamp (seconds) after which the contract refuses participation
    pub deadline: i64,
    pub subject: SubjectReference,
    pub randomness_request_id: u64,
    /// Insertion order = ledger order, no duplicates
    pub participants: Vec<Address>,
    /// Present iff the raffle was triggered
    pub draw: Option<DrawOutcome>,
}

impl RaffleState {
    fn from_creation(event: &RaffleEvent) -> Result<Self, ProjectionError> {
        match &event.payload {
            EventPayload::Created {
                organizer,
                max_participants,
                deadline,
                subject,
                randomness_request_id,
            } => {
                if *max_participants == 0 {
                    return Err(ProjectionError::inconsistent(
                        event.raffle_id,
                        format!("creation event at {} has max_participants = 0", event.position),
                    ));
                }

                Ok(Self {
                    raffle_id: event.raffle_id,
                    organizer: organizer.clone(),
                    max_participants: *max_participants,
                    deadline: *deadline,
                    subject: subject.clone(),
                    randomness_request_id: *randomness_request_id,
                    participants: Vec::new(),
                    draw: None,
                })
            }
            other => Err(ProjectionError::inconsistent(
                event.raffle_id,
                format!("expected creation event, got {}", other.kind()),
            )),
        }
    }

    pub fn triggered(&self) -> bool {
        self.draw.is_some()
    }

    pub fn winner(&self) -> Option<&Address> {
        self.draw.as_ref().map(|d| &d.winner)
    }

    pub fn random_index(&self) -> Option<u64> {
        self.draw.as_ref().map(|d| d.random_index)
    }

    pub fn is_full(&self) -> bool {
        self.participants.len() >= self.max_participants as usize
    }
}

/// Non-fatal irregularity found while folding events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    /// The source returned an event for another raffle
    ForeignEvent {
        raffle_id: RaffleId,
        position: LedgerPosition,
    },
    /// The same event was delivered more than once
    DuplicateDelivery {
        kind: EventKind,
        position: LedgerPosition,
    },
    /// Event ordered before the raffle's creation; ignored
    PrecedesCreation {
        kind: EventKind,
        position: LedgerPosition,
    },
    DuplicateParticipation {
        participant: Address,
        position: LedgerPosition,
    },
    ParticipationAfterTrigger {
        participant: Address,
        position: LedgerPosition,
    },
    CapacityExceeded {
        participant: Address,
        max_participants: u32,
        position: LedgerPosition,
    },
    /// Second trigger; the first one by ledger order is kept
    DuplicateTrigger {
        winner: Address,
        position: LedgerPosition,
    },
    RandomIndexOutOfRange {
        random_index: u64,
        participant_count: usize,
        position: LedgerPosition,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ForeignEvent { raffle_id, position } => {
                write!(f, "event for raffle {} at {} outside query filter", raffle_id, position)
            }
            Anomaly::DuplicateDelivery { kind, position } => {
                write!(f, "{} event at {} delivered more than once", kind, position)
            }
            Anomaly::PrecedesCreation { kind, position } => {
                write!(f, "{} event at {} precedes creation", kind, position)
            }
            Anomaly::DuplicateParticipation {
                participant,
                position,
            } => write!(f, "duplicate participation by {} at {}", participant, position),
            Anomaly::ParticipationAfterTrigger {
                participant,
                position,
            } => write!(f, "participation by {} at {} after trigger", participant, position),
            Anomaly::CapacityExceeded {
                participant,
                max_participants,
                position,
            } => write!(
                f,
                "participation by {} at {} exceeds max_participants {}",
                participant, position, max_participants
            ),
            Anomaly::DuplicateTrigger { winner, position } => {
                write!(f, "second trigger (winner {}) at {} ignored", winner, position)
            }
            Anomaly::RandomIndexOutOfRange {
                random_index,
                participant_count,
                position,
            } => write!(
                f,
                "random index {} at {} outside 0..{}",
                random_index, position, participant_count
            ),
        }
    }
}

/// Result of one aggregation pass
///
/// `anomalies` is empty for a clean history. `highest_position` is the last
/// ledger position incorporated and `folded_positions` every position folded
/// so far (redeliveries collapsed), used to resume incrementally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedRaffle {
    pub state: RaffleState,
    pub anomalies: Vec<Anomaly>,
    pub highest_position: LedgerPosition,
    #[serde(default)]
    pub folded_positions: BTreeSet<LedgerPosition>,
}

impl AggregatedRaffle {
    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Whether `events` can be resumed on top of this aggregation
    ///
    /// False when the log shows a position at or below `highest_position`
    /// that was never folded (an event that became visible late), or lacks
    /// one that was (a read lagging behind this aggregation). Either way only
    /// a full replay matches the log.
    pub fn covers(&self, events: &[RaffleEvent]) -> bool {
        let visible: BTreeSet<LedgerPosition> = events
            .iter()
            .filter(|e| e.raffle_id == self.state.raffle_id && e.position <= self.highest_position)
            .map(|e| e.position)
            .collect();
        visible == self.folded_positions
    }
}

/// Folds events of a single raffle id into a `RaffleState`
#[derive(Debug, Clone, Copy)]
pub struct RaffleAggregator {
    raffle_id: RaffleId,
}

impl RaffleAggregator {
    pub fn new(raffle_id: RaffleId) -> Self {
        Self { raffle_id }
    }

    pub fn raffle_id(&self) -> RaffleId {
        self.raffle_id
    }

    /// Fold a complete event history
    ///
    /// # Returns
    /// * `Ok(AggregatedRaffle)` - State plus any recorded anomalies
    /// * `Err(NotFound)` - No creation event
    /// * `Err(InconsistentState)` - Duplicate creation, conflicting events at one
    ///   position, or an invalid creation fact
    pub fn aggregate(&self, events: Vec<RaffleEvent>) -> Result<AggregatedRaffle, ProjectionError> {
        let mut anomalies = Vec::new();
        let events = self.prepare(events, &mut anomalies)?;

        let creations: Vec<&RaffleEvent> = events
            .iter()
            .filter(|e| e.kind() == EventKind::Created)
            .collect();

        let creation = match creations.as_slice() {
            [] => return Err(ProjectionError::NotFound(self.raffle_id)),
            [single] => *single,
            many => {
                let positions: Vec<String> = many.iter().map(|e| e.position.to_string()).collect();
                return Err(ProjectionError::inconsistent(
                    self.raffle_id,
                    format!("{} creation events at [{}]", many.len(), positions.join(", ")),
                ));
            }
        };

        let mut fold = Fold {
            raffle_id: self.raffle_id,
            state: RaffleState::from_creation(creation)?,
            dedup: ParticipationDeduplicator::new(),
            anomalies,
            highest_position: creation.position,
            folded_positions: events.iter().map(|e| e.position).collect(),
        };
        let creation_position = creation.position;

        for event in events {
            if event.position < creation_position {
                fold.record(Anomaly::PrecedesCreation {
                    kind: event.kind(),
                    position: event.position,
                });
                continue;
            }
            fold.apply(event);
        }

        Ok(fold.finish())
    }

    /// Fold events on top of a previous aggregation
    ///
    /// Only events strictly after `previous.highest_position` are applied;
    /// earlier ones are discarded before any anomaly is recorded. Callers
    /// check `AggregatedRaffle::covers` first when the log may have changed
    /// below that point. A creation event past it means the history is
    /// inconsistent.
    pub fn resume(
        &self,
        previous: AggregatedRaffle,
        events: Vec<RaffleEvent>,
    ) -> Result<AggregatedRaffle, ProjectionError> {
        if previous.state.raffle_id != self.raffle_id {
            return Err(ProjectionError::inconsistent(
                self.raffle_id,
                format!("snapshot belongs to raffle {}", previous.state.raffle_id),
            ));
        }

        let AggregatedRaffle {
            state,
            mut anomalies,
            highest_position,
            mut folded_positions,
        } = previous;

        let events: Vec<RaffleEvent> = events
            .into_iter()
            .filter(|e| e.position > highest_position)
            .collect();
        let mut fresh = Vec::new();
        let events = self.prepare(events, &mut fresh)?;
        // Foreign events past the snapshot are re-passed on every resume
        for anomaly in fresh {
            if !anomalies.contains(&anomaly) {
                anomalies.push(anomaly);
            }
        }

        if let Some(creation) = events.iter().find(|e| e.kind() == EventKind::Created) {
            return Err(ProjectionError::inconsistent(
                self.raffle_id,
                format!("creation event at {} after snapshot at {}", creation.position, highest_position),
            ));
        }

        folded_positions.extend(events.iter().map(|e| e.position));

        let mut fold = Fold {
            raffle_id: self.raffle_id,
            dedup: ParticipationDeduplicator::with_admitted(&state.participants),
            state,
            anomalies,
            highest_position,
            folded_positions,
        };

        for event in events {
            fold.apply(event);
        }

        Ok(fold.finish())
    }

    /// Drop foreign events, sort by ledger position and collapse redeliveries
    fn prepare(
        &self,
        events: Vec<RaffleEvent>,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<Vec<RaffleEvent>, ProjectionError> {
        let mut events: Vec<RaffleEvent> = events
            .into_iter()
            .filter(|event| {
                if event.raffle_id == self.raffle_id {
                    return true;
                }
                log::warn!(
                    "⚠️  Raffle {}: dropping event for raffle {} at {}",
                    self.raffle_id,
                    event.raffle_id,
                    event.position
                );
                anomalies.push(Anomaly::ForeignEvent {
                    raffle_id: event.raffle_id,
                    position: event.position,
                });
                false
            })
            .collect();

        // Stable: equal positions keep arrival order for the conflict check below
        events.sort_by_key(|e| e.position);

        let mut unique: Vec<RaffleEvent> = Vec::with_capacity(events.len());
        for event in events {
            if let Some(last) = unique.last() {
                if last.position == event.position {
                    if last.payload != event.payload {
                        return Err(ProjectionError::inconsistent(
                            self.raffle_id,
                            format!(
                                "conflicting {} and {} events at {}",
                                last.kind(),
                                event.kind(),
                                event.position
                            ),
                        ));
                    }
                    log::debug!(
                        "Raffle {}: collapsing redelivered {} event at {}",
                        self.raffle_id,
                        event.kind(),
                        event.position
                    );
                    anomalies.push(Anomaly::DuplicateDelivery {
                        kind: event.kind(),
                        position: event.position,
                    });
                    continue;
                }
            }
            unique.push(event);
        }

        Ok(unique)
    }
}

/// Mutable state of one fold pass
struct Fold {
    raffle_id: RaffleId,
    state: RaffleState,
    dedup: ParticipationDeduplicator,
    anomalies: Vec<Anomaly>,
    highest_position: LedgerPosition,
    folded_positions: BTreeSet<LedgerPosition>,
}

impl Fold {
    fn apply(&mut self, event: RaffleEvent) {
        self.highest_position = self.highest_position.max(event.position);

        match event.payload {
            // The single creation event was consumed when the fold was built
            EventPayload::Created { .. } => {}
            EventPayload::Participated { participant } => {
                self.apply_participation(participant, event.position)
            }
            EventPayload::Triggered {
                winner,
                random_index,
            } => self.apply_trigger(winner, random_index, event.position),
        }
    }

    fn apply_participation(&mut self, participant: Address, position: LedgerPosition) {
        if !self.dedup.admit(&participant) {
            self.record(Anomaly::DuplicateParticipation {
                participant,
                position,
            });
            return;
        }

        if self.state.triggered() {
            self.record(Anomaly::ParticipationAfterTrigger {
                participant: participant.clone(),
                position,
            });
        }

        if self.state.is_full() {
            self.record(Anomaly::CapacityExceeded {
                participant: participant.clone(),
                max_participants: self.state.max_participants,
                position,
            });
        }

        self.state.participants.push(participant);
    }

    fn apply_trigger(&mut self, winner: Address, random_index: u64, position: LedgerPosition) {
        if self.state.triggered() {
            self.record(Anomaly::DuplicateTrigger { winner, position });
            return;
        }

        let participant_count = self.state.participants.len();
        if random_index >= participant_count as u64 {
            self.record(Anomaly::RandomIndexOutOfRange {
                random_index,
                participant_count,
                position,
            });
        }

        self.state.draw = Some(DrawOutcome {
            winner,
            random_index,
            position,
        });
    }

    fn record(&mut self, anomaly: Anomaly) {
        log::warn!("⚠️  Raffle {}: {}", self.raffle_id, anomaly);
        self.anomalies.push(anomaly);
    }

    fn finish(self) -> AggregatedRaffle {
        AggregatedRaffle {
            state: self.state,
            anomalies: self.anomalies,
            highest_position: self.highest_position,
            folded_positions: self.folded_positions,
        }
    }
}
