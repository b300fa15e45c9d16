//! Per-raffle participation deduplication
//!
//! Event delivery is at-least-once, so the same participant can show up
//! several times for one raffle. Only the first admission counts.

use super::events::Address;
use std::collections::HashSet;

/// Set of admitted participants for a single aggregation pass
///
/// Never shared across raffles or across concurrent calls.
#[derive(Debug, Default, Clone)]
pub struct ParticipationDeduplicator {
    seen: HashSet<Address>,
}

impl ParticipationDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the admitted set from an already-projected participant list
    pub fn with_admitted<'a>(participants: impl IntoIterator<Item = &'a Address>) -> Self {
        Self {
            seen: participants.into_iter().cloned().collect(),
        }
    }

    /// Returns true the first time a participant is admitted
    pub fn admit(&mut self, participant: &Address) -> bool {
        if self.seen.contains(participant) {
            return false;
        }
        self.seen.insert(participant.clone())
    }

    pub fn contains(&self, participant: &Address) -> bool {
        self.seen.contains(participant)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_admission_only() {
        let mut dedup = ParticipationDeduplicator::new();
        let x = Address::new("0xaa");

        assert!(dedup.admit(&x));
        assert!(!dedup.admit(&x));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_case_variants_are_one_participant() {
        let mut dedup = ParticipationDeduplicator::new();

        assert!(dedup.admit(&Address::new("0xAbCd")));
        assert!(!dedup.admit(&Address::new("0xabcd")));
        assert!(dedup.contains(&Address::new("0xABCD")));
    }

    #[test]
    fn test_outcome_independent_of_duplicate_positions() {
        let a = Address::new("a");
        let b = Address::new("b");

        let mut first = ParticipationDeduplicator::new();
        let admitted_first: Vec<bool> = [&a, &a, &b].iter().map(|p| first.admit(p)).collect();

        let mut second = ParticipationDeduplicator::new();
        let admitted_second: Vec<bool> = [&a, &b, &a, &b].iter().map(|p| second.admit(p)).collect();

        assert_eq!(admitted_first, vec![true, false, true]);
        assert_eq!(admitted_second, vec![true, true, false, false]);
        assert_eq!(first.len(), second.len());
    }

    #[test]
    fn test_with_admitted_resumes() {
        let existing = vec![Address::new("x"), Address::new("y")];
        let mut dedup = ParticipationDeduplicator::with_admitted(&existing);

        assert!(!dedup.admit(&Address::new("X")));
        assert!(dedup.admit(&Address::new("z")));
        assert_eq!(dedup.len(), 3);
    }
}
