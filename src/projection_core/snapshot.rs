//! Snapshot cache for incremental re-aggregation
//!
//! Stores the last `AggregatedRaffle` per raffle id together with the ledger
//! positions it incorporates. The event log stays the source of truth:
//! dropping the cache only costs a full replay.

use super::aggregator::AggregatedRaffle;
use super::events::RaffleId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug)]
pub enum SnapshotError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Serialization(err)
    }
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "IO error: {}", e),
            SnapshotError::Serialization(e) => write!(f, "Serialization error: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

/// On-disk snapshot file layout
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    raffles: Vec<AggregatedRaffle>,
    saved_at: i64,
}

#[derive(Debug, Default, Clone)]
pub struct SnapshotCache {
    entries: HashMap<RaffleId, AggregatedRaffle>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, raffle_id: RaffleId) -> Option<&AggregatedRaffle> {
        self.entries.get(&raffle_id)
    }

    /// Store a snapshot unless the cached one folded events it lacks
    ///
    /// A replay from a lagging read never replaces a fuller snapshot.
    /// Returns true if the entry was written.
    pub fn insert(&mut self, snapshot: AggregatedRaffle) -> bool {
        let raffle_id = snapshot.state.raffle_id;
        if let Some(existing) = self.entries.get(&raffle_id) {
            if !existing.folded_positions.is_subset(&snapshot.folded_positions) {
                log::debug!(
                    "Keeping snapshot for raffle {} ({} positions folded, offered {})",
                    raffle_id,
                    existing.folded_positions.len(),
                    snapshot.folded_positions.len()
                );
                return false;
            }
        }
        self.entries.insert(raffle_id, snapshot);
        true
    }

    pub fn invalidate(&mut self, raffle_id: RaffleId) -> Option<AggregatedRaffle> {
        self.entries.remove(&raffle_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Save all snapshots to a JSON file
    pub fn save(&self, file_path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let file_path = file_path.as_ref();
        let mut raffles: Vec<AggregatedRaffle> = self.entries.values().cloned().collect();
        raffles.sort_by_key(|r| r.state.raffle_id);

        let snapshot = SnapshotFile {
            raffles,
            saved_at: chrono::Utc::now().timestamp(),
        };

        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(file_path, json)?;

        log::debug!("Saved {} raffle snapshots to {}", self.entries.len(), file_path.display());
        Ok(())
    }

    /// Load snapshots from a JSON file; a missing file yields an empty cache
    pub fn load(file_path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let file_path = file_path.as_ref();
        if !file_path.exists() {
            log::info!("No existing snapshot file found: {}", file_path.display());
            return Ok(Self::new());
        }

        let json = fs::read_to_string(file_path)?;
        let snapshot: SnapshotFile = serde_json::from_str(&json)?;

        let mut cache = Self::new();
        for raffle in snapshot.raffles {
            cache.insert(raffle);
        }

        log::info!("Loaded {} raffle snapshots from {}", cache.len(), file_path.display());
        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection_core::aggregator::RaffleAggregator;
    use crate::projection_core::events::{Address, LedgerPosition, RaffleEvent, SubjectReference};
    use tempfile::tempdir;

    fn creation(raffle: u64) -> RaffleEvent {
        RaffleEvent::created(
            raffle,
            LedgerPosition::new(1, 0),
            "0xOrg",
            10,
            1_900_000_000,
            SubjectReference {
                nft_address: Address::new("0xNft"),
                token_id: 1,
            },
            5,
        )
    }

    fn aggregated(raffle: u64, participants: &[&str]) -> AggregatedRaffle {
        let mut events = vec![creation(raffle)];
        for (i, who) in participants.iter().enumerate() {
            events.push(RaffleEvent::participated(raffle, LedgerPosition::new(2 + i as u64, 0), who));
        }
        RaffleAggregator::new(RaffleId(raffle)).aggregate(events).unwrap()
    }

    #[test]
    fn test_insert_keeps_newest() {
        let mut cache = SnapshotCache::new();
        let newer = aggregated(1, &["a", "b"]);
        let older = aggregated(1, &["a"]);

        assert!(cache.insert(newer.clone()));
        assert!(!cache.insert(older));
        assert_eq!(cache.get(RaffleId(1)), Some(&newer));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snapshots/raffles.json");

        let mut cache = SnapshotCache::new();
        cache.insert(aggregated(1, &["a"]));
        cache.insert(aggregated(2, &["a", "b", "c"]));
        cache.save(&path).unwrap();

        let loaded = SnapshotCache::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(RaffleId(2)).unwrap().state.participants.len(), 3);
        assert_eq!(loaded.get(RaffleId(1)), cache.get(RaffleId(1)));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let cache = SnapshotCache::load(dir.path().join("absent.json")).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_rejects_lagging_replay() {
        let mut cache = SnapshotCache::new();
        let full = aggregated(1, &["a", "b"]);
        cache.insert(full.clone());

        // Same highest position, but position 2 was not visible to this replay
        let lagging = RaffleAggregator::new(RaffleId(1))
            .aggregate(vec![
                creation(1),
                RaffleEvent::participated(1, LedgerPosition::new(3, 0), "b"),
            ])
            .unwrap();
        assert_eq!(lagging.highest_position, full.highest_position);

        assert!(!cache.insert(lagging));
        assert_eq!(cache.get(RaffleId(1)), Some(&full));
    }

    #[test]
    fn test_invalidate() {
        let mut cache = SnapshotCache::new();
        cache.insert(aggregated(4, &[]));
        assert!(cache.invalidate(RaffleId(4)).is_some());
        assert!(cache.get(RaffleId(4)).is_none());
    }
}
