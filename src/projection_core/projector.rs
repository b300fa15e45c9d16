//! Raffle stats projector
//!
//! Top-level read façade. Answers two questions from the event log:
//! - what is the full state of raffle R
//! - which raffles did user U enter, and did they win
//!
//! Both operations are pure reads and safe to retry or run concurrently.
//! Every aggregation gets its own deduplicator and index; nothing mutable is
//! shared between raffles except the optional snapshot cache.

use super::aggregator::{AggregatedRaffle, Anomaly, RaffleAggregator};
use super::error::ProjectionError;
use super::events::{Address, EventKind, RaffleEvent, RaffleId, SubjectReference};
use super::snapshot::SnapshotCache;
use super::user_history::UserHistoryIndex;
use crate::event_source::{EventFilter, EventSource, SourceError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;

/// What to do with raffles that fail to resolve inside a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// Log a warning and list the raffle in `UserHistory::skipped`
    Report,
    /// Log at debug level only
    Omit,
}

impl SkipPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipPolicy::Report => "report",
            SkipPolicy::Omit => "omit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "report" => Some(SkipPolicy::Report),
            "omit" => Some(SkipPolicy::Omit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Upper bound for each individual source read (None = unbounded)
    pub read_timeout: Option<Duration>,
    /// Raffles resolved in parallel by `get_user_participated_raffles`
    pub max_concurrent_resolutions: usize,
    pub skip_policy: SkipPolicy,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(10)),
            max_concurrent_resolutions: 8,
            skip_policy: SkipPolicy::Report,
        }
    }
}

/// Full view of one raffle
///
/// `winner` and `random_index` are only present once the raffle was triggered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaffleStats {
    pub raffle_id: RaffleId,
    pub organizer: Address,
    pub max_participants: u32,
    pub deadline: i64,
    pub subject: SubjectReference,
    pub randomness_request_id: u64,
    pub participants: Vec<Address>,
    pub total_participants: usize,
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_index: Option<u64>,
    pub anomalies: Vec<Anomaly>,
}

impl From<AggregatedRaffle> for RaffleStats {
    fn from(aggregated: AggregatedRaffle) -> Self {
        let AggregatedRaffle {
            state, anomalies, ..
        } = aggregated;
        let (winner, random_index) = match state.draw {
            Some(draw) => (Some(draw.winner), Some(draw.random_index)),
            None => (None, None),
        };

        Self {
            raffle_id: state.raffle_id,
            organizer: state.organizer,
            max_participants: state.max_participants,
            deadline: state.deadline,
            subject: state.subject,
            randomness_request_id: state.randomness_request_id,
            total_participants: state.participants.len(),
            participants: state.participants,
            triggered: winner.is_some(),
            winner,
            random_index,
            anomalies,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRaffleEntry {
    pub raffle_id: RaffleId,
    pub organizer: Address,
    pub won: bool,
}

/// A raffle left out of a batch result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRaffle {
    pub raffle_id: RaffleId,
    pub error: String,
    /// True when a retry may succeed (source unavailable)
    pub transient: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserHistory {
    pub user: Address,
    /// Sorted by raffle id
    pub entries: Vec<UserRaffleEntry>,
    pub skipped: Vec<SkippedRaffle>,
}

#[derive(Clone)]
pub struct RaffleStatsProjector {
    source: Arc<dyn EventSource>,
    config: ProjectorConfig,
    cache: Option<Arc<RwLock<SnapshotCache>>>,
}

impl RaffleStatsProjector {
    pub fn new(source: Arc<dyn EventSource>, config: ProjectorConfig) -> Self {
        Self {
            source,
            config,
            cache: None,
        }
    }

    /// Resume aggregations from (and write them back to) a snapshot cache
    pub fn with_cache(mut self, cache: Arc<RwLock<SnapshotCache>>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    /// Single bounded read against the source
    async fn read(&self, filter: EventFilter) -> Result<Vec<RaffleEvent>, SourceError> {
        match self.config.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.source.query(&filter))
                .await
                .map_err(|_| {
                    log::warn!(
                        "⏳ {} read for {:?} timed out after {}ms",
                        self.source.source_name(),
                        filter,
                        limit.as_millis()
                    );
                    SourceError::Timeout(limit)
                })?,
            None => self.source.query(&filter).await,
        }
    }

    /// Fold the event history of one raffle, including anomalies
    pub async fn aggregate_raffle(&self, raffle_id: RaffleId) -> Result<AggregatedRaffle, ProjectionError> {
        let snapshot = match &self.cache {
            Some(cache) => cache.read().await.get(raffle_id).cloned(),
            None => None,
        };

        // Full history every time: an eventually consistent source may
        // surface events below the snapshot position after it was taken.
        // Kinds are independent reads; the fold waits for all of them
        let (created, participated, triggered) = tokio::try_join!(
            self.read(EventFilter::kind(EventKind::Created).for_raffle(raffle_id)),
            self.read(EventFilter::kind(EventKind::Participated).for_raffle(raffle_id)),
            self.read(EventFilter::kind(EventKind::Triggered).for_raffle(raffle_id)),
        )?;

        let mut events = created;
        events.extend(participated);
        events.extend(triggered);

        log::debug!("Raffle {}: folding {} events", raffle_id, events.len());

        let aggregator = RaffleAggregator::new(raffle_id);
        let aggregated = match snapshot {
            Some(previous) if previous.covers(&events) => aggregator.resume(previous, events)?,
            Some(previous) => {
                log::debug!(
                    "Raffle {}: log differs from snapshot at or below {}, replaying",
                    raffle_id,
                    previous.highest_position
                );
                aggregator.aggregate(events)?
            }
            None => aggregator.aggregate(events)?,
        };

        if let Some(cache) = &self.cache {
            cache.write().await.insert(aggregated.clone());
        }

        Ok(aggregated)
    }

    /// Resolve the full state of one raffle
    ///
    /// # Returns
    /// * `Ok(RaffleStats)` - State with `total_participants` and, once triggered, the draw
    /// * `Err(NotFound)` - No creation event for `raffle_id`
    /// * `Err(InconsistentState)` - History cannot be folded
    /// * `Err(SourceUnavailable)` - A read failed or timed out
    pub async fn get_raffle_stats(&self, raffle_id: RaffleId) -> Result<RaffleStats, ProjectionError> {
        let aggregated = self.aggregate_raffle(raffle_id).await?;
        Ok(RaffleStats::from(aggregated))
    }

    /// List raffles `user` entered and whether they won each one
    ///
    /// Raffles that fail to resolve are skipped, never failing the batch.
    /// Only a failure of the initial participation read is returned as an error.
    pub async fn get_user_participated_raffles(
        &self,
        user: &Address,
    ) -> Result<UserHistory, ProjectionError> {
        let events = self
            .read(EventFilter::kind(EventKind::Participated).for_participant(user.clone()))
            .await?;
        let index = UserHistoryIndex::from_events(user.clone(), &events);
        let raffle_ids = index.sorted_raffle_ids();

        log::debug!(
            "User {}: {} participation events across {} raffles",
            user,
            events.len(),
            raffle_ids.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_resolutions.max(1)));
        let mut tasks = JoinSet::new();
        for raffle_id in raffle_ids.iter().copied() {
            let projector = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (raffle_id, projector.get_raffle_stats(raffle_id).await)
            });
        }

        let mut resolved: BTreeMap<RaffleId, Result<RaffleStats, ProjectionError>> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((raffle_id, result)) => {
                    resolved.insert(raffle_id, result);
                }
                Err(e) => log::error!("❌ Raffle resolution task failed: {}", e),
            }
        }

        let mut entries = Vec::with_capacity(raffle_ids.len());
        let mut skipped = Vec::new();

        for raffle_id in raffle_ids {
            let failure = match resolved.remove(&raffle_id) {
                Some(Ok(stats)) => {
                    let won = stats.triggered && stats.winner.as_ref() == Some(user);
                    entries.push(UserRaffleEntry {
                        raffle_id,
                        organizer: stats.organizer,
                        won,
                    });
                    continue;
                }
                Some(Err(e)) => SkippedRaffle {
                    raffle_id,
                    error: e.to_string(),
                    transient: e.is_transient(),
                },
                None => SkippedRaffle {
                    raffle_id,
                    error: "resolution task panicked".to_string(),
                    transient: false,
                },
            };

            match self.config.skip_policy {
                SkipPolicy::Report => {
                    log::warn!(
                        "⚠️  Skipping raffle {} for user {}: {}",
                        raffle_id,
                        user,
                        failure.error
                    );
                    skipped.push(failure);
                }
                SkipPolicy::Omit => {
                    log::debug!(
                        "Omitting raffle {} for user {}: {}",
                        raffle_id,
                        user,
                        failure.error
                    );
                }
            }
        }

        Ok(UserHistory {
            user: user.clone(),
            entries,
            skipped,
        })
    }
}
