//! In-memory event log
//!
//! Holds events in arrival order. Used by tests, by offline replays of JSONL
//! exports, and wherever a ledger client has already materialized the log.

use super::source::{EventFilter, EventSource, SequencedEvent, SourceError, TailableSource};
use crate::projection_core::events::RaffleEvent;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

pub struct InMemoryEventSource {
    events: RwLock<Vec<RaffleEvent>>,
    /// Artificial delay applied to every read (latency simulation)
    latency: Option<Duration>,
    offline: AtomicBool,
    queries: AtomicUsize,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::with_events(Vec::new())
    }

    pub fn with_events(events: Vec<RaffleEvent>) -> Self {
        Self {
            events: RwLock::new(events),
            latency: None,
            offline: AtomicBool::new(false),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Load events from a JSONL export (one `RaffleEvent` per line)
    ///
    /// Malformed lines are logged and skipped.
    pub async fn from_jsonl_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SourceError::Unavailable(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let mut events = Vec::new();
        let mut skipped = 0;
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match RaffleEvent::from_jsonl(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    skipped += 1;
                    log::warn!("Failed to parse event at {}:{}: {}", path.display(), line_no + 1, e);
                }
            }
        }

        log::info!(
            "📖 Loaded {} events from {} ({} skipped)",
            events.len(),
            path.display(),
            skipped
        );
        Ok(Self::with_events(events))
    }

    pub async fn append(&self, event: RaffleEvent) {
        self.events.write().await.push(event);
    }

    pub async fn extend(&self, events: impl IntoIterator<Item = RaffleEvent>) {
        self.events.write().await.extend(events);
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    /// Simulate an outage: every read fails with `Unavailable` while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of reads served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    async fn before_read(&self) -> Result<(), SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable("in-memory source is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryEventSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn query(&self, filter: &EventFilter) -> Result<Vec<RaffleEvent>, SourceError> {
        self.before_read().await?;
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    fn source_name(&self) -> &'static str {
        "in-memory"
    }
}

#[async_trait]
impl TailableSource for InMemoryEventSource {
    async fn read_after(&self, cursor: u64, limit: usize) -> Result<Vec<SequencedEvent>, SourceError> {
        self.before_read().await?;
        let events = self.events.read().await;
        Ok(events
            .iter()
            .enumerate()
            .map(|(idx, event)| SequencedEvent {
                sequence: idx as u64 + 1,
                event: event.clone(),
            })
            .skip_while(|seq| seq.sequence <= cursor)
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection_core::events::{EventKind, LedgerPosition, RaffleId};
    use std::io::Write;

    fn joined(raffle: u64, block: u64, who: &str) -> RaffleEvent {
        RaffleEvent::participated(raffle, LedgerPosition::new(block, 0), who)
    }

    #[tokio::test]
    async fn test_query_filters_events() {
        let source = InMemoryEventSource::with_events(vec![
            joined(1, 1, "a"),
            joined(2, 2, "a"),
            joined(1, 3, "b"),
        ]);

        let filter = EventFilter::kind(EventKind::Participated).for_raffle(RaffleId(1));
        let events = source.query(&filter).await.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(source.query_count(), 1);
    }

    #[tokio::test]
    async fn test_offline_source_fails() {
        let source = InMemoryEventSource::new();
        source.set_offline(true);

        let result = source.query(&EventFilter::kind(EventKind::Created)).await;
        assert!(matches!(result, Err(SourceError::Unavailable(_))));

        source.set_offline(false);
        assert!(source.query(&EventFilter::kind(EventKind::Created)).await.is_ok());
    }

    #[tokio::test]
    async fn test_read_after_cursor() {
        let source = InMemoryEventSource::new();
        source
            .extend(vec![joined(1, 1, "a"), joined(1, 2, "b"), joined(1, 3, "c")])
            .await;

        let batch = source.read_after(1, 10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].sequence, 2);
        assert_eq!(batch[1].sequence, 3);

        let limited = source.read_after(0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].sequence, 1);

        assert!(source.read_after(3, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_jsonl_file_skips_malformed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"raffle_id":1,"position":{{"block_number":5,"log_index":0}},"payload":{{"kind":"participated","participant":"0xa"}}}}"#
        )
        .unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file).unwrap();
        file.flush().unwrap();

        let source = InMemoryEventSource::from_jsonl_file(file.path()).await.unwrap();
        assert_eq!(source.len().await, 1);
    }
}
