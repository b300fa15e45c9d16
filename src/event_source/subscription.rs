//! Cancellable pull-based event subscription
//!
//! A background task tails a `TailableSource` by sequence cursor and feeds a
//! bounded channel. The consumer pulls with `next()`. Cancelling (or dropping)
//! the subscription aborts the task, so no reader outlives its consumer.

use super::source::{SequencedEvent, SourceError, TailableSource};
use crate::projection_core::events::RaffleId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Delay between polls once the source is drained
    pub poll_interval: Duration,
    /// Maximum events fetched per poll
    pub batch_size: usize,
    /// Channel capacity (backpressure on the polling task)
    pub buffer: usize,
    /// Start after this sequence number (0 = from the beginning)
    pub start_cursor: u64,
    /// Only deliver events for this raffle
    pub raffle_id: Option<RaffleId>,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 1000,
            buffer: 1000,
            start_cursor: 0,
            raffle_id: None,
        }
    }
}

pub struct EventSubscription {
    rx: mpsc::Receiver<Result<SequencedEvent, SourceError>>,
    task: JoinHandle<()>,
}

impl EventSubscription {
    /// Start tailing `source`
    ///
    /// Read errors are delivered in-band and polling continues; the consumer
    /// decides whether to keep going or cancel.
    pub fn spawn<S>(source: Arc<S>, config: SubscriptionConfig) -> Self
    where
        S: TailableSource + ?Sized + 'static,
    {
        let (tx, rx) = mpsc::channel(config.buffer.max(1));

        let task = tokio::spawn(async move {
            let mut cursor = config.start_cursor;
            log::info!(
                "📡 Subscription started on {} source at cursor {}",
                source.source_name(),
                cursor
            );

            loop {
                let fetched = match source.read_after(cursor, config.batch_size).await {
                    Ok(batch) => {
                        let fetched = batch.len();
                        for seq in batch {
                            cursor = seq.sequence;
                            if config.raffle_id.map_or(false, |id| seq.event.raffle_id != id) {
                                continue;
                            }
                            if tx.send(Ok(seq)).await.is_err() {
                                log::debug!("Subscription consumer gone, stopping at cursor {}", cursor);
                                return;
                            }
                        }
                        fetched
                    }
                    Err(e) => {
                        log::warn!("⚠️  Subscription read failed at cursor {}: {}", cursor, e);
                        if tx.send(Err(e)).await.is_err() {
                            return;
                        }
                        0
                    }
                };

                // Keep draining while full batches come back
                if fetched < config.batch_size {
                    sleep(config.poll_interval).await;
                }
            }
        });

        Self { rx, task }
    }

    /// Next event, waiting for the source if necessary
    ///
    /// Returns `None` once the subscription has stopped.
    pub async fn next(&mut self) -> Option<Result<SequencedEvent, SourceError>> {
        self.rx.recv().await
    }

    /// Stop the polling task and release the source
    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_source::InMemoryEventSource;
    use crate::projection_core::events::{LedgerPosition, RaffleEvent};

    fn joined(raffle: u64, block: u64) -> RaffleEvent {
        RaffleEvent::participated(raffle, LedgerPosition::new(block, 0), "0xA")
    }

    fn fast_config() -> SubscriptionConfig {
        SubscriptionConfig {
            poll_interval: Duration::from_millis(10),
            ..SubscriptionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_delivers_existing_then_new_events() {
        let source = Arc::new(InMemoryEventSource::with_events(vec![joined(1, 1), joined(1, 2)]));
        let mut sub = EventSubscription::spawn(source.clone(), fast_config());

        let first = sub.next().await.unwrap().unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);

        source.append(joined(1, 3)).await;
        let third = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(third.event.position, LedgerPosition::new(3, 0));
    }

    #[tokio::test]
    async fn test_raffle_filter_and_start_cursor() {
        let source = Arc::new(InMemoryEventSource::with_events(vec![
            joined(1, 1),
            joined(2, 2),
            joined(1, 3),
            joined(2, 4),
        ]));
        let config = SubscriptionConfig {
            raffle_id: Some(RaffleId(2)),
            start_cursor: 2,
            ..fast_config()
        };
        let mut sub = EventSubscription::spawn(source, config);

        let only = sub.next().await.unwrap().unwrap();
        assert_eq!(only.sequence, 4);
        assert_eq!(only.event.raffle_id, RaffleId(2));
    }

    #[tokio::test]
    async fn test_errors_delivered_in_band() {
        let source = Arc::new(InMemoryEventSource::new());
        source.set_offline(true);
        let mut sub = EventSubscription::spawn(source.clone(), fast_config());

        let item = sub.next().await.unwrap();
        assert!(matches!(item, Err(SourceError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_cancel_releases_source() {
        let source = Arc::new(InMemoryEventSource::new());
        let sub = EventSubscription::spawn(source.clone(), fast_config());
        tokio::time::sleep(Duration::from_millis(30)).await;

        sub.cancel();
        // Give the runtime a moment to drop the aborted task
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(Arc::strong_count(&source), 1);
    }
}
