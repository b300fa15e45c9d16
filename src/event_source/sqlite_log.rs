//! SQLite-backed raffle event log
//!
//! Append-only table of ledger events. Serves filtered queries for the
//! projector and cursor reads (by row id) for subscriptions. The CLI also
//! appends to it when running against a local development ledger.
//!
//! Duplicates are allowed on purpose: the table mirrors an at-least-once feed.

use super::source::{EventFilter, EventSource, SequencedEvent, SourceError, TailableSource};
use crate::projection_core::events::{
    EventKind, EventPayload, LedgerPosition, RaffleEvent, RaffleId,
};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS raffle_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    raffle_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    log_index INTEGER NOT NULL,
    identity TEXT NOT NULL,
    payload TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_raffle_kind
    ON raffle_events(raffle_id, kind, block_number, log_index);
CREATE INDEX IF NOT EXISTS idx_identity_kind
    ON raffle_events(identity, kind);
";

/// Raw row before payload decoding
type EventRow = (i64, i64, i64, i64, String);

pub struct SqliteEventLog {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventLog {
    /// Open (or create) the event log at `db_path`
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let db_path = db_path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    SourceError::Unavailable(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ SQLite event log initialized: {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SourceError> {
        lock_connection(&self.conn)
    }

    /// Run a read on the blocking pool
    ///
    /// The async caller only awaits the join handle, so a timeout around it
    /// fires even while the connection is busy.
    async fn read_blocking<T, F>(&self, read: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, SourceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock_connection(&conn)?;
            read(&*guard)
        })
        .await
        .map_err(|e| SourceError::Unavailable(format!("event log read task failed: {}", e)))?
    }

    /// Append one event; returns its sequence number
    pub fn append(&self, event: &RaffleEvent) -> Result<u64, SourceError> {
        let payload = serde_json::to_string(&event.payload)?;
        let conn = self.lock()?;

        conn.execute(
            "INSERT INTO raffle_events
             (raffle_id, kind, block_number, log_index, identity, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                to_sql_int(event.raffle_id.0, "raffle_id")?,
                event.kind().as_str(),
                to_sql_int(event.position.block_number, "block_number")?,
                event.position.log_index as i64,
                event.payload.identity().normalized(),
                payload,
            ],
        )?;

        let sequence = conn.last_insert_rowid() as u64;
        log::debug!(
            "✅ Appended {} event for raffle {} at {} (seq {})",
            event.kind(),
            event.raffle_id,
            event.position,
            sequence
        );
        Ok(sequence)
    }

    /// Next unused raffle id (ids start at 0)
    pub fn next_raffle_id(&self) -> Result<RaffleId, SourceError> {
        let conn = self.lock()?;
        let max: Option<i64> = conn
            .query_row(
                "SELECT MAX(raffle_id) FROM raffle_events WHERE kind = ?1",
                [EventKind::Created.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        Ok(RaffleId(max.map_or(0, |id| id as u64 + 1)))
    }

    /// Position for the next locally appended event: a fresh block
    pub fn next_position(&self) -> Result<LedgerPosition, SourceError> {
        let conn = self.lock()?;
        let max_block: i64 = conn.query_row(
            "SELECT COALESCE(MAX(block_number), 0) FROM raffle_events",
            [],
            |row| row.get(0),
        )?;

        Ok(LedgerPosition::new(max_block as u64 + 1, 0))
    }

    /// Total number of stored events, duplicates included
    pub fn event_count(&self) -> Result<u64, SourceError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM raffle_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn lock_connection(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, SourceError> {
    conn.lock()
        .map_err(|_| SourceError::Unavailable("event log connection poisoned".to_string()))
}

fn to_sql_int(value: u64, field: &str) -> Result<i64, SourceError> {
    i64::try_from(value)
        .map_err(|_| SourceError::Decode(format!("{} {} exceeds SQLite INTEGER range", field, value)))
}

fn decode_row(row: EventRow) -> Result<SequencedEvent, SourceError> {
    let (sequence, raffle_id, block_number, log_index, payload) = row;
    let payload: EventPayload = serde_json::from_str(&payload)?;
    let log_index = u32::try_from(log_index)
        .map_err(|_| SourceError::Decode(format!("invalid log_index {} in row {}", log_index, sequence)))?;

    Ok(SequencedEvent {
        sequence: sequence as u64,
        event: RaffleEvent {
            raffle_id: RaffleId(raffle_id as u64),
            position: LedgerPosition::new(block_number as u64, log_index),
            payload,
        },
    })
}

#[async_trait]
impl EventSource for SqliteEventLog {
    async fn query(&self, filter: &EventFilter) -> Result<Vec<RaffleEvent>, SourceError> {
        let raffle_id = filter
            .raffle_id
            .map(|id| to_sql_int(id.0, "raffle_id"))
            .transpose()?;
        let identity = filter.participant.as_ref().map(|p| p.normalized());
        let since_block = filter
            .since
            .map(|p| to_sql_int(p.block_number, "block_number"))
            .transpose()?;
        let since_index = filter.since.map(|p| p.log_index as i64);
        let kind = filter.kind.as_str();

        let rows: Vec<EventRow> = self
            .read_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, raffle_id, block_number, log_index, payload
                     FROM raffle_events
                     WHERE kind = ?1
                       AND (?2 IS NULL OR raffle_id = ?2)
                       AND (?3 IS NULL OR identity = ?3)
                       AND (?4 IS NULL OR block_number > ?4
                            OR (block_number = ?4 AND log_index > ?5))
                     ORDER BY block_number ASC, log_index ASC, id ASC",
                )?;

                let iter = stmt.query_map(
                    params![kind, raffle_id, identity, since_block, since_index],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;
                let rows = iter.collect::<Result<Vec<EventRow>, _>>()?;
                Ok(rows)
            })
            .await?;

        let events = rows
            .into_iter()
            .map(|row| decode_row(row).map(|seq| seq.event))
            .collect::<Result<Vec<_>, _>>()?;

        log::debug!("📥 {} {} events matched {:?}", events.len(), filter.kind, filter);
        Ok(events)
    }

    fn source_name(&self) -> &'static str {
        "SQLite"
    }
}

#[async_trait]
impl TailableSource for SqliteEventLog {
    async fn read_after(&self, cursor: u64, limit: usize) -> Result<Vec<SequencedEvent>, SourceError> {
        let cursor = to_sql_int(cursor, "cursor")?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows: Vec<EventRow> = self
            .read_blocking(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, raffle_id, block_number, log_index, payload
                     FROM raffle_events
                     WHERE id > ?1
                     ORDER BY id ASC
                     LIMIT ?2",
                )?;

                let iter = stmt.query_map(params![cursor, limit], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                })?;
                let rows = iter.collect::<Result<Vec<EventRow>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter().map(decode_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection_core::events::{Address, SubjectReference};
    use std::time::Duration;
    use tempfile::tempdir;

    fn open_log() -> (tempfile::TempDir, SqliteEventLog) {
        let dir = tempdir().unwrap();
        let log = SqliteEventLog::open(dir.path().join("events.db")).unwrap();
        (dir, log)
    }

    fn created(raffle: u64, block: u64) -> RaffleEvent {
        RaffleEvent::created(
            raffle,
            LedgerPosition::new(block, 0),
            "0xOrganizer",
            10,
            1_900_000_000,
            SubjectReference {
                nft_address: Address::new("0xNft"),
                token_id: 3,
            },
            55,
        )
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let (_dir, log) = open_log();
        log.append(&created(0, 1)).unwrap();
        log.append(&RaffleEvent::participated(0, LedgerPosition::new(2, 0), "0xAAA")).unwrap();
        log.append(&RaffleEvent::participated(1, LedgerPosition::new(3, 0), "0xaaa")).unwrap();

        let created_events = log
            .query(&EventFilter::kind(EventKind::Created).for_raffle(RaffleId(0)))
            .await
            .unwrap();
        assert_eq!(created_events, vec![created(0, 1)]);

        // Identity filter is case-insensitive
        let by_user = log
            .query(&EventFilter::kind(EventKind::Participated).for_participant(Address::new("0xAaA")))
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);
    }

    #[tokio::test]
    async fn test_query_since_position() {
        let (_dir, log) = open_log();
        for (block, index) in [(5, 0), (5, 1), (6, 0)] {
            log.append(&RaffleEvent::participated(0, LedgerPosition::new(block, index), "0xA"))
                .unwrap();
        }

        let filter = EventFilter::kind(EventKind::Participated)
            .for_raffle(RaffleId(0))
            .since(Some(LedgerPosition::new(5, 0)));
        let events = log.query(&filter).await.unwrap();

        let positions: Vec<LedgerPosition> = events.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![LedgerPosition::new(5, 1), LedgerPosition::new(6, 0)]);
    }

    #[tokio::test]
    async fn test_duplicates_are_kept() {
        let (_dir, log) = open_log();
        let event = RaffleEvent::participated(0, LedgerPosition::new(2, 0), "0xA");
        log.append(&event).unwrap();
        log.append(&event).unwrap();

        assert_eq!(log.event_count().unwrap(), 2);
        let events = log
            .query(&EventFilter::kind(EventKind::Participated))
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_read_after_cursor() {
        let (_dir, log) = open_log();
        for block in 1..=5 {
            log.append(&RaffleEvent::participated(0, LedgerPosition::new(block, 0), "0xA"))
                .unwrap();
        }

        let first = log.read_after(0, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first.last().unwrap().sequence, 3);

        let rest = log.read_after(3, 100).await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].event.position, LedgerPosition::new(4, 0));
    }

    #[tokio::test]
    async fn test_busy_connection_does_not_block_timeout() {
        let (_dir, log) = open_log();
        log.append(&created(0, 1)).unwrap();

        let filter = EventFilter::kind(EventKind::Created);
        let held = log.conn.lock().unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), log.query(&filter)).await;
        assert!(waited.is_err());
        drop(held);

        let events = log.query(&filter).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_next_ids_and_positions() {
        let (_dir, log) = open_log();
        assert_eq!(log.next_raffle_id().unwrap(), RaffleId(0));
        assert_eq!(log.next_position().unwrap(), LedgerPosition::new(1, 0));

        log.append(&created(0, 1)).unwrap();
        log.append(&RaffleEvent::participated(0, LedgerPosition::new(4, 2), "0xA")).unwrap();

        assert_eq!(log.next_raffle_id().unwrap(), RaffleId(1));
        assert_eq!(log.next_position().unwrap(), LedgerPosition::new(5, 0));
    }

    #[test]
    fn test_reopen_preserves_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/events.db");
        {
            let log = SqliteEventLog::open(&path).unwrap();
            log.append(&created(0, 1)).unwrap();
        }

        let log = SqliteEventLog::open(&path).unwrap();
        assert_eq!(log.event_count().unwrap(), 1);
    }
}
