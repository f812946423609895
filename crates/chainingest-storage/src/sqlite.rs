//! SQLite storage backend.
//!
//! Persists events and checkpoints to a single SQLite file via `sqlx`,
//! with WAL mode for concurrent readers.
//!
//! # Usage
//! ```rust,no_run
//! use chainingest_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./ingest.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use chainingest_core::checkpoint::{now_unix, Checkpoint, CheckpointStore, CheckpointUpdate};
use chainingest_core::error::IngestError;
use chainingest_core::types::{DomainEvent, StreamKey};
use chainingest_core::writer::EventStore;

/// Rows per INSERT statement, well under SQLite's bound-parameter limit.
const ROWS_PER_STATEMENT: usize = 100;

fn storage_err(e: sqlx::Error) -> IngestError {
    IngestError::Storage(e.to_string())
}

/// SQLite-backed storage for events and checkpoints.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./ingest.db"`) or a full
    /// SQLite URL (`"sqlite:./ingest.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IngestError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema(true).await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool holds a single connection so every query sees the same
    /// database. All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, IngestError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema(false).await?;
        Ok(storage)
    }

    async fn init_schema(&self, wal: bool) -> Result<(), IngestError> {
        if wal {
            sqlx::query("PRAGMA journal_mode=WAL;")
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                source         TEXT    NOT NULL,
                key            TEXT    NOT NULL,
                last_block     INTEGER NOT NULL,
                events_count   INTEGER NOT NULL,
                last_timestamp INTEGER,
                updated_at     INTEGER NOT NULL,
                PRIMARY KEY (source, key)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS events (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                stream_key       TEXT    NOT NULL,
                tx_hash          TEXT    NOT NULL,
                log_index        INTEGER NOT NULL,
                kind             TEXT    NOT NULL,
                contract_address TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                timestamp        INTEGER,
                unresolved       INTEGER NOT NULL,
                payload          TEXT    NOT NULL,
                UNIQUE (stream_key, tx_hash, log_index),
                CHECK (block_number >= 0 AND log_index >= 0)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_block ON events (block_number);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_unresolved ON events (unresolved);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// Stored events for a stream key, ordered by block and log index.
    pub async fn events_for_stream(&self, stream_key: &str) -> Result<Vec<DomainEvent>, IngestError> {
        let rows = sqlx::query(
            "SELECT stream_key, tx_hash, log_index, kind, contract_address, block_number,
                    timestamp, unresolved, payload
             FROM events WHERE stream_key = ? ORDER BY block_number, log_index",
        )
        .bind(stream_key)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: &SqliteRow) -> Result<DomainEvent, IngestError> {
    let kind: String = row.get("kind");
    let payload: String = row.get("payload");
    Ok(DomainEvent {
        kind: kind.parse().map_err(IngestError::Storage)?,
        stream_key: row.get("stream_key"),
        contract_address: row.get("contract_address"),
        block_number: row.get::<i64, _>("block_number") as u64,
        tx_hash: row.get("tx_hash"),
        log_index: row.get::<i64, _>("log_index") as u64,
        timestamp: row.get("timestamp"),
        unresolved: row.get::<i64, _>("unresolved") != 0,
        payload: serde_json::from_str(&payload).map_err(|e| IngestError::Storage(e.to_string()))?,
    })
}

fn checkpoint_from_row(row: &SqliteRow) -> Checkpoint {
    Checkpoint {
        stream: StreamKey::new(row.get::<String, _>("source"), row.get::<String, _>("key")),
        last_block: row.get::<i64, _>("last_block") as u64,
        events_count: row.get::<i64, _>("events_count") as u64,
        last_timestamp: row.get("last_timestamp"),
        updated_at: row.get("updated_at"),
    }
}

// ─── EventStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl EventStore for SqliteStorage {
    async fn insert_batch(&self, events: &[DomainEvent]) -> Result<u64, IngestError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut inserted = 0u64;
        for rows in events.chunks(ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO events
                 (stream_key, tx_hash, log_index, kind, contract_address, block_number,
                  timestamp, unresolved, payload) ",
            );
            qb.push_values(rows, |mut b, e| {
                b.push_bind(e.stream_key.clone())
                    .push_bind(e.tx_hash.clone())
                    .push_bind(e.log_index as i64)
                    .push_bind(e.kind.as_str())
                    .push_bind(e.contract_address.clone())
                    .push_bind(e.block_number as i64)
                    .push_bind(e.timestamp)
                    .push_bind(e.unresolved as i64)
                    .push_bind(e.payload.to_string());
            });
            // Only the natural key is ignored; any other constraint fails the batch.
            qb.push(" ON CONFLICT (stream_key, tx_hash, log_index) DO NOTHING");
            let result = qb.build().execute(&mut *tx).await.map_err(storage_err)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(storage_err)?;

        debug!(batch = events.len(), inserted, "events stored");
        Ok(inserted)
    }

    async fn event_count(&self) -> Result<u64, IngestError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM events")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>("cnt") as u64)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn read(&self, stream: &StreamKey) -> Result<Option<Checkpoint>, IngestError> {
        let row = sqlx::query(
            "SELECT source, key, last_block, events_count, last_timestamp, updated_at
             FROM checkpoints WHERE source = ? AND key = ?",
        )
        .bind(&stream.source)
        .bind(&stream.key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.as_ref().map(checkpoint_from_row))
    }

    async fn advance(
        &self,
        stream: &StreamKey,
        update: CheckpointUpdate,
    ) -> Result<Checkpoint, IngestError> {
        // The WHERE clause makes the upsert a no-op (no RETURNING row) when it
        // would move last_block backwards.
        let row = sqlx::query(
            "INSERT INTO checkpoints
                 (source, key, last_block, events_count, last_timestamp, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (source, key) DO UPDATE SET
                 last_block     = excluded.last_block,
                 events_count   = checkpoints.events_count + excluded.events_count,
                 last_timestamp = COALESCE(excluded.last_timestamp, checkpoints.last_timestamp),
                 updated_at     = excluded.updated_at
             WHERE excluded.last_block >= checkpoints.last_block
             RETURNING source, key, last_block, events_count, last_timestamp, updated_at",
        )
        .bind(&stream.source)
        .bind(&stream.key)
        .bind(update.last_block as i64)
        .bind(update.delta_events as i64)
        .bind(update.last_timestamp)
        .bind(now_unix())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        match row {
            Some(row) => {
                let cp = checkpoint_from_row(&row);
                debug!(stream = %stream, block = cp.last_block, "checkpoint advanced");
                Ok(cp)
            }
            None => {
                let current = self.read(stream).await?.map(|cp| cp.last_block).unwrap_or(0);
                Err(IngestError::CheckpointRegression {
                    stream: stream.clone(),
                    current,
                    attempted: update.last_block,
                })
            }
        }
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError> {
        let rows = sqlx::query(
            "SELECT source, key, last_block, events_count, last_timestamp, updated_at
             FROM checkpoints ORDER BY source, key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(rows.iter().map(checkpoint_from_row).collect())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
