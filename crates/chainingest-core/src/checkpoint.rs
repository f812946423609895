//! Checkpoints: durable per-stream progress cursors.
//!
//! A checkpoint records the last block whose events are fully and durably
//! written for a stream. A restarted run resumes at `last_block + 1`.
//! `last_block` never decreases: [`CheckpointStore::advance`] rejects any
//! attempt to move it backwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::types::StreamKey;

/// A persisted checkpoint for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stream: StreamKey,
    /// Last fully ingested block.
    pub last_block: u64,
    /// Total events written for this stream across all runs.
    pub events_count: u64,
    /// Timestamp of the most recent ingested event, if known.
    pub last_timestamp: Option<i64>,
    /// Unix timestamp of the last update.
    pub updated_at: i64,
}

impl Checkpoint {
    /// The checkpoint that results from applying `update` on top of `current`.
    ///
    /// Fails with [`IngestError::CheckpointRegression`] when the update would
    /// move `last_block` backwards.
    pub fn advanced(
        stream: &StreamKey,
        current: Option<&Checkpoint>,
        update: &CheckpointUpdate,
        now: i64,
    ) -> Result<Checkpoint, IngestError> {
        match current {
            Some(cp) if update.last_block < cp.last_block => Err(IngestError::CheckpointRegression {
                stream: stream.clone(),
                current: cp.last_block,
                attempted: update.last_block,
            }),
            Some(cp) => Ok(Checkpoint {
                stream: stream.clone(),
                last_block: update.last_block,
                events_count: cp.events_count + update.delta_events,
                last_timestamp: update.last_timestamp.or(cp.last_timestamp),
                updated_at: now,
            }),
            None => Ok(Checkpoint {
                stream: stream.clone(),
                last_block: update.last_block,
                events_count: update.delta_events,
                last_timestamp: update.last_timestamp,
                updated_at: now,
            }),
        }
    }
}

/// A compare-and-advance request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointUpdate {
    pub last_block: u64,
    pub delta_events: u64,
    pub last_timestamp: Option<i64>,
}

/// Durable storage for checkpoints, keyed by `(source, key)`.
///
/// Implementations live in `chainingest-storage` (memory, SQLite, Postgres).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for a stream, if one exists.
    async fn read(&self, stream: &StreamKey) -> Result<Option<Checkpoint>, IngestError>;

    /// Atomically move the checkpoint forward, creating it on first use.
    ///
    /// Must fail with [`IngestError::CheckpointRegression`] (and leave the
    /// row untouched) when `update.last_block < current.last_block`.
    async fn advance(
        &self,
        stream: &StreamKey,
        update: CheckpointUpdate,
    ) -> Result<Checkpoint, IngestError>;

    /// All checkpoints, ordered by stream.
    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError>;

    /// Blocks between the chain head and the stream's checkpoint.
    ///
    /// `None` when the stream has no checkpoint yet. Negative when the head
    /// reported by the provider lags behind the checkpoint.
    async fn gap(&self, stream: &StreamKey, chain_head: u64) -> Result<Option<i64>, IngestError> {
        Ok(self
            .read(stream)
            .await?
            .map(|cp| block_gap(chain_head, cp.last_block)))
    }
}

/// Current Unix time in seconds, used for `updated_at`.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `chain_head - last_block` as a signed value.
pub fn block_gap(chain_head: u64, last_block: u64) -> i64 {
    if chain_head >= last_block {
        i64::try_from(chain_head - last_block).unwrap_or(i64::MAX)
    } else {
        -i64::try_from(last_block - chain_head).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamKey {
        StreamKey::new("FACTORY", "enosys")
    }

    fn update(last_block: u64, delta_events: u64) -> CheckpointUpdate {
        CheckpointUpdate {
            last_block,
            delta_events,
            last_timestamp: None,
        }
    }

    #[test]
    fn first_advance_creates_checkpoint() {
        let cp = Checkpoint::advanced(&stream(), None, &update(100, 7), 1_700_000_000).unwrap();
        assert_eq!(cp.last_block, 100);
        assert_eq!(cp.events_count, 7);
        assert_eq!(cp.updated_at, 1_700_000_000);
    }

    #[test]
    fn advance_accumulates_events_and_keeps_timestamp() {
        let first = Checkpoint::advanced(
            &stream(),
            None,
            &CheckpointUpdate {
                last_block: 100,
                delta_events: 5,
                last_timestamp: Some(1_000),
            },
            0,
        )
        .unwrap();
        let second = Checkpoint::advanced(&stream(), Some(&first), &update(200, 3), 1).unwrap();
        assert_eq!(second.last_block, 200);
        assert_eq!(second.events_count, 8);
        assert_eq!(second.last_timestamp, Some(1_000));
    }

    #[test]
    fn equal_block_is_not_a_regression() {
        let first = Checkpoint::advanced(&stream(), None, &update(100, 0), 0).unwrap();
        assert!(Checkpoint::advanced(&stream(), Some(&first), &update(100, 0), 1).is_ok());
    }

    #[test]
    fn lower_block_is_rejected() {
        let first = Checkpoint::advanced(&stream(), None, &update(100, 0), 0).unwrap();
        let err = Checkpoint::advanced(&stream(), Some(&first), &update(99, 0), 1).unwrap_err();
        assert!(matches!(
            err,
            IngestError::CheckpointRegression { current: 100, attempted: 99, .. }
        ));
    }

    #[test]
    fn gap_is_signed() {
        assert_eq!(block_gap(1_000, 900), 100);
        assert_eq!(block_gap(900, 900), 0);
        assert_eq!(block_gap(890, 900), -10);
    }
}
