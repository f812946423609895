//! Per-stream health: how far each checkpoint trails the chain head.
//!
//! A gap that keeps growing across observations means ingestion for that
//! stream has stalled.

use serde::{Deserialize, Serialize};

use crate::checkpoint::{block_gap, Checkpoint, CheckpointStore};
use crate::error::IngestError;
use crate::types::StreamKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHealth {
    pub stream: StreamKey,
    pub last_block: u64,
    pub chain_head: u64,
    pub gap: i64,
    pub events_count: u64,
    pub last_timestamp: Option<i64>,
    pub updated_at: i64,
}

impl StreamHealth {
    pub fn from_checkpoint(cp: &Checkpoint, chain_head: u64) -> Self {
        Self {
            stream: cp.stream.clone(),
            last_block: cp.last_block,
            chain_head,
            gap: block_gap(chain_head, cp.last_block),
            events_count: cp.events_count,
            last_timestamp: cp.last_timestamp,
            updated_at: cp.updated_at,
        }
    }
}

/// Health of a single stream, `None` if it has never been ingested.
pub async fn observe(
    store: &dyn CheckpointStore,
    stream: &StreamKey,
    chain_head: u64,
) -> Result<Option<StreamHealth>, IngestError> {
    Ok(store
        .read(stream)
        .await?
        .map(|cp| StreamHealth::from_checkpoint(&cp, chain_head)))
}

/// Health of every checkpointed stream.
pub async fn observe_all(
    store: &dyn CheckpointStore,
    chain_head: u64,
) -> Result<Vec<StreamHealth>, IngestError> {
    Ok(store
        .list()
        .await?
        .iter()
        .map(|cp| StreamHealth::from_checkpoint(cp, chain_head))
        .collect())
}
