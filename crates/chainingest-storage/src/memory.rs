//! In-memory storage backend.
//!
//! Holds events and checkpoints in RAM with the same semantics as the SQL
//! backends: natural-key dedup on insert and compare-and-advance
//! checkpoints. Useful for tests and dry runs.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chainingest_core::checkpoint::{now_unix, Checkpoint, CheckpointStore, CheckpointUpdate};
use chainingest_core::error::IngestError;
use chainingest_core::types::{DomainEvent, StreamKey};
use chainingest_core::writer::EventStore;

type NaturalKey = (String, String, u64);

/// In-memory ingestion storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<BTreeMap<StreamKey, Checkpoint>>,
    events: Mutex<HashMap<NaturalKey, DomainEvent>>,
    fail_writes: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `insert_batch` fail, simulating an outage.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Stored events for a stream key, ordered by block and log index.
    pub fn events_for_stream(&self, stream_key: &str) -> Vec<DomainEvent> {
        let mut out: Vec<DomainEvent> = self
            .events
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.stream_key == stream_key)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.block_number, e.log_index));
        out
    }

    /// Every stored event, ordered by block and log index.
    pub fn all_events(&self) -> Vec<DomainEvent> {
        let mut out: Vec<DomainEvent> = self.events.lock().unwrap().values().cloned().collect();
        out.sort_by_key(|e| (e.block_number, e.log_index));
        out
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryStorage {
    async fn insert_batch(&self, events: &[DomainEvent]) -> Result<u64, IngestError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(IngestError::Storage("storage unavailable".into()));
        }
        let mut stored = self.events.lock().unwrap();
        let mut inserted = 0;
        for e in events {
            let key = (e.stream_key.clone(), e.tx_hash.clone(), e.log_index);
            if let std::collections::hash_map::Entry::Vacant(slot) = stored.entry(key) {
                slot.insert(e.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn event_count(&self) -> Result<u64, IngestError> {
        Ok(self.events.lock().unwrap().len() as u64)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn read(&self, stream: &StreamKey) -> Result<Option<Checkpoint>, IngestError> {
        Ok(self.checkpoints.lock().unwrap().get(stream).cloned())
    }

    async fn advance(
        &self,
        stream: &StreamKey,
        update: CheckpointUpdate,
    ) -> Result<Checkpoint, IngestError> {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        let next = Checkpoint::advanced(stream, checkpoints.get(stream), &update, now_unix())?;
        checkpoints.insert(stream.clone(), next.clone());
        Ok(next)
    }

    async fn list(&self) -> Result<Vec<Checkpoint>, IngestError> {
        Ok(self.checkpoints.lock().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainingest_core::types::EventKind;

    fn ev(stream: &str, block: u64, log_index: u64) -> DomainEvent {
        DomainEvent {
            kind: EventKind::Swap,
            stream_key: stream.into(),
            contract_address: "0xpool".into(),
            block_number: block,
            tx_hash: format!("0x{block:x}"),
            log_index,
            timestamp: None,
            unresolved: false,
            payload: serde_json::Value::Null,
        }
    }

    fn update(last_block: u64, delta_events: u64) -> CheckpointUpdate {
        CheckpointUpdate {
            last_block,
            delta_events,
            last_timestamp: None,
        }
    }

    #[tokio::test]
    async fn insert_is_idempotent_on_natural_key() {
        let store = InMemoryStorage::new();
        let batch = vec![ev("a", 100, 0), ev("a", 100, 1), ev("b", 100, 0)];
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 3);
        assert_eq!(store.insert_batch(&batch).await.unwrap(), 0);
        assert_eq!(store.event_count().await.unwrap(), 3);
        assert_eq!(store.events_for_stream("a").len(), 2);
    }

    #[tokio::test]
    async fn failing_writes_store_nothing() {
        let store = InMemoryStorage::new();
        store.set_fail_writes(true);
        assert!(store.insert_batch(&[ev("a", 1, 0)]).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn checkpoint_advances_and_rejects_regression() {
        let store = InMemoryStorage::new();
        let s = StreamKey::new("FACTORY", "enosys");
        assert!(store.read(&s).await.unwrap().is_none());

        store.advance(&s, update(100, 4)).await.unwrap();
        let cp = store.advance(&s, update(250, 6)).await.unwrap();
        assert_eq!(cp.last_block, 250);
        assert_eq!(cp.events_count, 10);

        let err = store.advance(&s, update(200, 0)).await.unwrap_err();
        assert!(err.is_regression());
        assert_eq!(store.read(&s).await.unwrap().unwrap().last_block, 250);
        assert_eq!(store.gap(&s, 300).await.unwrap(), Some(50));
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let store = InMemoryStorage::new();
        store.advance(&StreamKey::new("FACTORY", "enosys"), update(10, 0)).await.unwrap();
        store.advance(&StreamKey::new("FACTORY", "sparkdex"), update(20, 0)).await.unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].stream.key, "enosys");
        assert_eq!(all[1].last_block, 20);
    }
}
