//! Idempotent event persistence.
//!
//! [`IngestionWriter`] splits events into batches and hands each batch to an
//! [`EventStore`], which inserts with on-conflict-do-nothing semantics keyed
//! by the natural key `(stream_key, tx_hash, log_index)`. Rows the store
//! reports as not inserted are counted as duplicates.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IngestError;
use crate::types::{DomainEvent, WriteStats};

/// Storage for decoded events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a batch, ignoring rows whose natural key already exists.
    ///
    /// Returns the number of rows actually inserted. The batch is applied
    /// atomically: on error nothing from it may be assumed persisted.
    async fn insert_batch(&self, events: &[DomainEvent]) -> Result<u64, IngestError>;

    /// Total number of stored events.
    async fn event_count(&self) -> Result<u64, IngestError>;
}

/// Batched writer over an [`EventStore`].
#[derive(Clone)]
pub struct IngestionWriter {
    store: Arc<dyn EventStore>,
    batch_size: usize,
}

impl IngestionWriter {
    pub fn new(store: Arc<dyn EventStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Persist `events`.
    ///
    /// Stops at the first failing batch and returns [`IngestError::Write`]
    /// whose stats count the events stored before it and, in `errors`, the
    /// events that were not. Store errors that are not chunk-recoverable are
    /// returned unchanged. Re-submitting stored events is not an error; they
    /// come back as `duplicates_skipped`.
    pub async fn write(&self, events: &[DomainEvent]) -> Result<WriteStats, IngestError> {
        let mut stats = WriteStats::default();
        let mut submitted = 0u64;

        for batch in events.chunks(self.batch_size) {
            let len = batch.len() as u64;
            match self.store.insert_batch(batch).await {
                Ok(inserted) => {
                    let inserted = inserted.min(len);
                    stats.written += inserted;
                    stats.duplicates_skipped += len - inserted;
                    submitted += len;
                }
                Err(e) if !e.is_chunk_recoverable() => return Err(e),
                Err(e) => {
                    stats.errors = events.len() as u64 - submitted;
                    tracing::warn!(
                        written = stats.written,
                        unwritten = stats.errors,
                        error = %e,
                        "event batch failed"
                    );
                    return Err(IngestError::Write {
                        cause: e.to_string(),
                        stats,
                    });
                }
            }
        }

        tracing::debug!(
            written = stats.written,
            duplicates = stats.duplicates_skipped,
            "events written"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventKind;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct SetStore {
        keys: Mutex<HashSet<(String, String, u64)>>,
        fail_after_batches: Option<usize>,
        /// Error returned once `fail_after_batches` is reached.
        failure: Option<fn() -> IngestError>,
        batches: Mutex<usize>,
    }

    #[async_trait]
    impl EventStore for SetStore {
        async fn insert_batch(&self, events: &[DomainEvent]) -> Result<u64, IngestError> {
            let mut batches = self.batches.lock().unwrap();
            if let Some(limit) = self.fail_after_batches {
                if *batches >= limit {
                    let failure = self
                        .failure
                        .unwrap_or(|| IngestError::Storage("connection refused".into()));
                    return Err(failure());
                }
            }
            *batches += 1;
            let mut keys = self.keys.lock().unwrap();
            let mut inserted = 0;
            for e in events {
                let (s, t, i) = e.natural_key();
                if keys.insert((s.to_string(), t.to_string(), i)) {
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        async fn event_count(&self) -> Result<u64, IngestError> {
            Ok(self.keys.lock().unwrap().len() as u64)
        }
    }

    fn events(n: u64) -> Vec<DomainEvent> {
        (0..n)
            .map(|i| DomainEvent {
                kind: EventKind::Swap,
                stream_key: "pool-a".into(),
                contract_address: "0xpool".into(),
                block_number: 100 + i,
                tx_hash: format!("0x{i:064x}"),
                log_index: i,
                timestamp: None,
                unresolved: false,
                payload: serde_json::Value::Null,
            })
            .collect()
    }

    #[tokio::test]
    async fn second_write_is_all_duplicates() {
        let store = Arc::new(SetStore::default());
        let writer = IngestionWriter::new(store.clone(), 3);
        let batch = events(10);

        let first = writer.write(&batch).await.unwrap();
        assert_eq!(first.written, 10);
        assert_eq!(first.duplicates_skipped, 0);

        let second = writer.write(&batch).await.unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.duplicates_skipped, 10);

        assert_eq!(store.event_count().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn duplicates_within_one_call_are_counted() {
        let store = Arc::new(SetStore::default());
        let writer = IngestionWriter::new(store, 100);
        let mut batch = events(4);
        batch.push(batch[0].clone());
        let stats = writer.write(&batch).await.unwrap();
        assert_eq!(stats.written, 4);
        assert_eq!(stats.duplicates_skipped, 1);
    }

    #[tokio::test]
    async fn failed_batch_reports_unwritten_events() {
        let store = Arc::new(SetStore {
            fail_after_batches: Some(2),
            ..Default::default()
        });
        let writer = IngestionWriter::new(store, 4);
        let err = writer.write(&events(10)).await.unwrap_err();
        match err {
            IngestError::Write { stats, .. } => {
                assert_eq!(stats.written, 8);
                assert_eq!(stats.errors, 2);
                assert_eq!(stats.duplicates_skipped, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failure_counts_duplicates_before_the_failing_batch() {
        let store = Arc::new(SetStore {
            fail_after_batches: Some(2),
            ..Default::default()
        });
        let writer = IngestionWriter::new(store, 4);
        let mut batch = events(4);
        batch.extend(events(4));
        batch.extend(events(10).into_iter().skip(4));

        match writer.write(&batch).await.unwrap_err() {
            IngestError::Write { stats, cause } => {
                assert_eq!(stats, WriteStats { written: 4, duplicates_skipped: 4, errors: 6 });
                assert!(cause.contains("connection refused"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unrecoverable_store_errors_pass_through() {
        let store = Arc::new(SetStore {
            fail_after_batches: Some(0),
            failure: Some(|| IngestError::Config("events table has the wrong shape".into())),
            ..Default::default()
        });
        let writer = IngestionWriter::new(store, 4);
        let err = writer.write(&events(3)).await.unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn empty_input_is_a_noop() {
        let writer = IngestionWriter::new(Arc::new(SetStore::default()), 0);
        assert_eq!(writer.batch_size(), 1);
        assert_eq!(writer.write(&[]).await.unwrap(), WriteStats::default());
    }
}
