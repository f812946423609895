//! Block range fetcher.
//!
//! Every provider request goes through the shared [`RateLimiter`] and the
//! bounded [`RetryPolicy`]. A chunk is all-or-nothing: either the complete
//! log set (with timestamps, when enabled) comes back or the chunk fails.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chainingest_core::error::{IngestError, ProviderError};
use chainingest_core::rate_limiter::RateLimiter;
use chainingest_core::retry::RetryPolicy;
use chainingest_core::types::BlockRange;

use crate::provider::{LogFilter, LogProvider, RawLogEntry};

pub struct BlockRangeFetcher {
    provider: Arc<dyn LogProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    filter: LogFilter,
    resolve_timestamps: bool,
}

impl BlockRangeFetcher {
    pub fn new(
        provider: Arc<dyn LogProvider>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        filter: LogFilter,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry,
            filter,
            resolve_timestamps: true,
        }
    }

    pub fn resolve_timestamps(mut self, enabled: bool) -> Self {
        self.resolve_timestamps = enabled;
        self
    }

    pub fn provider(&self) -> &Arc<dyn LogProvider> {
        &self.provider
    }

    /// Latest block number reported by the provider.
    pub async fn chain_head(&self) -> Result<u64, IngestError> {
        self.retry
            .run("eth_blockNumber", || async {
                self.limiter.acquire().await;
                self.provider.get_latest_block_number().await
            })
            .await
            .map_err(IngestError::ChainHead)
    }

    /// Fetch every log in `chunk`.
    ///
    /// Logs flagged `removed` are dropped.
    pub async fn fetch(&self, chunk: BlockRange) -> Result<Vec<RawLogEntry>, IngestError> {
        let fail = |source: ProviderError| IngestError::ChunkFetch { range: chunk, source };

        let mut logs = self
            .retry
            .run("eth_getLogs", || async {
                self.limiter.acquire().await;
                self.provider.get_logs(&self.filter, chunk.from, chunk.to).await
            })
            .await
            .map_err(fail)?;

        let before = logs.len();
        logs.retain(|l| !l.removed);
        if logs.len() != before {
            tracing::debug!(chunk = %chunk, dropped = before - logs.len(), "dropped removed logs");
        }

        if self.resolve_timestamps {
            self.fill_timestamps(&mut logs).await.map_err(fail)?;
        }

        tracing::debug!(chunk = %chunk, logs = logs.len(), "chunk fetched");
        Ok(logs)
    }

    /// One `getBlock` per distinct block lacking a timestamp.
    async fn fill_timestamps(&self, logs: &mut [RawLogEntry]) -> Result<(), ProviderError> {
        let missing: BTreeSet<u64> = logs
            .iter()
            .filter(|l| l.block_timestamp.is_none())
            .map(|l| l.block_number)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let mut resolved = HashMap::with_capacity(missing.len());
        for block in missing {
            let ts = self
                .retry
                .run("eth_getBlockByNumber", || async {
                    self.limiter.acquire().await;
                    self.provider.get_block_timestamp(block).await
                })
                .await?;
            if let Some(ts) = ts {
                resolved.insert(block, ts);
            }
        }

        for log in logs.iter_mut().filter(|l| l.block_timestamp.is_none()) {
            log.block_timestamp = resolved.get(&log.block_number).copied();
        }
        Ok(())
    }
}
