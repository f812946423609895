//! Fluent builder API for ingestion runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chainingest_core::types::StreamKey;
//! use chainingest_evm::{HttpLogProvider, HttpProviderConfig, IngestBuilder, EventSchemaSet};
//! use chainingest_storage::InMemoryStorage;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = HttpLogProvider::new(HttpProviderConfig::new("https://flare-api.flare.network/ext/C/rpc", 30))?;
//! let storage = Arc::new(InMemoryStorage::new());
//! let orchestrator = IngestBuilder::new(StreamKey::new("FACTORY", "enosys"))
//!     .start_block(29_837_200)
//!     .block_window(5_000)
//!     .concurrency(4)
//!     .rps(10)
//!     .provider(Arc::new(provider))
//!     .schemas(EventSchemaSet::from_yaml_str("[]")?)
//!     .checkpoints(storage.clone())
//!     .events(storage)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use chainingest_core::checkpoint::CheckpointStore;
use chainingest_core::config::IngestConfig;
use chainingest_core::error::IngestError;
use chainingest_core::rate_limiter::RateLimiter;
use chainingest_core::retry::{RetryConfig, RetryPolicy};
use chainingest_core::types::StreamKey;
use chainingest_core::writer::{EventStore, IngestionWriter};

use crate::decoder::EventDecoder;
use crate::fetcher::BlockRangeFetcher;
use crate::orchestrator::Orchestrator;
use crate::provider::{LogFilter, LogProvider};
use crate::resolve::PoolRegistry;
use crate::schema::EventSchemaSet;

/// Fluent builder for an [`Orchestrator`].
pub struct IngestBuilder {
    config: IngestConfig,
    provider: Option<Arc<dyn LogProvider>>,
    schemas: EventSchemaSet,
    pools: PoolRegistry,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    events: Option<Arc<dyn EventStore>>,
    cancel: CancellationToken,
}

impl IngestBuilder {
    pub fn new(stream: StreamKey) -> Self {
        Self::from_config(IngestConfig::new(stream))
    }

    pub fn from_config(config: IngestConfig) -> Self {
        Self {
            config,
            provider: None,
            schemas: EventSchemaSet::default(),
            pools: PoolRegistry::default(),
            checkpoints: None,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// First block when the stream has no checkpoint.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    pub fn confirmation_lag(mut self, blocks: u64) -> Self {
        self.config.confirmation_lag = blocks;
        self
    }

    /// Requested chunk size (capped by the provider).
    pub fn block_window(mut self, blocks: u64) -> Self {
        self.config.block_window = blocks;
        self
    }

    pub fn concurrency(mut self, workers: usize) -> Self {
        self.config.concurrency = workers;
        self
    }

    pub fn rps(mut self, rps: u32) -> Self {
        self.config.rps = rps;
        self
    }

    pub fn burst(mut self, burst: u32) -> Self {
        self.config.burst = Some(burst);
        self
    }

    pub fn write_batch_size(mut self, size: usize) -> Self {
        self.config.write_batch_size = size;
        self
    }

    pub fn resolve_timestamps(mut self, enabled: bool) -> Self {
        self.config.resolve_timestamps = enabled;
        self
    }

    /// Contract addresses to query.
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LogProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn schemas(mut self, schemas: EventSchemaSet) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn pools(mut self, pools: PoolRegistry) -> Self {
        self.pools = pools;
        self
    }

    pub fn checkpoints(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    pub fn events(mut self, store: Arc<dyn EventStore>) -> Self {
        self.events = Some(store);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// The configuration accumulated so far.
    pub fn build_config(self) -> IngestConfig {
        self.config
    }

    pub fn build(self) -> Result<Orchestrator, IngestError> {
        let provider = self
            .provider
            .ok_or_else(|| IngestError::Config("no log provider configured".into()))?;
        let checkpoints = self
            .checkpoints
            .ok_or_else(|| IngestError::Config("no checkpoint store configured".into()))?;
        let events = self
            .events
            .ok_or_else(|| IngestError::Config("no event store configured".into()))?;
        self.config.validate()?;

        let filter = LogFilter::addresses(self.config.addresses.iter().cloned())
            .with_topic0(self.schemas.topic0s());
        let limiter = Arc::new(RateLimiter::new(self.config.rate_limit()));
        let fetcher = BlockRangeFetcher::new(
            provider,
            limiter,
            RetryPolicy::new(self.config.retry.clone()),
            filter,
        )
        .resolve_timestamps(self.config.resolve_timestamps);
        let decoder = EventDecoder::new(Arc::new(self.schemas), Arc::new(self.pools));
        let writer = IngestionWriter::new(events, self.config.write_batch_size);

        Orchestrator::new(
            self.config,
            Arc::new(fetcher),
            Arc::new(decoder),
            writer,
            checkpoints,
            self.cancel,
        )
    }
}
