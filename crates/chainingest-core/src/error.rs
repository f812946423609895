//! Error types for the ingestion pipeline.

use thiserror::Error;

use crate::types::{BlockRange, StreamKey, WriteStats};

/// Errors returned by a log provider (RPC endpoint).
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Request did not complete within the configured timeout.
    #[error("request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Provider rejected the request because of its rate limit.
    #[error("rate limited by provider {provider}")]
    RateLimited { provider: String },

    /// Provider refused the block range (too wide, too many results, ...).
    #[error("block range rejected: {message}")]
    RangeRejected { message: String },

    /// Connection-level failure (refused, reset, non-2xx status).
    #[error("HTTP error: {0}")]
    Http(String),

    /// JSON-RPC error object returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response payload could not be parsed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl ProviderError {
    /// Returns `true` if the failure is transient and the call may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::RateLimited { .. } | Self::RangeRejected { .. } | Self::Http(_)
        )
    }
}

/// Errors that can occur during an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Fetching a chunk failed after all retries.
    #[error("fetch failed for blocks {range}: {source}")]
    ChunkFetch {
        range: BlockRange,
        #[source]
        source: ProviderError,
    },

    /// The chain head could not be read.
    #[error("could not read chain head: {0}")]
    ChainHead(#[source] ProviderError),

    /// A chunk size was requested that the provider cannot serve.
    #[error("block window {requested} exceeds provider cap {provider_cap}")]
    InvalidWindow { requested: u64, provider_cap: u64 },

    /// A batch of events could not be persisted. `stats` covers the whole
    /// call: batches stored before the failure plus `errors` for the events
    /// that were not.
    #[error("write failed ({stats}): {cause}")]
    Write { cause: String, stats: WriteStats },

    /// Storage backend failure outside of an event write.
    #[error("storage error: {0}")]
    Storage(String),

    /// An attempt was made to move a checkpoint backwards.
    #[error("checkpoint regression on {stream}: current block {current}, attempted {attempted}")]
    CheckpointRegression {
        stream: StreamKey,
        current: u64,
        attempted: u64,
    },

    /// Invalid event schema definition.
    #[error("schema error: {0}")]
    Schema(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A chunk worker panicked before reporting an outcome.
    #[error("worker for blocks {range} panicked")]
    WorkerPanicked { range: BlockRange },

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    /// Returns `true` if the error only fails the chunk it occurred in.
    ///
    /// Everything else aborts the run.
    pub fn is_chunk_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChunkFetch { .. } | Self::Write { .. } | Self::Storage(_) | Self::WorkerPanicked { .. }
        )
    }

    /// Returns `true` for a checkpoint monotonicity violation.
    pub fn is_regression(&self) -> bool {
        matches!(self, Self::CheckpointRegression { .. })
    }
}
