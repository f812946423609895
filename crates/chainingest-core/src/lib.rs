//! chainingest-core: chain-agnostic building blocks for resumable log ingestion.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator (chainingest-evm)
//!     ├── ChunkPlanner      (provider-capped, gap-free chunk plans)
//!     ├── RateLimiter       (shared token bucket)
//!     ├── RetryPolicy       (bounded exponential backoff)
//!     ├── IngestionWriter   (batched, natural-key idempotent writes)
//!     └── CheckpointStore   (compare-and-advance progress per stream)
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod health;
pub mod planner;
pub mod rate_limiter;
pub mod retry;
pub mod types;
pub mod writer;

pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointUpdate};
pub use config::IngestConfig;
pub use error::{IngestError, ProviderError};
pub use health::StreamHealth;
pub use planner::ChunkPlanner;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use retry::{RetryConfig, RetryPolicy};
pub use types::{BlockRange, DomainEvent, EventKind, RunState, RunSummary, StreamKey, WriteStats};
pub use writer::{EventStore, IngestionWriter};
