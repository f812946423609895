//! chainingest-evm: EVM log fetching, decoding, and the run orchestrator.

pub mod builder;
pub mod decoder;
pub mod fallback;
pub mod fetcher;
pub mod fingerprint;
pub mod orchestrator;
pub mod provider;
pub mod resolve;
pub mod rpc;
pub mod schema;

pub use builder::IngestBuilder;
pub use decoder::{DecodeReport, EventDecoder};
pub use fallback::FallbackProvider;
pub use fetcher::BlockRangeFetcher;
pub use orchestrator::{Orchestrator, RunRequest};
pub use provider::{LogFilter, LogProvider, RawLogEntry};
pub use resolve::{PoolEntry, PoolKey, PoolRegistry, StreamRule};
pub use rpc::{HttpLogProvider, HttpProviderConfig};
pub use schema::{EventSchema, EventSchemaSet, FieldDef};
