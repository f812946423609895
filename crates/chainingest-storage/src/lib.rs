//! chainingest-storage: event and checkpoint stores for ChainIngest.
//!
//! Backends:
//! - [`memory`] - in-memory (dev/testing, no persistence)
//! - `sqlite` - SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres` - PostgreSQL via `sqlx` (pooled, production)
//!
//! Every backend implements both [`EventStore`](chainingest_core::writer::EventStore)
//! (natural-key dedup) and [`CheckpointStore`](chainingest_core::checkpoint::CheckpointStore)
//! (monotonic advance).

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresOptions, PostgresStorage};
