//! YAML configuration for the `chainingest` binary.
//!
//! ```yaml
//! ingest:
//!   stream: { source: FACTORY, key: enosys }
//!   start_block: 29837200
//!   block_window: 5000
//!   rps: 10
//!   retry: { max_retries: 5, initial_backoff_ms: 250 }
//! provider:
//!   url: https://flare-api.flare.network/ext/C/rpc
//!   max_block_range: 30
//!   fallbacks:
//!     - { url: https://rpc.ankr.com/flare, max_block_range: 1000 }
//! storage:
//!   backend: sqlite
//!   url: ./ingest.db
//! schema_files: [schemas/npm.yaml]
//! pools:
//!   - { token0: "0x…", token1: "0x…", fee: 3000, key: "0x…pool" }
//! log:
//!   level: info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use chainingest_core::checkpoint::CheckpointStore;
use chainingest_core::config::IngestConfig;
use chainingest_core::writer::EventStore;
use chainingest_evm::{
    EventSchema, EventSchemaSet, FallbackProvider, HttpLogProvider, HttpProviderConfig,
    LogProvider, PoolEntry, PoolRegistry,
};

use crate::tracing_setup::LogConfig;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ingest: IngestConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Schemas written inline.
    #[serde(default)]
    pub schemas: Vec<EventSchema>,
    /// Schema files, resolved relative to the config file.
    #[serde(default)]
    pub schema_files: Vec<PathBuf>,
    #[serde(default)]
    pub pools: Vec<PoolEntry>,
    #[serde(default)]
    pub log: LogConfig,
    /// Directory of the config file, for resolving relative paths.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// JSON-RPC endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    /// Maximum blocks per `eth_getLogs` call the endpoint accepts.
    pub max_block_range: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(flatten)]
    pub primary: EndpointConfig,
    /// Endpoints tried in order when the primary fails.
    #[serde(default)]
    pub fallbacks: Vec<EndpointConfig>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// File path (sqlite) or connection URL (postgres).
    #[serde(default)]
    pub url: Option<String>,
}

/// Checkpoint and event stores opened from [`StorageConfig`].
pub struct Stores {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub events: Arc<dyn EventStore>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut config = Self::from_yaml_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.ingest.validate()?;
        Ok(config)
    }

    /// Inline schemas plus every schema file.
    pub fn schema_set(&self) -> Result<EventSchemaSet> {
        let mut set = EventSchemaSet::new(self.schemas.iter().cloned())?;
        for file in &self.schema_files {
            let path = self.base_dir.join(file);
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading schema file {}", path.display()))?;
            let added = set
                .load_yaml(&text)
                .with_context(|| format!("loading schema file {}", path.display()))?;
            tracing::debug!(file = %path.display(), schemas = added, "schema file loaded");
        }
        if set.is_empty() {
            bail!("no event schemas configured");
        }
        Ok(set)
    }

    pub fn pool_registry(&self) -> PoolRegistry {
        PoolRegistry::from_entries(self.pools.iter().cloned())
    }

    /// The primary endpoint, wrapped in a fallback chain when fallbacks exist.
    pub fn log_provider(&self) -> Result<Arc<dyn LogProvider>> {
        let primary = http_provider(&self.provider.primary)?;
        if self.provider.fallbacks.is_empty() {
            return Ok(primary);
        }
        let mut chain = FallbackProvider::new().with(
            primary,
            Duration::from_millis(self.provider.primary.timeout_ms),
        );
        for endpoint in &self.provider.fallbacks {
            chain = chain.with(
                http_provider(endpoint)?,
                Duration::from_millis(endpoint.timeout_ms),
            );
        }
        Ok(Arc::new(chain))
    }

    pub async fn open_storage(&self) -> Result<Stores> {
        match self.storage.backend {
            StorageBackend::Memory => {
                let store = Arc::new(chainingest_storage::InMemoryStorage::new());
                Ok(Stores {
                    checkpoints: store.clone(),
                    events: store,
                })
            }
            StorageBackend::Sqlite => open_sqlite(self.storage_url()?).await,
            StorageBackend::Postgres => open_postgres(self.storage_url()?).await,
        }
    }

    fn storage_url(&self) -> Result<&str> {
        self.storage
            .url
            .as_deref()
            .with_context(|| format!("storage backend {:?} needs a url", self.storage.backend))
    }
}

fn http_provider(endpoint: &EndpointConfig) -> Result<Arc<dyn LogProvider>> {
    let mut config = HttpProviderConfig::new(&endpoint.url, endpoint.max_block_range);
    config.request_timeout = Duration::from_millis(endpoint.timeout_ms);
    let provider = HttpLogProvider::new(config)
        .with_context(|| format!("building provider for {}", endpoint.url))?;
    Ok(Arc::new(provider))
}

#[cfg(feature = "sqlite")]
async fn open_sqlite(url: &str) -> Result<Stores> {
    let store = Arc::new(chainingest_storage::SqliteStorage::open(url).await?);
    Ok(Stores {
        checkpoints: store.clone(),
        events: store,
    })
}

#[cfg(not(feature = "sqlite"))]
async fn open_sqlite(_url: &str) -> Result<Stores> {
    bail!("built without the `sqlite` feature")
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str) -> Result<Stores> {
    let store = Arc::new(chainingest_storage::PostgresStorage::connect(url).await?);
    Ok(Stores {
        checkpoints: store.clone(),
        events: store,
    })
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str) -> Result<Stores> {
    bail!("built without the `postgres` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
ingest:
  stream: { source: FACTORY, key: enosys }
  start_block: 29837200
  block_window: 5000
provider:
  url: http://localhost:8545
  max_block_range: 30
  fallbacks:
    - { url: http://localhost:8546, max_block_range: 1000, timeout_ms: 5000 }
storage:
  backend: sqlite
  url: ./ingest.db
schemas:
  - name: PoolCreated
    kind: pool_created
    fields:
      - { name: token0, type: address, indexed: true }
      - { name: token1, type: address, indexed: true }
      - { name: fee, type: uint24, indexed: true }
      - { name: tickSpacing, type: int24 }
      - { name: pool, type: address }
    stream:
      - { rule: field, field: pool }
pools:
  - { token0: "0xA1", token1: "0xB2", fee: 3000, key: "0xpool" }
log:
  level: debug
"#;

    #[test]
    fn parses_full_config() {
        let cfg = AppConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(cfg.ingest.stream.key, "enosys");
        assert_eq!(cfg.ingest.block_window, 5000);
        assert_eq!(cfg.ingest.confirmation_lag, 12);
        assert_eq!(cfg.provider.primary.max_block_range, 30);
        assert_eq!(cfg.provider.primary.timeout_ms, 30_000);
        assert_eq!(cfg.provider.fallbacks[0].timeout_ms, 5000);
        assert_eq!(cfg.storage.backend, StorageBackend::Sqlite);
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.schema_set().unwrap().len(), 1);
        assert_eq!(cfg.pool_registry().len(), 1);
    }

    #[test]
    fn fallback_chain_advertises_smallest_cap() {
        let cfg = AppConfig::from_yaml_str(CONFIG).unwrap();
        let provider = cfg.log_provider().unwrap();
        assert_eq!(provider.max_block_range(), 30);
    }

    #[test]
    fn storage_defaults_to_memory() {
        let cfg = AppConfig::from_yaml_str(
            "ingest: { stream: { source: a, key: b } }\nprovider: { url: http://x, max_block_range: 10 }\n",
        )
        .unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert!(cfg.schema_set().is_err());
    }

    #[test]
    fn invalid_ingest_settings_are_rejected() {
        let err = AppConfig::from_yaml_str(
            "ingest: { stream: { source: a, key: b }, concurrency: 0 }\nprovider: { url: http://x, max_block_range: 10 }\n",
        );
        assert!(err.is_err());
    }
}
