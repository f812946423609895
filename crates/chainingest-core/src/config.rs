//! Ingestion run configuration.

use serde::{Deserialize, Serialize};

use crate::error::IngestError;
use crate::rate_limiter::RateLimiterConfig;
use crate::retry::RetryConfig;
use crate::types::StreamKey;

/// Configuration for one stream's ingestion runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Stream whose checkpoint this run reads and advances.
    pub stream: StreamKey,
    /// First block to ingest when the stream has no checkpoint yet.
    #[serde(default)]
    pub start_block: u64,
    /// Blocks withheld from the chain head in follower mode.
    #[serde(default = "default_confirmation_lag")]
    pub confirmation_lag: u64,
    /// Requested chunk size; capped by the provider's maximum log range.
    #[serde(default = "default_block_window")]
    pub block_window: u64,
    /// Number of chunks processed in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Provider requests per second.
    #[serde(default = "default_rps")]
    pub rps: u32,
    /// Token bucket capacity. Defaults to `2 × rps`.
    #[serde(default)]
    pub burst: Option<u32>,
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    /// Look up block timestamps for logs that do not carry one.
    #[serde(default = "default_true")]
    pub resolve_timestamps: bool,
    /// Contract addresses passed to the log query.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Backoff for retryable provider errors.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_confirmation_lag() -> u64 {
    12
}
fn default_block_window() -> u64 {
    1000
}
fn default_concurrency() -> usize {
    4
}
fn default_rps() -> u32 {
    10
}
fn default_write_batch_size() -> usize {
    500
}
fn default_true() -> bool {
    true
}

impl IngestConfig {
    pub fn new(stream: StreamKey) -> Self {
        Self {
            stream,
            start_block: 0,
            confirmation_lag: default_confirmation_lag(),
            block_window: default_block_window(),
            concurrency: default_concurrency(),
            rps: default_rps(),
            burst: None,
            write_batch_size: default_write_batch_size(),
            resolve_timestamps: true,
            addresses: vec![],
            retry: RetryConfig::default(),
        }
    }

    pub fn rate_limit(&self) -> RateLimiterConfig {
        match self.burst {
            Some(burst) => RateLimiterConfig { rps: self.rps, burst },
            None => RateLimiterConfig::per_second(self.rps),
        }
    }

    /// Reject values that would stall or misbehave at run time.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.block_window == 0 {
            return Err(IngestError::Config("block_window must be >= 1".into()));
        }
        if self.concurrency == 0 {
            return Err(IngestError::Config("concurrency must be >= 1".into()));
        }
        if self.rps == 0 {
            return Err(IngestError::Config("rps must be >= 1".into()));
        }
        if self.write_batch_size == 0 {
            return Err(IngestError::Config("write_batch_size must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let cfg = IngestConfig::new(StreamKey::new("FACTORY", "enosys"));
        assert_eq!(cfg.confirmation_lag, 12);
        assert_eq!(cfg.block_window, 1000);
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.rate_limit(), RateLimiterConfig { rps: 10, burst: 20 });
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserializes_with_defaults() {
        let cfg: IngestConfig = serde_json::from_str(
            r#"{"stream": {"source": "POOLS", "key": "sparkdex"}, "rps": 3, "burst": 4}"#,
        )
        .unwrap();
        assert_eq!(cfg.stream, StreamKey::new("POOLS", "sparkdex"));
        assert_eq!(cfg.write_batch_size, 500);
        assert!(cfg.resolve_timestamps);
        assert_eq!(cfg.rate_limit(), RateLimiterConfig { rps: 3, burst: 4 });
    }

    #[test]
    fn retry_section_is_read_in_milliseconds() {
        let cfg: IngestConfig = serde_json::from_str(
            r#"{"stream": {"source": "POOLS", "key": "enosys"},
                "retry": {"max_retries": 5, "initial_backoff_ms": 250}}"#,
        )
        .unwrap();
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(250));
        // Unset fields keep their defaults.
        assert_eq!(cfg.retry.max_backoff, Duration::from_secs(10));
        assert_eq!(cfg.retry.multiplier, 2.0);

        let absent: IngestConfig =
            serde_json::from_str(r#"{"stream": {"source": "POOLS", "key": "enosys"}}"#).unwrap();
        assert_eq!(absent.retry.max_retries, 3);
        assert_eq!(absent.retry.initial_backoff, Duration::from_millis(100));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut cfg = IngestConfig::new(StreamKey::new("a", "b"));
        cfg.concurrency = 0;
        assert!(matches!(cfg.validate(), Err(IngestError::Config(_))));
    }
}
