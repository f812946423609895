//! The provider seam: anything that can answer log queries for a block range.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use chainingest_core::error::ProviderError;

/// A raw log entry, opaque until decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEntry {
    /// Lowercase `0x…` address of the emitting contract.
    pub address: String,
    /// `0x…` 32-byte topics; `topics[0]` is the event fingerprint.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed arguments.
    pub data: Vec<u8>,
    pub block_number: u64,
    /// Block timestamp when the provider includes it in the log.
    pub block_timestamp: Option<i64>,
    pub tx_hash: String,
    pub log_index: u64,
    /// `true` when the log was dropped by a reorg.
    pub removed: bool,
}

impl RawLogEntry {
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

/// Address and topic filter for a log query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Contract addresses; empty means any address.
    pub addresses: Vec<String>,
    /// Accepted `topics[0]` values; empty means any event.
    pub topic0: Vec<String>,
}

impl LogFilter {
    pub fn addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(|a| a.into().to_lowercase()).collect(),
            topic0: vec![],
        }
    }

    pub fn with_topic0(mut self, topic0: impl IntoIterator<Item = String>) -> Self {
        self.topic0 = topic0.into_iter().collect();
        self
    }

    pub fn matches(&self, log: &RawLogEntry) -> bool {
        let addr_ok = self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(&log.address));
        let topic_ok = self.topic0.is_empty()
            || log
                .topic0()
                .map(|t| self.topic0.iter().any(|want| want.eq_ignore_ascii_case(t)))
                .unwrap_or(false);
        addr_ok && topic_ok
    }
}

/// A source of chain head and log data.
#[async_trait]
pub trait LogProvider: Send + Sync {
    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str;

    /// Maximum number of blocks this provider accepts in one log query.
    fn max_block_range(&self) -> u64;

    async fn get_latest_block_number(&self) -> Result<u64, ProviderError>;

    /// All logs matching `filter` in `[from, to]`, both inclusive.
    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEntry>, ProviderError>;

    /// Timestamp of block `number`, `None` if the provider does not know it.
    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(address: &str, topic0: &str) -> RawLogEntry {
        RawLogEntry {
            address: address.into(),
            topics: vec![topic0.into()],
            data: vec![],
            block_number: 1,
            block_timestamp: None,
            tx_hash: "0x01".into(),
            log_index: 0,
            removed: false,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(LogFilter::default().matches(&log("0xabc", "0x01")));
    }

    #[test]
    fn address_filter_is_case_insensitive() {
        let f = LogFilter::addresses(["0xABC"]);
        assert!(f.matches(&log("0xabc", "0x01")));
        assert!(!f.matches(&log("0xdef", "0x01")));
    }

    #[test]
    fn topic_filter() {
        let f = LogFilter::default().with_topic0(vec!["0x01".to_string()]);
        assert!(f.matches(&log("0xabc", "0x01")));
        assert!(!f.matches(&log("0xabc", "0x02")));
    }
}
