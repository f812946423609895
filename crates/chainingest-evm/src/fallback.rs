//! Ordered fallback over several log providers.
//!
//! Each call tries the providers in order, each under its own timeout, and
//! returns the first success. The last failure is surfaced when every
//! provider fails. The advertised block range is the smallest of the
//! members', so one plan is valid against whichever provider answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chainingest_core::error::ProviderError;

use crate::provider::{LogFilter, LogProvider, RawLogEntry};

struct Slot {
    provider: Arc<dyn LogProvider>,
    timeout: Duration,
}

pub struct FallbackProvider {
    name: String,
    slots: Vec<Slot>,
}

impl FallbackProvider {
    pub fn new() -> Self {
        Self {
            name: "fallback".into(),
            slots: vec![],
        }
    }

    /// Append a provider with its per-call timeout.
    pub fn with(mut self, provider: Arc<dyn LogProvider>, timeout: Duration) -> Self {
        self.slots.push(Slot { provider, timeout });
        self.name = self
            .slots
            .iter()
            .map(|s| s.provider.name())
            .collect::<Vec<_>>()
            .join(" -> ");
        self
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    async fn first_ok<'a, T, F, Fut>(&'a self, what: &str, mut call: F) -> Result<T, ProviderError>
    where
        F: FnMut(&'a dyn LogProvider) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut last = ProviderError::Http("no providers configured".into());
        for slot in &self.slots {
            match tokio::time::timeout(slot.timeout, call(slot.provider.as_ref())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::warn!(provider = slot.provider.name(), what, error = %e, "provider failed, falling through");
                    last = e;
                }
                Err(_) => {
                    tracing::warn!(provider = slot.provider.name(), what, "provider timed out, falling through");
                    last = ProviderError::Timeout {
                        ms: slot.timeout.as_millis() as u64,
                    };
                }
            }
        }
        Err(last)
    }
}

impl Default for FallbackProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogProvider for FallbackProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_block_range(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.provider.max_block_range())
            .min()
            .unwrap_or(1)
    }

    async fn get_latest_block_number(&self) -> Result<u64, ProviderError> {
        self.first_ok("eth_blockNumber", |p| p.get_latest_block_number())
            .await
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEntry>, ProviderError> {
        self.first_ok("eth_getLogs", |p| p.get_logs(filter, from, to))
            .await
    }

    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, ProviderError> {
        self.first_ok("eth_getBlockByNumber", |p| p.get_block_timestamp(number))
            .await
    }
}
