//! Chunk planner: splits a block range into provider-sized sub-ranges.
//!
//! Every provider advertises a maximum `eth_getLogs` range (its cap). The
//! planner is bound to that cap, so asking for a wider chunk fails here,
//! before any request is made.

use crate::error::IngestError;
use crate::types::BlockRange;

/// Plans contiguous, non-overlapping chunks for one provider.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    provider_cap: u64,
}

impl ChunkPlanner {
    /// Create a planner for a provider that accepts at most `provider_cap`
    /// blocks per log query.
    pub fn new(provider_cap: u64) -> Result<Self, IngestError> {
        if provider_cap == 0 {
            return Err(IngestError::Config("provider cap must be >= 1".into()));
        }
        Ok(Self { provider_cap })
    }

    pub fn provider_cap(&self) -> u64 {
        self.provider_cap
    }

    /// The chunk size to use for a requested window: `min(requested, cap)`.
    pub fn effective_window(&self, requested: u64) -> Result<u64, IngestError> {
        if requested == 0 {
            return Err(IngestError::Config("block window must be >= 1".into()));
        }
        Ok(requested.min(self.provider_cap))
    }

    /// Split `[from, to]` into chunks of at most `cap` blocks.
    ///
    /// Returns an empty plan when `from > to` (already up to date).
    /// Fails when `cap` is zero or wider than the provider cap.
    pub fn plan(&self, from: u64, to: u64, cap: u64) -> Result<Vec<BlockRange>, IngestError> {
        if cap == 0 {
            return Err(IngestError::Config("chunk cap must be >= 1".into()));
        }
        if cap > self.provider_cap {
            return Err(IngestError::InvalidWindow {
                requested: cap,
                provider_cap: self.provider_cap,
            });
        }
        Ok(plan_chunks(from, to, cap))
    }
}

/// Split `[from, to]` into contiguous chunks of length `cap` (the last one
/// may be shorter). `cap` must be non-zero.
pub fn plan_chunks(from: u64, to: u64, cap: u64) -> Vec<BlockRange> {
    debug_assert!(cap >= 1);
    let mut chunks = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let end = cursor.saturating_add(cap - 1).min(to);
        chunks.push(BlockRange { from: cursor, to: end });
        if end == u64::MAX {
            break;
        }
        cursor = end + 1;
    }
    chunks
}
