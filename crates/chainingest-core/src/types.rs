//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockRange ──────────────────────────────────────────────────────────────

/// An inclusive range of block numbers, `from <= to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    /// Build a range, returning `None` when `from > to`.
    pub fn new(from: u64, to: u64) -> Option<Self> {
        (from <= to).then_some(Self { from, to })
    }

    /// Number of blocks covered (both ends inclusive).
    pub fn block_count(&self) -> u64 {
        self.to - self.from + 1
    }

    pub fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

// ─── StreamKey ───────────────────────────────────────────────────────────────

/// Identity of an independently checkpointed feed, e.g. `FACTORY/enosys`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub source: String,
    pub key: String,
}

impl StreamKey {
    pub fn new(source: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.source, self.key)
    }
}

// ─── DomainEvent ─────────────────────────────────────────────────────────────

/// Placeholder stream key for events whose pool could not be determined.
pub const UNRESOLVED_STREAM: &str = "unresolved";

/// The closed set of event kinds the decoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PositionTransfer,
    IncreaseLiquidity,
    DecreaseLiquidity,
    Collect,
    PoolCreated,
    Swap,
    Mint,
    Burn,
    StakingReward,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PositionTransfer => "position_transfer",
            Self::IncreaseLiquidity => "increase_liquidity",
            Self::DecreaseLiquidity => "decrease_liquidity",
            Self::Collect => "collect",
            Self::PoolCreated => "pool_created",
            Self::Swap => "swap",
            Self::Mint => "mint",
            Self::Burn => "burn",
            Self::StakingReward => "staking_reward",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "position_transfer" => Ok(Self::PositionTransfer),
            "increase_liquidity" => Ok(Self::IncreaseLiquidity),
            "decrease_liquidity" => Ok(Self::DecreaseLiquidity),
            "collect" => Ok(Self::Collect),
            "pool_created" => Ok(Self::PoolCreated),
            "swap" => Ok(Self::Swap),
            "mint" => Ok(Self::Mint),
            "burn" => Ok(Self::Burn),
            "staking_reward" => Ok(Self::StakingReward),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// A decoded, typed event ready to be persisted.
///
/// The natural key `(stream_key, tx_hash, log_index)` is the only dedup
/// identity: storing the same key twice is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    /// Logical pool/stream this event belongs to, or [`UNRESOLVED_STREAM`].
    pub stream_key: String,
    /// Lowercase `0x…` address of the emitting contract.
    pub contract_address: String,
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    /// Block timestamp (seconds since epoch), when known.
    pub timestamp: Option<i64>,
    /// `true` when the stream key is the unresolved placeholder.
    pub unresolved: bool,
    /// Decoded fields keyed by schema field name.
    pub payload: serde_json::Value,
}

impl DomainEvent {
    pub fn natural_key(&self) -> (&str, &str, u64) {
        (&self.stream_key, &self.tx_hash, self.log_index)
    }
}

// ─── Write statistics ────────────────────────────────────────────────────────

/// Outcome of persisting one set of events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStats {
    pub written: u64,
    pub duplicates_skipped: u64,
    /// Events that could not be persisted because their batch failed.
    pub errors: u64,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} written, {} duplicates, {} not written",
            self.written, self.duplicates_skipped, self.errors
        )
    }
}

impl WriteStats {
    pub fn merge(&mut self, other: WriteStats) {
        self.written += other.written;
        self.duplicates_skipped += other.duplicates_skipped;
        self.errors += other.errors;
    }
}

// ─── RunSummary ──────────────────────────────────────────────────────────────

/// State of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Planning,
    /// Workers are running; reflects the most recent phase any worker entered.
    Fetching,
    Decoding,
    Writing,
    Checkpointing,
    /// Run finished with failed or skipped chunks.
    Failed,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Planning => write!(f, "planning"),
            Self::Fetching => write!(f, "fetching"),
            Self::Decoding => write!(f, "decoding"),
            Self::Writing => write!(f, "writing"),
            Self::Checkpointing => write!(f, "checkpointing"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-invocation report of an ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub stream: StreamKey,
    /// Effective range of the run; `None` when already up to date.
    pub range: Option<BlockRange>,
    pub chunks_planned: u64,
    pub chunks_succeeded: u64,
    pub chunks_failed: u64,
    /// Chunks never started because the run was cancelled.
    pub chunks_skipped: u64,
    pub events_decoded: u64,
    pub events_written: u64,
    pub duplicates_skipped: u64,
    /// Events left unwritten by failed write batches.
    pub write_errors: u64,
    /// Log entries matching no known schema.
    pub events_unknown: u64,
    /// Log entries matching a schema but failing to decode.
    pub events_malformed: u64,
    /// Decoded events stored under the unresolved placeholder stream.
    pub events_unresolved: u64,
    pub failed_ranges: Vec<BlockRange>,
    /// Checkpoint block after the run, if any checkpoint exists.
    pub checkpoint_block: Option<u64>,
    pub state: RunState,
}

impl RunSummary {
    /// An empty summary: nothing planned, nothing changed.
    pub fn empty(stream: StreamKey, checkpoint_block: Option<u64>) -> Self {
        Self {
            stream,
            range: None,
            chunks_planned: 0,
            chunks_succeeded: 0,
            chunks_failed: 0,
            chunks_skipped: 0,
            events_decoded: 0,
            events_written: 0,
            duplicates_skipped: 0,
            write_errors: 0,
            events_unknown: 0,
            events_malformed: 0,
            events_unresolved: 0,
            failed_ranges: vec![],
            checkpoint_block,
            state: RunState::Idle,
        }
    }

    /// Returns `true` if every planned chunk succeeded.
    pub fn is_complete(&self) -> bool {
        self.chunks_failed == 0 && self.chunks_skipped == 0
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_range_rejects_inverted_bounds() {
        assert!(BlockRange::new(101, 100).is_none());
        let r = BlockRange::new(100, 100).unwrap();
        assert_eq!(r.block_count(), 1);
        assert!(r.contains(100));
        assert!(!r.contains(101));
    }

    #[test]
    fn stream_key_display() {
        assert_eq!(StreamKey::new("FACTORY", "enosys").to_string(), "FACTORY/enosys");
    }

    #[test]
    fn event_kind_roundtrips_through_str() {
        for kind in [EventKind::PositionTransfer, EventKind::Swap, EventKind::StakingReward] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("transfer".parse::<EventKind>().is_err());
    }

    #[test]
    fn empty_summary_is_complete() {
        let s = RunSummary::empty(StreamKey::new("FACTORY", "enosys"), Some(10));
        assert!(s.is_complete());
        assert_eq!(s.chunks_planned, 0);
        assert_eq!(s.state, RunState::Idle);
    }
}
