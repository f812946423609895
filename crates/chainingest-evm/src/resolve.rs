//! Stream resolution: which logical stream (pool) a decoded event belongs to.
//!
//! Each schema carries an ordered list of [`StreamRule`]s. The first rule
//! that yields a key wins. When none does, the event is stored under
//! [`UNRESOLVED_STREAM`] and flagged for later reconciliation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use chainingest_core::types::UNRESOLVED_STREAM;

/// A pool identity: unordered token pair plus fee tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub token0: String,
    pub token1: String,
    pub fee: u32,
}

impl PoolKey {
    /// Lowercases both tokens and orders them so `(a, b)` and `(b, a)` match.
    pub fn new(token_a: &str, token_b: &str, fee: u32) -> Self {
        let a = token_a.to_lowercase();
        let b = token_b.to_lowercase();
        let (token0, token1) = if a <= b { (a, b) } else { (b, a) };
        Self { token0, token1, fee }
    }
}

/// One entry of the pool lookup table as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub token0: String,
    pub token1: String,
    pub fee: u32,
    /// Stream key assigned to the pool, typically the pool address.
    pub key: String,
}

/// Token-pair + fee → stream key lookup table.
#[derive(Debug, Clone, Default)]
pub struct PoolRegistry {
    pools: HashMap<PoolKey, String>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = PoolEntry>) -> Self {
        let mut registry = Self::new();
        for e in entries {
            registry.insert(PoolKey::new(&e.token0, &e.token1, e.fee), e.key);
        }
        registry
    }

    pub fn insert(&mut self, key: PoolKey, stream_key: impl Into<String>) {
        self.pools.insert(key, stream_key.into().to_lowercase());
    }

    pub fn lookup(&self, key: &PoolKey) -> Option<&str> {
        self.pools.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// How to derive a stream key for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum StreamRule {
    /// Always this key.
    Fixed { key: String },
    /// The emitting contract's own address (events emitted by the pool).
    Emitter,
    /// Key by emitting contract address.
    Contract { map: HashMap<String, String> },
    /// Use a decoded field's value (e.g. the `pool` address of `PoolCreated`).
    Field { field: String },
    /// Look up `(token0, token1, fee)` fields in the pool registry.
    PoolKey {
        token0: String,
        token1: String,
        fee: String,
    },
}

impl StreamRule {
    fn apply(&self, contract: &str, payload: &Map<String, Value>, pools: &PoolRegistry) -> Option<String> {
        match self {
            Self::Fixed { key } => Some(key.clone()),
            Self::Emitter => Some(contract.to_lowercase()),
            Self::Contract { map } => map
                .iter()
                .find(|(addr, _)| addr.eq_ignore_ascii_case(contract))
                .map(|(_, key)| key.clone()),
            Self::Field { field } => payload.get(field).and_then(scalar_string),
            Self::PoolKey { token0, token1, fee } => {
                let t0 = payload.get(token0).and_then(Value::as_str)?;
                let t1 = payload.get(token1).and_then(Value::as_str)?;
                let fee = payload
                    .get(fee)
                    .and_then(scalar_string)
                    .and_then(|f| f.parse::<u32>().ok())?;
                pools.lookup(&PoolKey::new(t0, t1, fee)).map(str::to_string)
            }
        }
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.to_lowercase()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Run `rules` in order; `(key, unresolved)`.
pub fn resolve_stream(
    rules: &[StreamRule],
    contract: &str,
    payload: &Map<String, Value>,
    pools: &PoolRegistry,
) -> (String, bool) {
    rules
        .iter()
        .find_map(|r| r.apply(contract, payload, pools))
        .map(|key| (key, false))
        .unwrap_or_else(|| (UNRESOLVED_STREAM.to_string(), true))
}
