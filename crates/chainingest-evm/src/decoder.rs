//! `EventDecoder`: raw logs to typed domain events.
//!
//! Pure: no I/O, no clock. Given the same schema set, pool registry and
//! logs it always produces the same [`DecodeReport`].

use std::sync::Arc;

use alloy_dyn_abi::{DynSolType, DynSolValue};
use serde_json::{Map, Value};

use chainingest_core::types::DomainEvent;

use crate::provider::RawLogEntry;
use crate::resolve::{resolve_stream, PoolRegistry};
use crate::schema::{CompiledSchema, EventSchemaSet};

/// Outcome of decoding one batch of logs.
#[derive(Debug, Clone, Default)]
pub struct DecodeReport {
    /// Decoded events, ordered by `(block_number, log_index)`.
    pub events: Vec<DomainEvent>,
    /// Logs matching no schema.
    pub unknown: u64,
    /// Logs matching a schema whose topics or data failed to decode.
    pub malformed: u64,
    /// Events stored under the unresolved placeholder stream.
    pub unresolved: u64,
}

#[derive(Debug, Clone)]
pub struct EventDecoder {
    schemas: Arc<EventSchemaSet>,
    pools: Arc<PoolRegistry>,
}

impl EventDecoder {
    pub fn new(schemas: Arc<EventSchemaSet>, pools: Arc<PoolRegistry>) -> Self {
        Self { schemas, pools }
    }

    pub fn schemas(&self) -> &EventSchemaSet {
        &self.schemas
    }

    pub fn decode(&self, entries: &[RawLogEntry]) -> DecodeReport {
        let mut report = DecodeReport::default();

        for entry in entries {
            let Some(schema) = self.schemas.select(entry) else {
                tracing::trace!(
                    address = %entry.address,
                    topic0 = entry.topic0().unwrap_or("-"),
                    "no schema for log"
                );
                report.unknown += 1;
                continue;
            };

            let payload = match decode_fields(schema, entry) {
                Ok(p) => p,
                Err(reason) => {
                    tracing::debug!(
                        schema = %schema.schema.name,
                        tx = %entry.tx_hash,
                        log_index = entry.log_index,
                        reason = %reason,
                        "malformed log skipped"
                    );
                    report.malformed += 1;
                    continue;
                }
            };

            let (stream_key, unresolved) =
                resolve_stream(&schema.schema.stream, &entry.address, &payload, &self.pools);
            if unresolved {
                report.unresolved += 1;
            }

            report.events.push(DomainEvent {
                kind: schema.schema.kind,
                stream_key,
                contract_address: entry.address.to_lowercase(),
                block_number: entry.block_number,
                tx_hash: entry.tx_hash.to_lowercase(),
                log_index: entry.log_index,
                timestamp: entry.block_timestamp,
                unresolved,
                payload: Value::Object(payload),
            });
        }

        report
            .events
            .sort_by_key(|e| (e.block_number, e.log_index));
        report
    }
}

fn decode_fields(schema: &CompiledSchema, entry: &RawLogEntry) -> Result<Map<String, Value>, String> {
    let mut out = Map::new();

    for ((name, ty), topic) in schema.indexed.iter().zip(entry.topics.iter().skip(1)) {
        out.insert(name.clone(), decode_topic(topic, ty)?);
    }

    if !schema.data.is_empty() {
        let tuple = DynSolType::Tuple(schema.data.iter().map(|(_, t)| t.clone()).collect());
        let decoded = tuple
            .abi_decode_params(&entry.data)
            .map_err(|e| format!("data decode: {e}"))?;
        let values = match decoded {
            DynSolValue::Tuple(vals) => vals,
            other => vec![other],
        };
        for ((name, _), val) in schema.data.iter().zip(values) {
            out.insert(name.clone(), to_json(val));
        }
    }

    Ok(out)
}

/// Decode one indexed topic.
///
/// Reference types (string, bytes, arrays, tuples) are stored as the keccak
/// of their encoding, so the raw 32-byte hash is returned as hex.
fn decode_topic(topic: &str, ty: &DynSolType) -> Result<Value, String> {
    let hex_str = topic.strip_prefix("0x").unwrap_or(topic);
    let bytes = hex::decode(hex_str).map_err(|e| format!("invalid topic hex: {e}"))?;
    if bytes.len() != 32 {
        return Err(format!("topic is {} bytes, expected 32", bytes.len()));
    }

    match ty {
        DynSolType::String
        | DynSolType::Bytes
        | DynSolType::Array(_)
        | DynSolType::FixedArray(..)
        | DynSolType::Tuple(_) => Ok(Value::String(format!("0x{}", hex::encode(&bytes)))),
        _ => ty
            .abi_decode(&bytes)
            .map(to_json)
            .map_err(|e| format!("topic decode: {e}")),
    }
}

/// JSON form of an ABI value: integers as decimal strings, addresses and
/// bytes as lowercase hex.
pub fn to_json(val: DynSolValue) -> Value {
    match val {
        DynSolValue::Bool(b) => Value::Bool(b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(format!("0x{}", hex::encode(&word[..size.min(32)])))
        }
        DynSolValue::Bytes(b) => Value::String(format!("0x{}", hex::encode(b))),
        DynSolValue::String(s) => Value::String(s),
        DynSolValue::Address(a) => Value::String(format!("0x{}", hex::encode(a.as_slice()))),
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        DynSolValue::Array(vals) | DynSolValue::FixedArray(vals) | DynSolValue::Tuple(vals) => {
            Value::Array(vals.into_iter().map(to_json).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::keccak256_signature;
    use crate::resolve::{PoolEntry, StreamRule};
    use crate::schema::{EventSchema, FieldDef};
    use alloy_primitives::{Address, I256, U256};
    use chainingest_core::types::{EventKind, UNRESOLVED_STREAM};

    const NPM: &str = "0x00000000000000000000000000000000000000aa";
    const POOL: &str = "0x00000000000000000000000000000000000000bb";
    const TOKEN_A: &str = "0x00000000000000000000000000000000000000a1";
    const TOKEN_B: &str = "0x00000000000000000000000000000000000000b2";

    fn field(name: &str, ty: &str, indexed: bool) -> FieldDef {
        FieldDef {
            name: name.into(),
            ty: ty.into(),
            indexed,
        }
    }

    fn address_topic(addr: &str) -> String {
        format!("0x{:0>64}", addr.trim_start_matches("0x"))
    }

    fn uint_topic(v: u64) -> String {
        format!("0x{v:064x}")
    }

    fn schema_set() -> EventSchemaSet {
        EventSchemaSet::new([
            EventSchema {
                name: "Swap".into(),
                kind: EventKind::Swap,
                signature: None,
                addresses: vec![],
                fields: vec![
                    field("sender", "address", true),
                    field("recipient", "address", true),
                    field("amount0", "int256", false),
                    field("amount1", "int256", false),
                ],
                stream: vec![StreamRule::Emitter],
            },
            EventSchema {
                name: "Collect".into(),
                kind: EventKind::Collect,
                signature: None,
                addresses: vec![NPM.into()],
                fields: vec![
                    field("tokenId", "uint256", true),
                    field("token0", "address", false),
                    field("token1", "address", false),
                    field("fee", "uint24", false),
                ],
                stream: vec![StreamRule::PoolKey {
                    token0: "token0".into(),
                    token1: "token1".into(),
                    fee: "fee".into(),
                }],
            },
        ])
        .unwrap()
    }

    fn swap_log(block: u64, log_index: u64) -> RawLogEntry {
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Int(I256::try_from(-5i64).unwrap(), 256),
            DynSolValue::Int(I256::try_from(7i64).unwrap(), 256),
        ])
        .abi_encode_params();
        RawLogEntry {
            address: POOL.into(),
            topics: vec![
                keccak256_signature("Swap(address,address,int256,int256)"),
                address_topic(TOKEN_A),
                address_topic(TOKEN_B),
            ],
            data,
            block_number: block,
            block_timestamp: Some(1_700_000_000),
            tx_hash: format!("0x{block:064x}"),
            log_index,
            removed: false,
        }
    }

    fn collect_log(fee: u32) -> RawLogEntry {
        let a: Address = TOKEN_A.parse().unwrap();
        let b: Address = TOKEN_B.parse().unwrap();
        let data = DynSolValue::Tuple(vec![
            DynSolValue::Address(a),
            DynSolValue::Address(b),
            DynSolValue::Uint(U256::from(fee), 24),
        ])
        .abi_encode_params();
        RawLogEntry {
            address: NPM.into(),
            topics: vec![
                keccak256_signature("Collect(uint256,address,address,uint24)"),
                uint_topic(42),
            ],
            data,
            block_number: 10,
            block_timestamp: None,
            tx_hash: "0xc0".into(),
            log_index: 3,
            removed: false,
        }
    }

    fn decoder(pools: PoolRegistry) -> EventDecoder {
        EventDecoder::new(Arc::new(schema_set()), Arc::new(pools))
    }

    #[test]
    fn decodes_indexed_and_data_fields() {
        let report = decoder(PoolRegistry::new()).decode(&[swap_log(5, 0)]);
        assert_eq!(report.events.len(), 1);
        let ev = &report.events[0];
        assert_eq!(ev.kind, EventKind::Swap);
        assert_eq!(ev.stream_key, POOL);
        assert_eq!(ev.payload["sender"], TOKEN_A);
        assert_eq!(ev.payload["recipient"], TOKEN_B);
        assert_eq!(ev.payload["amount0"], "-5");
        assert_eq!(ev.payload["amount1"], "7");
        assert_eq!(ev.timestamp, Some(1_700_000_000));
        assert!(!ev.unresolved);
    }

    #[test]
    fn pool_lookup_resolves_stream() {
        let pools = PoolRegistry::from_entries([PoolEntry {
            token0: TOKEN_B.into(),
            token1: TOKEN_A.into(),
            fee: 3000,
            key: POOL.into(),
        }]);
        let report = decoder(pools).decode(&[collect_log(3000)]);
        assert_eq!(report.events[0].stream_key, POOL);
        assert_eq!(report.events[0].payload["tokenId"], "42");
        assert_eq!(report.unresolved, 0);
    }

    #[test]
    fn lookup_miss_keeps_event_as_unresolved() {
        let report = decoder(PoolRegistry::new()).decode(&[collect_log(500)]);
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.events[0].stream_key, UNRESOLVED_STREAM);
        assert!(report.events[0].unresolved);
        assert_eq!(report.unresolved, 1);
    }

    #[test]
    fn unknown_logs_are_counted_and_skipped() {
        let mut unknown = swap_log(1, 0);
        unknown.topics[0] = keccak256_signature("Approval(address,address,uint256)");
        let report = decoder(PoolRegistry::new()).decode(&[unknown, swap_log(2, 0)]);
        assert_eq!(report.unknown, 1);
        assert_eq!(report.events.len(), 1);
    }

    #[test]
    fn truncated_data_is_malformed() {
        let mut bad = swap_log(1, 0);
        bad.data.truncate(40);
        let report = decoder(PoolRegistry::new()).decode(&[bad]);
        assert_eq!(report.malformed, 1);
        assert!(report.events.is_empty());
    }

    #[test]
    fn output_is_ordered_by_block_then_log_index() {
        let report = decoder(PoolRegistry::new()).decode(&[swap_log(9, 1), swap_log(3, 4), swap_log(9, 0)]);
        let order: Vec<(u64, u64)> = report
            .events
            .iter()
            .map(|e| (e.block_number, e.log_index))
            .collect();
        assert_eq!(order, vec![(3, 4), (9, 0), (9, 1)]);
    }

    #[test]
    fn reference_type_topics_are_raw_hashes() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(decode_topic(&hash, &DynSolType::String).unwrap(), Value::String(hash));
    }
}
