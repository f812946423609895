//! Event schemas: the static `(address | topic0) → event shape` mapping fed
//! to the decoder.
//!
//! Schemas are loaded from YAML (or built in code) and compiled once: the
//! canonical signature is hashed into its topic0 and every field type is
//! parsed into an ABI type, so a bad definition fails at startup rather
//! than per log.
//!
//! ```yaml
//! - name: Swap
//!   kind: swap
//!   fields:
//!     - { name: sender,    type: address, indexed: true }
//!     - { name: recipient, type: address, indexed: true }
//!     - { name: amount0,   type: int256 }
//!     - { name: amount1,   type: int256 }
//!   stream:
//!     - { rule: emitter }
//! ```

use std::collections::HashMap;

use alloy_dyn_abi::DynSolType;
use serde::{Deserialize, Serialize};

use chainingest_core::error::IngestError;
use chainingest_core::types::EventKind;

use crate::fingerprint;
use crate::provider::RawLogEntry;
use crate::resolve::StreamRule;

/// One event parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Solidity type, e.g. `uint256`, `address`, `int24`.
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub indexed: bool,
}

/// Definition of one event shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSchema {
    /// Solidity event name, e.g. `IncreaseLiquidity`.
    pub name: String,
    pub kind: EventKind,
    /// Canonical signature. Derived from `name` and field types when absent.
    #[serde(default)]
    pub signature: Option<String>,
    /// Contracts allowed to emit this event; empty means any.
    #[serde(default)]
    pub addresses: Vec<String>,
    pub fields: Vec<FieldDef>,
    /// Stream resolution rules, tried in order.
    #[serde(default)]
    pub stream: Vec<StreamRule>,
}

impl EventSchema {
    pub fn canonical_signature(&self) -> String {
        match &self.signature {
            Some(sig) => sig.replace(' ', ""),
            None => {
                let types: Vec<&str> = self.fields.iter().map(|f| f.ty.as_str()).collect();
                format!("{}({})", self.name, types.join(","))
            }
        }
    }
}

/// A schema with its topic0 and parsed ABI types.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub schema: EventSchema,
    pub topic0: String,
    pub addresses: Vec<String>,
    /// Indexed fields, in topic order.
    pub indexed: Vec<(String, DynSolType)>,
    /// Non-indexed fields, in data order.
    pub data: Vec<(String, DynSolType)>,
}

impl CompiledSchema {
    pub fn compile(schema: EventSchema) -> Result<Self, IngestError> {
        let mut indexed = Vec::new();
        let mut data = Vec::new();
        for f in &schema.fields {
            let ty: DynSolType = f.ty.parse().map_err(|e| {
                IngestError::Schema(format!("{}.{}: bad type '{}': {e}", schema.name, f.name, f.ty))
            })?;
            if f.indexed {
                indexed.push((f.name.clone(), ty));
            } else {
                data.push((f.name.clone(), ty));
            }
        }
        if indexed.len() > 3 {
            return Err(IngestError::Schema(format!(
                "{}: at most 3 indexed fields, got {}",
                schema.name,
                indexed.len()
            )));
        }
        Ok(Self {
            topic0: fingerprint::keccak256_signature(&schema.canonical_signature()),
            addresses: schema.addresses.iter().map(|a| a.to_lowercase()).collect(),
            schema,
            indexed,
            data,
        })
    }

    fn accepts_address(&self, address: &str) -> bool {
        self.addresses.is_empty() || self.addresses.iter().any(|a| a == address)
    }
}

/// The full set of schemas, indexed by topic0.
#[derive(Debug, Clone, Default)]
pub struct EventSchemaSet {
    by_topic0: HashMap<String, Vec<CompiledSchema>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<EventSchema>),
    One(EventSchema),
}

impl EventSchemaSet {
    pub fn new(schemas: impl IntoIterator<Item = EventSchema>) -> Result<Self, IngestError> {
        let mut set = Self::default();
        for s in schemas {
            set.add(s)?;
        }
        Ok(set)
    }

    /// Parse schemas from YAML. Accepts a list, a single schema, or several
    /// `---`-separated documents of either form.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, IngestError> {
        let mut set = Self::default();
        set.load_yaml(yaml)?;
        Ok(set)
    }

    /// Add every schema in `yaml` to this set, returning how many were added.
    pub fn load_yaml(&mut self, yaml: &str) -> Result<usize, IngestError> {
        use serde::de::Deserialize as _;

        let mut schemas = Vec::new();
        for doc in serde_yaml::Deserializer::from_str(yaml) {
            let value = serde_yaml::Value::deserialize(doc)
                .map_err(|e| IngestError::Schema(e.to_string()))?;
            if value.is_null() {
                continue;
            }
            match serde_yaml::from_value::<OneOrMany>(value)
                .map_err(|e| IngestError::Schema(e.to_string()))?
            {
                OneOrMany::Many(v) => schemas.extend(v),
                OneOrMany::One(s) => schemas.push(s),
            }
        }
        let added = schemas.len();
        for s in schemas {
            self.add(s)?;
        }
        Ok(added)
    }

    pub fn add(&mut self, schema: EventSchema) -> Result<(), IngestError> {
        let compiled = CompiledSchema::compile(schema)?;
        tracing::debug!(name = %compiled.schema.name, topic0 = %compiled.topic0, "schema registered");
        self.by_topic0
            .entry(compiled.topic0.clone())
            .or_default()
            .push(compiled);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.by_topic0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic0.is_empty()
    }

    /// Every known topic0, sorted, for building the log filter.
    pub fn topic0s(&self) -> Vec<String> {
        let mut t: Vec<String> = self.by_topic0.keys().cloned().collect();
        t.sort();
        t
    }

    /// Pick the schema for a log.
    ///
    /// Among schemas sharing the log's topic0, a candidate must accept the
    /// emitting address and declare exactly `topics.len() - 1` indexed
    /// fields. Candidates bound to explicit addresses beat open ones.
    pub fn select(&self, log: &RawLogEntry) -> Option<&CompiledSchema> {
        let topic0 = fingerprint::from_topics(&log.topics)?;
        let candidates = self.by_topic0.get(&topic0)?;
        let indexed = log.topics.len() - 1;
        let address = log.address.to_lowercase();

        let mut fitting = candidates
            .iter()
            .filter(|c| c.indexed.len() == indexed && c.accepts_address(&address));
        let first = fitting.next()?;
        if first.addresses.is_empty() {
            Some(fitting.find(|c| !c.addresses.is_empty()).unwrap_or(first))
        } else {
            Some(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMAS: &str = r#"
- name: Transfer
  kind: position_transfer
  addresses: ["0xNPM"]
  fields:
    - { name: from, type: address, indexed: true }
    - { name: to, type: address, indexed: true }
    - { name: tokenId, type: uint256, indexed: true }
- name: Transfer
  kind: position_transfer
  fields:
    - { name: from, type: address, indexed: true }
    - { name: to, type: address, indexed: true }
    - { name: value, type: uint256 }
---
name: Swap
kind: swap
signature: "Swap(address, address, int256, int256, uint160, uint128, int24)"
fields:
  - { name: sender, type: address, indexed: true }
  - { name: recipient, type: address, indexed: true }
  - { name: amount0, type: int256 }
  - { name: amount1, type: int256 }
  - { name: sqrtPriceX96, type: uint160 }
  - { name: liquidity, type: uint128 }
  - { name: tick, type: int24 }
"#;

    fn log(address: &str, topics: usize) -> RawLogEntry {
        let mut t = vec![fingerprint::keccak256_signature("Transfer(address,address,uint256)")];
        t.extend((1..topics).map(|i| format!("0x{i:064x}")));
        RawLogEntry {
            address: address.into(),
            topics: t,
            data: vec![],
            block_number: 1,
            block_timestamp: None,
            tx_hash: "0x01".into(),
            log_index: 0,
            removed: false,
        }
    }

    #[test]
    fn loads_multi_document_yaml() {
        let set = EventSchemaSet::from_yaml_str(SCHEMAS).unwrap();
        assert_eq!(set.len(), 3);
        assert!(set
            .topic0s()
            .contains(&"0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67".to_string()));
    }

    #[test]
    fn shared_topic0_disambiguated_by_indexed_count() {
        let set = EventSchemaSet::from_yaml_str(SCHEMAS).unwrap();
        let nft = set.select(&log("0xnpm", 4)).unwrap();
        assert_eq!(nft.indexed.len(), 3);
        let erc20 = set.select(&log("0xtoken", 3)).unwrap();
        assert_eq!(erc20.data.len(), 1);
        // 3 indexed topics from a contract that is not the position manager.
        assert!(set.select(&log("0xother", 4)).is_none());
    }

    #[test]
    fn unknown_topic_is_not_selected() {
        let set = EventSchemaSet::from_yaml_str(SCHEMAS).unwrap();
        let mut l = log("0xnpm", 1);
        l.topics[0] = format!("0x{:064x}", 7);
        assert!(set.select(&l).is_none());
    }

    #[test]
    fn bad_type_fails_at_load() {
        let err = EventSchemaSet::from_yaml_str(
            "name: Bad\nkind: swap\nfields:\n  - { name: x, type: uint7 }\n",
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::Schema(_)));
    }
}
