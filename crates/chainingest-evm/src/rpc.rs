//! JSON-RPC over HTTP log provider backed by `reqwest`.
//!
//! Issues `eth_blockNumber`, `eth_getLogs` and `eth_getBlockByNumber`.
//! Provider-specific rejections are mapped onto [`ProviderError`] so the
//! fetcher's retry policy can tell transient failures from permanent ones.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use chainingest_core::error::ProviderError;

use crate::provider::{LogFilter, LogProvider, RawLogEntry};

// ─── JSON-RPC 2.0 wire types ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    pub params: Vec<Value>,
    pub id: u64,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// A log as returned by `eth_getLogs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    #[serde(rename = "blockTimestamp", default)]
    pub block_timestamp: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: String,
    #[serde(rename = "logIndex")]
    pub log_index: String,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RpcLog {
    pub fn into_entry(self) -> Result<RawLogEntry, ProviderError> {
        let data_hex = self.data.strip_prefix("0x").unwrap_or(&self.data);
        let data = hex::decode(data_hex)
            .map_err(|e| ProviderError::Deserialization(format!("log data: {e}")))?;
        let block_timestamp = match self.block_timestamp.as_deref() {
            Some(ts) => Some(parse_hex_u64(ts)? as i64),
            None => None,
        };
        Ok(RawLogEntry {
            address: self.address.to_lowercase(),
            topics: self.topics.into_iter().map(|t| t.to_lowercase()).collect(),
            data,
            block_number: parse_hex_u64(&self.block_number)?,
            block_timestamp,
            tx_hash: self.tx_hash.to_lowercase(),
            log_index: parse_hex_u64(&self.log_index)?,
            removed: self.removed.unwrap_or(false),
        })
    }
}

/// Parse a hex quantity (with or without `0x`).
pub fn parse_hex_u64(s: &str) -> Result<u64, ProviderError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|e| ProviderError::Deserialization(format!("bad hex quantity '{s}': {e}")))
}

fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

/// Classify a JSON-RPC error object.
pub fn classify_rpc_error(provider: &str, err: JsonRpcError) -> ProviderError {
    let msg = err.message.to_lowercase();
    if err.code == -32005 || msg.contains("rate limit") || msg.contains("limit exceeded") {
        return ProviderError::RateLimited {
            provider: provider.to_string(),
        };
    }
    if msg.contains("block range")
        || msg.contains("too many results")
        || msg.contains("query returned more than")
        || msg.contains("range is too large")
        || msg.contains("exceed maximum block range")
    {
        return ProviderError::RangeRejected {
            message: err.message,
        };
    }
    ProviderError::Rpc {
        code: err.code,
        message: err.message,
    }
}

// ─── HttpLogProvider ─────────────────────────────────────────────────────────

/// Configuration for [`HttpLogProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    pub url: String,
    /// Maximum blocks per `eth_getLogs` call this endpoint accepts.
    pub max_block_range: u64,
    pub request_timeout: Duration,
}

impl HttpProviderConfig {
    pub fn new(url: impl Into<String>, max_block_range: u64) -> Self {
        Self {
            url: url.into(),
            max_block_range,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpLogProvider {
    url: String,
    http: reqwest::Client,
    max_block_range: u64,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl HttpLogProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: config.url,
            http,
            max_block_range: config.max_block_range,
            request_timeout: config.request_timeout,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self.http.post(&self.url).json(&req).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                ProviderError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                provider: self.url.clone(),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Http(format!("HTTP {}: {body}", status.as_u16())));
        }

        resp.json::<JsonRpcResponse>()
            .await
            .map_err(|e| ProviderError::Deserialization(e.to_string()))?
            .into_result()
            .map_err(|e| classify_rpc_error(&self.url, e))
    }
}

#[async_trait]
impl LogProvider for HttpLogProvider {
    fn name(&self) -> &str {
        &self.url
    }

    fn max_block_range(&self) -> u64 {
        self.max_block_range
    }

    async fn get_latest_block_number(&self) -> Result<u64, ProviderError> {
        let v = self.call("eth_blockNumber", vec![]).await?;
        let s = v
            .as_str()
            .ok_or_else(|| ProviderError::Deserialization(format!("eth_blockNumber: {v}")))?;
        parse_hex_u64(s)
    }

    async fn get_logs(
        &self,
        filter: &LogFilter,
        from: u64,
        to: u64,
    ) -> Result<Vec<RawLogEntry>, ProviderError> {
        let mut params = json!({
            "fromBlock": to_hex(from),
            "toBlock": to_hex(to),
        });
        if !filter.addresses.is_empty() {
            params["address"] = json!(filter.addresses);
        }
        if !filter.topic0.is_empty() {
            params["topics"] = json!([filter.topic0]);
        }

        let v = self.call("eth_getLogs", vec![params]).await?;
        let logs: Vec<RpcLog> =
            serde_json::from_value(v).map_err(|e| ProviderError::Deserialization(e.to_string()))?;
        logs.into_iter().map(RpcLog::into_entry).collect()
    }

    async fn get_block_timestamp(&self, number: u64) -> Result<Option<i64>, ProviderError> {
        let v = self
            .call("eth_getBlockByNumber", vec![json!(to_hex(number)), json!(false)])
            .await?;
        match v["timestamp"].as_str() {
            Some(ts) => Ok(Some(parse_hex_u64(ts)? as i64)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0xff").unwrap(), 255);
        assert_eq!(parse_hex_u64("1234").unwrap(), 0x1234);
        assert!(parse_hex_u64("0xzz").is_err());
    }

    #[test]
    fn rpc_log_converts_to_entry() {
        let log: RpcLog = serde_json::from_value(json!({
            "address": "0xABCDEF0000000000000000000000000000000001",
            "topics": ["0xDDF252AD1BE2C89B69C2B068FC378DAA952BA7F163C4A11628F55A4DF523B3EF"],
            "data": "0x00ff",
            "blockNumber": "0x12a05f200",
            "transactionHash": "0xAA",
            "logIndex": "0x5",
            "blockHash": "0x00"
        }))
        .unwrap();
        let entry = log.into_entry().unwrap();
        assert_eq!(entry.address, "0xabcdef0000000000000000000000000000000001");
        assert_eq!(entry.block_number, 5_000_000_000);
        assert_eq!(entry.log_index, 5);
        assert_eq!(entry.data, vec![0x00, 0xff]);
        assert!(entry.block_timestamp.is_none());
        assert!(!entry.removed);
        assert!(entry.topics[0].starts_with("0xddf252ad"));
    }

    #[test]
    fn rate_limit_errors_are_classified() {
        let err = classify_rpc_error(
            "p",
            JsonRpcError {
                code: -32005,
                message: "request rate exceeded".into(),
            },
        );
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[test]
    fn range_errors_are_classified() {
        let err = classify_rpc_error(
            "p",
            JsonRpcError {
                code: -32000,
                message: "requested too many blocks, block range exceeds 30".into(),
            },
        );
        assert!(matches!(err, ProviderError::RangeRejected { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn execution_errors_are_permanent() {
        let err = classify_rpc_error(
            "p",
            JsonRpcError {
                code: -32000,
                message: "execution reverted".into(),
            },
        );
        assert!(matches!(err, ProviderError::Rpc { code: -32000, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn request_serialization() {
        let req = JsonRpcRequest::new(1, "eth_blockNumber", vec![]);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"method\":\"eth_blockNumber\""));
    }
}
