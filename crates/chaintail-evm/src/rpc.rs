//! JSON-RPC [`EthClient`] over HTTP.
//!
//! Uses `eth_getBlockByNumber` (full transactions), `eth_getTransactionReceipt`
//! and `eth_chainId`. A `null` result means the node does not know the object
//! yet and is reported as [`TailError::NotFound`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use chaintail_core::block::{Block, Header, Log, Receipt, Transaction};
use chaintail_core::client::EthClient;
use chaintail_core::error::TailError;

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorObject>,
}

/// Stateless JSON-RPC client; the endpoint is given on every call.
pub struct JsonRpcEthClient {
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl Default for JsonRpcEthClient {
    fn default() -> Self {
        Self::with_client(reqwest::Client::new())
    }
}

impl JsonRpcEthClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, TailError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TailError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http))
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            next_id: AtomicU64::new(1),
        }
    }

    /// Perform one call; `what` names the object for [`TailError::NotFound`].
    async fn call(
        &self,
        endpoint: &str,
        method: &str,
        params: Value,
        what: impl FnOnce() -> String,
    ) -> Result<Value, TailError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let resp = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| TailError::Rpc(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TailError::Rpc(format!("{method}: HTTP {status}: {body}")));
        }

        let resp = resp
            .json::<RpcResponse>()
            .await
            .map_err(|e| TailError::Rpc(format!("{method}: invalid response: {e}")))?;

        into_result(method, resp, what)
    }
}

fn into_result(
    method: &str,
    resp: RpcResponse,
    what: impl FnOnce() -> String,
) -> Result<Value, TailError> {
    if let Some(err) = resp.error {
        return Err(TailError::Rpc(format!(
            "{method}: node error {}: {}",
            err.code, err.message
        )));
    }
    match resp.result {
        None | Some(Value::Null) => Err(TailError::not_found(what())),
        Some(value) => Ok(value),
    }
}

fn malformed(what: &str) -> TailError {
    TailError::Rpc(format!("malformed {what} in node response"))
}

#[async_trait]
impl EthClient for JsonRpcEthClient {
    async fn block_by_number(&self, endpoint: &str, number: u64) -> Result<Block, TailError> {
        let v = self
            .call(
                endpoint,
                "eth_getBlockByNumber",
                json!([format!("0x{number:x}"), true]),
                || format!("block {number}"),
            )
            .await?;
        block_from_json(&v).ok_or_else(|| malformed("block"))
    }

    async fn header_by_number(
        &self,
        endpoint: &str,
        number: Option<u64>,
    ) -> Result<Header, TailError> {
        let tag = match number {
            Some(n) => format!("0x{n:x}"),
            None => "latest".to_string(),
        };
        let v = self
            .call(endpoint, "eth_getBlockByNumber", json!([tag, false]), || {
                format!("header {tag}")
            })
            .await?;
        header_from_json(&v).ok_or_else(|| malformed("header"))
    }

    async fn transaction_receipt(
        &self,
        endpoint: &str,
        tx_hash: &str,
    ) -> Result<Receipt, TailError> {
        let v = self
            .call(
                endpoint,
                "eth_getTransactionReceipt",
                json!([tx_hash]),
                || format!("receipt {tx_hash}"),
            )
            .await?;
        receipt_from_json(&v).ok_or_else(|| malformed("receipt"))
    }

    async fn network(&self, endpoint: &str) -> Result<u64, TailError> {
        let v = self
            .call(endpoint, "eth_chainId", json!([]), || "chain id".to_string())
            .await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| malformed("chain id"))
    }
}

// ─── Parsing ──────────────────────────────────────────────────────────────────

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(s, 16).ok()
}

fn hex_field(v: &Value, field: &str) -> Option<u64> {
    parse_hex_u64(v[field].as_str()?)
}

fn str_field(v: &Value, field: &str) -> Option<String> {
    Some(v[field].as_str()?.to_string())
}

pub fn header_from_json(v: &Value) -> Option<Header> {
    Some(Header {
        number: hex_field(v, "number")?,
        hash: str_field(v, "hash")?,
        parent_hash: str_field(v, "parentHash")?,
        timestamp: hex_field(v, "timestamp")?,
    })
}

pub fn transaction_from_json(v: &Value) -> Option<Transaction> {
    Some(Transaction {
        hash: str_field(v, "hash")?,
        from: str_field(v, "from")?,
        to: v["to"].as_str().map(str::to_string),
        nonce: hex_field(v, "nonce")?,
        value: str_field(v, "value").unwrap_or_else(|| "0x0".to_string()),
        gas: hex_field(v, "gas")?,
        input: str_field(v, "input").unwrap_or_else(|| "0x".to_string()),
    })
}

/// Convert an `eth_getBlockByNumber(_, true)` result to a [`Block`].
pub fn block_from_json(v: &Value) -> Option<Block> {
    let transactions = match v["transactions"].as_array() {
        Some(txs) => txs
            .iter()
            .map(transaction_from_json)
            .collect::<Option<Vec<_>>>()?,
        None => Vec::new(),
    };
    Some(Block {
        header: header_from_json(v)?,
        transactions,
    })
}

pub fn log_from_json(v: &Value) -> Option<Log> {
    Some(Log {
        address: str_field(v, "address")?,
        topics: v["topics"]
            .as_array()?
            .iter()
            .map(|t| t.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()?,
        data: str_field(v, "data")?,
        log_index: hex_field(v, "logIndex")?,
    })
}

/// Convert an `eth_getTransactionReceipt` result to a [`Receipt`].
///
/// Receipts from before Byzantium carry no `status` and count as successful.
pub fn receipt_from_json(v: &Value) -> Option<Receipt> {
    let status = match v["status"].as_str() {
        Some(s) => parse_hex_u64(s)? == 1,
        None => true,
    };
    Some(Receipt {
        tx_hash: str_field(v, "transactionHash")?,
        tx_index: hex_field(v, "transactionIndex")?,
        block_hash: str_field(v, "blockHash")?,
        block_number: hex_field(v, "blockNumber")?,
        status,
        gas_used: hex_field(v, "gasUsed")?,
        contract_address: v["contractAddress"].as_str().map(str::to_string),
        logs: v["logs"]
            .as_array()
            .map(|logs| logs.iter().map(log_from_json).collect::<Option<Vec<_>>>())
            .unwrap_or(Some(Vec::new()))?,
    })
}
