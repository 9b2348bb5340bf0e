//! Chain data handed from the node to the hook.

use serde::{Deserialize, Serialize};

// ─── Header ───────────────────────────────────────────────────────────────────

/// A block header: enough to learn the chain tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp (seconds).
    pub timestamp: u64,
}

// ─── Transaction ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: String,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    pub nonce: u64,
    /// Wei value, hex-encoded as returned by the node.
    pub value: String,
    pub gas: u64,
    pub input: String,
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// A full block with its transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }

    /// Hashes of the block's transactions, in block order.
    pub fn tx_hashes(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().map(|tx| tx.hash.as_str())
    }
}

// ─── Receipt ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub log_index: u64,
}

/// A transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    pub tx_index: u64,
    pub block_hash: String,
    pub block_number: u64,
    /// `true` if execution succeeded (`status == 0x1`).
    pub status: bool,
    pub gas_used: u64,
    pub contract_address: Option<String>,
    pub logs: Vec<Log>,
}
