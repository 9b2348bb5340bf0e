//! Scripted node, recording hook and configuration source shared by the
//! integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;

use chaintail_core::{
    Block, Chain, Configuration, EthClient, Header, Hook, OffsetManager, Poller, Receipt, TailError,
    Transaction,
};

// ─── MockNode ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct NodeState {
    blocks: Vec<Block>,
    receipts: HashMap<String, Receipt>,
    failing_receipts: HashSet<String>,
    gates: HashMap<String, Arc<Barrier>>,
    receipt_calls: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory chain: genesis plus whatever the test mines.
pub struct MockNode {
    chain_id: u64,
    state: Mutex<NodeState>,
}

impl MockNode {
    /// A node whose head is `head`, every block carrying one transaction.
    pub fn with_head(head: u64) -> Arc<Self> {
        let node = Arc::new(Self {
            chain_id: 1337,
            state: Mutex::new(NodeState::default()),
        });
        node.mine(0);
        for _ in 0..head {
            node.mine(1);
        }
        node
    }

    /// Append a block with `txs` transactions; returns its number.
    pub fn mine(&self, txs: usize) -> u64 {
        let mut state = self.state.lock().unwrap();
        let number = state.blocks.len() as u64;
        let hash = format!("0x{number:064x}");
        let parent_hash = state
            .blocks
            .last()
            .map(|b| b.header.hash.clone())
            .unwrap_or_else(|| format!("0x{:064x}", 0));

        let transactions: Vec<Transaction> = (0..txs)
            .map(|i| Transaction {
                hash: format!("0x{number:032x}{i:032x}"),
                from: "0x00000000000000000000000000000000000000aa".into(),
                to: Some("0x00000000000000000000000000000000000000bb".into()),
                nonce: i as u64,
                value: "0x0".into(),
                gas: 21_000,
                input: "0x".into(),
            })
            .collect();

        for (i, tx) in transactions.iter().enumerate() {
            state.receipts.insert(
                tx.hash.clone(),
                Receipt {
                    tx_hash: tx.hash.clone(),
                    tx_index: i as u64,
                    block_hash: hash.clone(),
                    block_number: number,
                    status: true,
                    gas_used: 21_000,
                    contract_address: None,
                    logs: vec![],
                },
            );
        }

        state.blocks.push(Block {
            header: Header {
                number,
                hash,
                parent_hash,
                timestamp: 1_700_000_000 + number * 12,
            },
            transactions,
        });
        number
    }

    pub fn head(&self) -> u64 {
        self.state.lock().unwrap().blocks.len() as u64 - 1
    }

    /// Make the receipt of every transaction in `block` fail.
    pub fn fail_receipts_of(&self, block: u64) {
        let mut state = self.state.lock().unwrap();
        let hashes: Vec<String> = state.blocks[block as usize]
            .tx_hashes()
            .map(str::to_string)
            .collect();
        state.failing_receipts.extend(hashes);
    }

    /// Hold every receipt of `block` until all of them have been requested.
    /// A receipt still waiting after half a second fails.
    pub fn gate_receipts_of(&self, block: u64) {
        let mut state = self.state.lock().unwrap();
        let hashes: Vec<String> = state.blocks[block as usize]
            .tx_hashes()
            .map(str::to_string)
            .collect();
        let gate = Arc::new(Barrier::new(hashes.len()));
        for hash in hashes {
            state.gates.insert(hash, Arc::clone(&gate));
        }
    }

    pub fn receipt_calls(&self) -> usize {
        self.state.lock().unwrap().receipt_calls
    }

    /// Most receipt requests ever served at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }
}

#[async_trait]
impl EthClient for MockNode {
    async fn block_by_number(&self, _: &str, number: u64) -> Result<Block, TailError> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(number as usize)
            .cloned()
            .ok_or_else(|| TailError::not_found(format!("block {number}")))
    }

    async fn header_by_number(&self, _: &str, number: Option<u64>) -> Result<Header, TailError> {
        let state = self.state.lock().unwrap();
        let block = match number {
            Some(n) => state.blocks.get(n as usize),
            None => state.blocks.last(),
        };
        block
            .map(|b| b.header.clone())
            .ok_or_else(|| TailError::not_found("header"))
    }

    async fn transaction_receipt(&self, _: &str, tx_hash: &str) -> Result<Receipt, TailError> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            state.gates.get(tx_hash).cloned()
        };
        if let Some(gate) = gate {
            if tokio::time::timeout(Duration::from_millis(500), gate.wait())
                .await
                .is_err()
            {
                self.state.lock().unwrap().in_flight -= 1;
                return Err(TailError::Rpc(format!("receipt {tx_hash}: timed out")));
            }
        }

        // Let receipts of the same block resolve out of order.
        tokio::time::sleep(Duration::from_millis(
            (tx_hash.len() as u64 + tx_hash.as_bytes()[tx_hash.len() - 1] as u64) % 7,
        ))
        .await;

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        state.receipt_calls += 1;
        if state.failing_receipts.contains(tx_hash) {
            return Err(TailError::Rpc(format!("receipt {tx_hash}: connection reset")));
        }
        state
            .receipts
            .get(tx_hash)
            .cloned()
            .ok_or_else(|| TailError::not_found(format!("receipt {tx_hash}")))
    }

    async fn network(&self, _: &str) -> Result<u64, TailError> {
        Ok(self.chain_id)
    }
}

// ─── RecordingHook ────────────────────────────────────────────────────────────

/// One hook invocation.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub chain: String,
    pub chain_id: Option<u64>,
    pub block: u64,
    pub tx_hashes: Vec<String>,
    pub receipt_hashes: Vec<String>,
}

/// Records deliveries; optionally fails on one block number.
#[derive(Default)]
pub struct RecordingHook {
    deliveries: Mutex<Vec<Delivery>>,
    fail_at: Mutex<Option<u64>>,
}

impl RecordingHook {
    pub fn failing_at(block: u64) -> Arc<Self> {
        let hook = Self::default();
        *hook.fail_at.lock().unwrap() = Some(block);
        Arc::new(hook)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn blocks(&self, chain: &str) -> Vec<u64> {
        self.deliveries()
            .into_iter()
            .filter(|d| d.chain == chain)
            .map(|d| d.block)
            .collect()
    }
}

#[async_trait]
impl Hook for RecordingHook {
    async fn after_new_block(
        &self,
        chain: &Chain,
        block: &Block,
        receipts: &[Receipt],
    ) -> Result<(), TailError> {
        if *self.fail_at.lock().unwrap() == Some(block.number()) {
            return Err(TailError::Hook(format!("broker rejected block {}", block.number())));
        }
        self.deliveries.lock().unwrap().push(Delivery {
            chain: chain.uuid.clone(),
            chain_id: chain.chain_id,
            block: block.number(),
            tx_hashes: block.tx_hashes().map(str::to_string).collect(),
            receipt_hashes: receipts.iter().map(|r| r.tx_hash.clone()).collect(),
        });
        Ok(())
    }
}

// ─── SharedConfig ─────────────────────────────────────────────────────────────

/// A configuration the test can swap while a `PollProvider` polls it.
#[derive(Clone, Default)]
pub struct SharedConfig(Arc<Mutex<Configuration>>);

impl SharedConfig {
    pub fn set(&self, configuration: Configuration) {
        *self.0.lock().unwrap() = configuration;
    }
}

#[async_trait]
impl Poller for SharedConfig {
    async fn poll(&self) -> Result<Configuration, TailError> {
        Ok(self.0.lock().unwrap().clone())
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// Wait until `check` holds, failing the test after two seconds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until `offsets` reports `block` as the last block of `chain`.
pub async fn wait_for_offset(offsets: &dyn OffsetManager, chain: &Chain, block: u64) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while offsets.last_block_number(chain).await.unwrap() != Some(block) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("offset not reached in time");
}
