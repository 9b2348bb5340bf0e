//! Offset manager: persists how far each chain has been delivered.
//!
//! The last block number is the durable resume point: a session restarts at
//! `last_block_number + 1`. The last transaction index inside a block is
//! best effort; backends that cannot persist it only keep it in process, so
//! after a restart the whole block is delivered again (at-least-once,
//! block-granular).

use std::fmt;

use async_trait::async_trait;

use crate::error::TailError;
use crate::types::Chain;

/// Trait for storing and loading per-chain delivery offsets.
///
/// Implementations include `InMemoryOffsetManager`, `RegistryOffsetManager`
/// and `SqliteOffsetManager` (in `chaintail-storage`). Values that were never
/// stored are reported as `Ok(None)`.
#[async_trait]
pub trait OffsetManager: Send + Sync {
    /// Last block fully delivered for `chain`.
    async fn last_block_number(&self, chain: &Chain) -> Result<Option<u64>, TailError>;

    /// Record `block` as fully delivered for `chain`.
    async fn set_last_block_number(&self, chain: &Chain, block: u64) -> Result<(), TailError>;

    /// Last transaction index delivered inside `block`.
    async fn last_tx_index(&self, chain: &Chain, block: u64) -> Result<Option<u64>, TailError>;

    /// Record `index` as the last transaction delivered inside `block`.
    async fn set_last_tx_index(
        &self,
        chain: &Chain,
        block: u64,
        index: u64,
    ) -> Result<(), TailError>;
}

/// What an offset entry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OffsetKind {
    LastBlock,
    LastTxIndex,
}

impl OffsetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LastBlock => "last_block",
            Self::LastTxIndex => "last_tx_index",
        }
    }
}

impl fmt::Display for OffsetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of a single offset entry: `(chain, kind[, block])`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OffsetKey {
    pub chain_uuid: String,
    pub kind: OffsetKind,
    /// Only set for [`OffsetKind::LastTxIndex`].
    pub block: Option<u64>,
}

impl OffsetKey {
    pub fn last_block(chain: &Chain) -> Self {
        Self {
            chain_uuid: chain.uuid.clone(),
            kind: OffsetKind::LastBlock,
            block: None,
        }
    }

    pub fn last_tx_index(chain: &Chain, block: u64) -> Self {
        Self {
            chain_uuid: chain.uuid.clone(),
            kind: OffsetKind::LastTxIndex,
            block: Some(block),
        }
    }

    /// True for a transaction index of `chain` stored under a block older
    /// than `block`.
    pub fn is_tx_index_before(&self, chain: &Chain, block: u64) -> bool {
        self.kind == OffsetKind::LastTxIndex
            && self.chain_uuid == chain.uuid
            && self.block.is_some_and(|b| b < block)
    }
}

impl fmt::Display for OffsetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(block) => write!(f, "{}:{}:{}", self.chain_uuid, self.kind, block),
            None => write!(f, "{}:{}", self.chain_uuid, self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_scoped_by_chain_kind_and_block() {
        let chain = Chain::new("c1", "http://node");
        assert_eq!(OffsetKey::last_block(&chain).to_string(), "c1:last_block");
        assert_eq!(
            OffsetKey::last_tx_index(&chain, 12).to_string(),
            "c1:last_tx_index:12"
        );
        assert_ne!(
            OffsetKey::last_tx_index(&chain, 12),
            OffsetKey::last_tx_index(&chain, 13)
        );
    }

    #[test]
    fn older_tx_index_detection() {
        let c1 = Chain::new("c1", "http://node");
        let c2 = Chain::new("c2", "http://node");
        let key = OffsetKey::last_tx_index(&c1, 12);

        assert!(key.is_tx_index_before(&c1, 13));
        assert!(!key.is_tx_index_before(&c1, 12));
        assert!(!key.is_tx_index_before(&c2, 13));
        assert!(!OffsetKey::last_block(&c1).is_tx_index_before(&c1, 13));
    }
}
