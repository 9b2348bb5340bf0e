//! In-memory offset backend.
//!
//! Keeps every offset in RAM. Useful for tests and for tailers that are happy
//! to restart from each chain's configured starting block.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use chaintail_core::error::TailError;
use chaintail_core::offset::{OffsetKey, OffsetManager};
use chaintail_core::types::Chain;

/// In-memory offset manager.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryOffsetManager {
    offsets: Mutex<HashMap<OffsetKey, u64>>,
}

impl InMemoryOffsetManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the last delivered block of `chain`, e.g. to resume a test run.
    pub fn with_last_block(self, chain: &Chain, block: u64) -> Self {
        self.offsets
            .lock()
            .unwrap()
            .insert(OffsetKey::last_block(chain), block);
        self
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.offsets.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: &OffsetKey) -> Option<u64> {
        self.offsets.lock().unwrap().get(key).copied()
    }
}

#[async_trait]
impl OffsetManager for InMemoryOffsetManager {
    async fn last_block_number(&self, chain: &Chain) -> Result<Option<u64>, TailError> {
        Ok(self.get(&OffsetKey::last_block(chain)))
    }

    async fn set_last_block_number(&self, chain: &Chain, block: u64) -> Result<(), TailError> {
        let mut offsets = self.offsets.lock().unwrap();
        let stored = offsets.entry(OffsetKey::last_block(chain)).or_insert(block);
        // Never move backwards.
        *stored = (*stored).max(block);
        Ok(())
    }

    async fn last_tx_index(&self, chain: &Chain, block: u64) -> Result<Option<u64>, TailError> {
        Ok(self.get(&OffsetKey::last_tx_index(chain, block)))
    }

    async fn set_last_tx_index(
        &self,
        chain: &Chain,
        block: u64,
        index: u64,
    ) -> Result<(), TailError> {
        let mut offsets = self.offsets.lock().unwrap();
        // Only the newest block's index is ever read back.
        offsets.retain(|key, _| !key.is_tx_index_before(chain, block));
        offsets.insert(OffsetKey::last_tx_index(chain, block), index);
        Ok(())
    }
}
