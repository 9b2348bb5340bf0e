//! Downstream delivery of processed blocks.

use async_trait::async_trait;

use crate::block::{Block, Receipt};
use crate::error::TailError;
use crate::types::Chain;

/// Called once per processed block, in block order.
///
/// An error leaves the block uncommitted: the session stops and the block is
/// delivered again by the next session for the chain.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn after_new_block(
        &self,
        chain: &Chain,
        block: &Block,
        receipts: &[Receipt],
    ) -> Result<(), TailError>;
}
