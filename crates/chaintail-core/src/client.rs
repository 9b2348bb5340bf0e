//! Read-only access to an Ethereum-compatible node.

use async_trait::async_trait;

use crate::block::{Block, Header, Receipt};
use crate::error::TailError;

/// Trait for reading chain data from a node.
///
/// Every call names the endpoint explicitly so a single client can serve all
/// chains. Objects the node does not know yet must be reported as
/// [`TailError::NotFound`], anything else as a hard failure.
#[async_trait]
pub trait EthClient: Send + Sync {
    /// Fetch a full block (with transactions) by number.
    async fn block_by_number(&self, endpoint: &str, number: u64) -> Result<Block, TailError>;

    /// Fetch a header by number; `None` asks for the current head.
    async fn header_by_number(
        &self,
        endpoint: &str,
        number: Option<u64>,
    ) -> Result<Header, TailError>;

    /// Fetch the receipt of a mined transaction.
    async fn transaction_receipt(&self, endpoint: &str, tx_hash: &str)
        -> Result<Receipt, TailError>;

    /// Resolve the network/chain ID served by the endpoint.
    async fn network(&self, endpoint: &str) -> Result<u64, TailError>;
}
