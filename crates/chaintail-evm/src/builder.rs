//! Fluent builder API for chain definitions.
//!
//! # Example
//!
//! ```rust,no_run
//! use chaintail_evm::ChainBuilder;
//!
//! let chain = ChainBuilder::new("2b5d0a6e", "http://localhost:8545")
//!     .tenant("acme")
//!     .name("mainnet")
//!     .from_block(19_000_000)
//!     .confirmation_depth(12)
//!     .backoff_ms(2_000)
//!     .build();
//! ```

use chaintail_core::types::{Chain, StartingBlock};

/// Fluent builder for [`Chain`].
pub struct ChainBuilder {
    chain: Chain,
}

impl ChainBuilder {
    pub fn new(uuid: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            chain: Chain::new(uuid, url),
        }
    }

    /// Set the owning tenant.
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.chain.tenant_id = tenant_id.into();
        self
    }

    /// Set the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.chain.name = name.into();
        self
    }

    /// Start at a literal block when no offset is stored.
    pub fn from_block(mut self, block: u64) -> Self {
        self.chain.listener.starting_block = StartingBlock::Number(block);
        self
    }

    /// Start at the confirmed tip when no offset is stored (default).
    pub fn from_latest(mut self) -> Self {
        self.chain.listener.starting_block = StartingBlock::Latest;
        self
    }

    /// Set confirmation depth (blocks behind head before processing).
    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.chain.listener.depth = depth;
        self
    }

    /// Set the sleep between tip polls once caught up, in milliseconds.
    pub fn backoff_ms(mut self, ms: u64) -> Self {
        self.chain.listener.backoff_ms = ms;
        self
    }

    pub fn external_tx_enabled(mut self, enabled: bool) -> Self {
        self.chain.listener.external_tx_enabled = enabled;
        self
    }

    pub fn build(self) -> Chain {
        self.chain
    }
}
