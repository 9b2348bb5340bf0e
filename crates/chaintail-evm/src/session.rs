//! The per-chain tailing loop.
//!
//! # Init
//! Resolve the chain ID, then the resume position: the persisted
//! `last_block_number + 1`, else the confirmed tip for a `latest` start, else
//! the literal starting block.
//!
//! # Polling
//! Ask the node for its head and compute `tip = head - depth`. While the
//! position is past the tip, sleep `backoff` and ask again.
//!
//! # Fetching / Delivering
//! For every block up to the tip: fetch the block and all its receipts
//! concurrently, hand them to the hook, then commit the block number.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chaintail_core::block::{Block, Receipt};
use chaintail_core::client::EthClient;
use chaintail_core::deferred::Deferred;
use chaintail_core::error::TailError;
use chaintail_core::hook::Hook;
use chaintail_core::offset::OffsetManager;
use chaintail_core::session::{Session, SessionBuilder, SessionState};
use chaintail_core::types::{Chain, StartingBlock};

/// Tails one EVM chain.
pub struct EthSession {
    chain: Chain,
    client: Arc<dyn EthClient>,
    hook: Arc<dyn Hook>,
    offsets: Arc<dyn OffsetManager>,
    state: SessionState,
    position: u64,
}

impl EthSession {
    pub fn new(
        chain: Chain,
        client: Arc<dyn EthClient>,
        hook: Arc<dyn Hook>,
        offsets: Arc<dyn OffsetManager>,
    ) -> Self {
        Self {
            chain,
            client,
            hook,
            offsets,
            state: SessionState::Init,
            position: 0,
        }
    }

    /// The chain being tailed; `chain_id` is filled in once initialised.
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Next block to process.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(chain = %self.chain.uuid, from = %self.state, to = %state, "session state");
            self.state = state;
        }
    }

    async fn init(&mut self) -> Result<(), TailError> {
        let chain_id = self.client.network(&self.chain.url).await?;
        self.chain.chain_id = Some(chain_id);

        self.position = match self.offsets.last_block_number(&self.chain).await? {
            Some(last) => last + 1,
            None => match self.chain.listener.starting_block {
                StartingBlock::Latest => self.tip().await?,
                StartingBlock::Number(n) => n,
            },
        };

        info!(
            chain = %self.chain.uuid,
            tenant_id = %self.chain.tenant_id,
            name = %self.chain.name,
            chain_id,
            position = self.position,
            "session initialised"
        );
        Ok(())
    }

    /// Highest block deep enough to be processed.
    async fn tip(&self) -> Result<u64, TailError> {
        let head = self.client.header_by_number(&self.chain.url, None).await?;
        Ok(head.number.saturating_sub(self.chain.listener.depth))
    }

    /// Fetch block `number` and its receipts. `None` if cancelled first.
    async fn fetch(
        &self,
        shutdown: &CancellationToken,
        number: u64,
    ) -> Result<Option<(Block, Vec<Receipt>)>, TailError> {
        let client = Arc::clone(&self.client);
        let endpoint = self.chain.url.clone();
        let block = Deferred::spawn(move || async move {
            client.block_by_number(&endpoint, number).await
        });

        let block = tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            block = block.recv() => block?,
        };

        let pending: Vec<Deferred<Receipt>> = block
            .tx_hashes()
            .map(|hash| {
                let client = Arc::clone(&self.client);
                let endpoint = self.chain.url.clone();
                let hash = hash.to_string();
                Deferred::spawn(move || async move {
                    client.transaction_receipt(&endpoint, &hash).await
                })
            })
            .collect();

        // Cells left in `pending` on an early return are dropped, which aborts
        // their producers.
        let mut receipts = Vec::with_capacity(pending.len());
        for cell in pending {
            let receipt = tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                receipt = cell.recv() => receipt?,
            };
            receipts.push(receipt);
        }

        Ok(Some((block, receipts)))
    }

    async fn deliver(&mut self, block: &Block, receipts: &[Receipt]) -> Result<(), TailError> {
        self.hook
            .after_new_block(&self.chain, block, receipts)
            .await?;

        self.offsets
            .set_last_block_number(&self.chain, self.position)
            .await?;

        if let Some(last) = receipts.last() {
            if let Err(e) = self
                .offsets
                .set_last_tx_index(&self.chain, self.position, last.tx_index)
                .await
            {
                warn!(
                    chain = %self.chain.uuid,
                    block = self.position,
                    error = %e,
                    "could not store last transaction index"
                );
            }
        }

        info!(
            chain = %self.chain.uuid,
            tenant_id = %self.chain.tenant_id,
            name = %self.chain.name,
            block = self.position,
            receipts = receipts.len(),
            "block delivered"
        );
        self.position += 1;
        Ok(())
    }

    async fn tail(&mut self, shutdown: &CancellationToken) -> Result<(), TailError> {
        self.set_state(SessionState::Init);
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = self.init() => res?,
        }

        loop {
            self.set_state(SessionState::Polling);
            let tip = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                tip = self.tip() => tip?,
            };

            if self.position > tip {
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(self.chain.listener.backoff()) => {}
                }
                continue;
            }

            while self.position <= tip {
                self.set_state(SessionState::Fetching);
                let Some((block, receipts)) = self.fetch(shutdown, self.position).await? else {
                    return Ok(());
                };
                if shutdown.is_cancelled() {
                    return Ok(());
                }

                // Not cancellable: a block handed to the hook is committed.
                self.set_state(SessionState::Delivering);
                self.deliver(&block, &receipts).await?;
            }
        }
    }
}

#[async_trait]
impl Session for EthSession {
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), TailError> {
        let res = self.tail(&shutdown).await;
        self.set_state(SessionState::Stopped);
        res
    }
}

// ─── EthSessionBuilder ────────────────────────────────────────────────────────

/// Builds [`EthSession`]s sharing one client, hook and offset manager.
pub struct EthSessionBuilder {
    client: Arc<dyn EthClient>,
    hook: Arc<dyn Hook>,
    offsets: Arc<dyn OffsetManager>,
}

impl EthSessionBuilder {
    pub fn new(
        client: Arc<dyn EthClient>,
        hook: Arc<dyn Hook>,
        offsets: Arc<dyn OffsetManager>,
    ) -> Self {
        Self {
            client,
            hook,
            offsets,
        }
    }
}

impl SessionBuilder for EthSessionBuilder {
    fn new_session(&self, chain: Chain) -> Result<Box<dyn Session>, TailError> {
        if chain.url.trim().is_empty() {
            return Err(TailError::Config(format!(
                "chain {} has no node URL",
                chain.uuid
            )));
        }
        Ok(Box::new(EthSession::new(
            chain,
            Arc::clone(&self.client),
            Arc::clone(&self.hook),
            Arc::clone(&self.offsets),
        )))
    }
}
