//! Hook used by the binary: logs every block, optionally printing it as a
//! JSON line on stdout for downstream tooling.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use chaintail_core::{Block, Chain, Hook, Receipt, TailError};

pub struct LogHook {
    json_output: bool,
}

impl LogHook {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }
}

/// One block as printed with `--json-output`.
pub fn block_record(chain: &Chain, block: &Block, receipts: &[Receipt]) -> Value {
    json!({
        "chain": chain.uuid,
        "tenantId": chain.tenant_id,
        "name": chain.name,
        "chainId": chain.chain_id,
        "number": block.number(),
        "hash": block.hash(),
        "parentHash": block.header.parent_hash,
        "timestamp": block.header.timestamp,
        "receipts": receipts,
    })
}

#[async_trait]
impl Hook for LogHook {
    async fn after_new_block(
        &self,
        chain: &Chain,
        block: &Block,
        receipts: &[Receipt],
    ) -> Result<(), TailError> {
        let failed = receipts.iter().filter(|r| !r.status).count();
        info!(
            chain = %chain.uuid,
            tenant_id = %chain.tenant_id,
            name = %chain.name,
            block = block.number(),
            hash = %block.hash(),
            txs = receipts.len(),
            failed,
            "new block"
        );

        if self.json_output {
            let line = serde_json::to_string(&block_record(chain, block, receipts))
                .map_err(|e| TailError::Hook(e.to_string()))?;
            println!("{line}");
        }
        Ok(())
    }
}
