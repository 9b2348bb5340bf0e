//! chaintail-evm: EVM tailing session and JSON-RPC client.

pub mod builder;
pub mod rpc;
pub mod session;

pub use builder::ChainBuilder;
pub use rpc::JsonRpcEthClient;
pub use session::{EthSession, EthSessionBuilder};
