//! Session traits: one tailing loop per chain.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::TailError;
use crate::types::Chain;

/// A tailing loop for exactly one chain.
#[async_trait]
pub trait Session: Send {
    /// Run until `shutdown` is cancelled (returns `Ok`) or an unrecovered
    /// error occurs (returns `Err`).
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), TailError>;
}

/// Creates sessions for the session manager.
pub trait SessionBuilder: Send + Sync {
    fn new_session(&self, chain: Chain) -> Result<Box<dyn Session>, TailError>;
}

/// Lifecycle of a session.
///
/// `Init → Polling → (Fetching → Delivering → Polling)* → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Resolving the chain ID and the resume position.
    Init,
    /// Waiting for the chain tip to move past the next position.
    Polling,
    /// Fetching a block and its receipts.
    Fetching,
    /// Handing a block to the hook and committing its offset.
    Delivering,
    /// Terminated.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Polling => write!(f, "polling"),
            Self::Fetching => write!(f, "fetching"),
            Self::Delivering => write!(f, "delivering"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
