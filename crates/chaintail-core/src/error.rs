//! Error types for the chain-tailing pipeline.

use thiserror::Error;

/// Errors that can occur while tailing a chain.
#[derive(Debug, Clone, Error)]
pub enum TailError {
    #[error("RPC error: {0}")]
    Rpc(String),

    /// The node does not know the requested object (yet).
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Offset store error: {0}")]
    Offset(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Session for chain {chain} failed: {source}")]
    Session {
        chain: String,
        #[source]
        source: Box<TailError>,
    },

    #[error("Deferred producer exited without delivering a result")]
    DeferredDropped,

    #[error("{0}")]
    Other(String),
}

impl TailError {
    /// Shorthand for a [`TailError::NotFound`].
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Wrap `err` with the UUID of the chain whose session produced it.
    pub fn session(chain: impl Into<String>, err: TailError) -> Self {
        Self::Session {
            chain: chain.into(),
            source: Box::new(err),
        }
    }

    /// Returns `true` if the node reported the object as missing, e.g. a block
    /// that has not been mined yet.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Session { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}
