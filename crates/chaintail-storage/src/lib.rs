//! chaintail-storage: pluggable offset backends for ChainTail.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`registry`]: block position kept on the chain registry over HTTP
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)

pub mod memory;
pub mod registry;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryOffsetManager;
pub use registry::{ChainRegistryClient, HttpChainRegistry, RegistryOffsetManager};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOffsetManager;
