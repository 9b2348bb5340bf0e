//! chaintail-core: foundation for tailing many EVM chains at once.
//!
//! # Architecture
//!
//! ```text
//! Provider → SessionManager
//!               ├── compare_configuration (snapshot diff → START/STOP/UPDATE)
//!               ├── session registry      (one live session per chain UUID)
//!               └── Session per chain     (built by a SessionBuilder)
//!                      ├── EthClient      (blocks, headers, receipts)
//!                      ├── Deferred       (concurrent fetch cells)
//!                      ├── Hook           (downstream consumer)
//!                      └── OffsetManager  (resume position)
//! ```

pub mod block;
pub mod client;
pub mod command;
pub mod deferred;
pub mod error;
pub mod hook;
pub mod manager;
pub mod offset;
pub mod provider;
pub mod session;
pub mod types;

pub use block::{Block, Header, Log, Receipt, Transaction};
pub use client::EthClient;
pub use command::{compare_configuration, Command, CommandKind};
pub use deferred::Deferred;
pub use error::TailError;
pub use hook::Hook;
pub use manager::SessionManager;
pub use offset::{OffsetKey, OffsetKind, OffsetManager};
pub use provider::{Message, PollProvider, Poller, Provider, StaticProvider};
pub use session::{Session, SessionBuilder, SessionState};
pub use types::{Chain, Configuration, Listener, StartingBlock};
