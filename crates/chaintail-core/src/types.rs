//! Chain model shared by the configuration differ, the session manager and
//! every session.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TailError;

// ─── StartingBlock ────────────────────────────────────────────────────────────

/// Where a chain without a persisted offset starts tailing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum StartingBlock {
    /// Start at the current (confirmed) chain tip.
    #[default]
    Latest,
    /// Start at a literal block number.
    Number(u64),
}

impl FromStr for StartingBlock {
    type Err = TailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "latest" => Ok(Self::Latest),
            "oldest" | "genesis" | "earliest" => Ok(Self::Number(0)),
            other => other
                .parse::<u64>()
                .map(Self::Number)
                .map_err(|_| TailError::Config(format!("invalid starting block '{s}'"))),
        }
    }
}

impl fmt::Display for StartingBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for StartingBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Latest => serializer.serialize_str("latest"),
            Self::Number(n) => serializer.serialize_u64(*n),
        }
    }
}

impl<'de> Deserialize<'de> for StartingBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Self::Number(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// ─── Listener ─────────────────────────────────────────────────────────────────

/// Per-chain tailing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// Start position used when no offset has been persisted yet.
    #[serde(default)]
    pub starting_block: StartingBlock,
    /// Last block the registry reports as processed. Progress, not settings.
    #[serde(default)]
    pub current_block: Option<u64>,
    /// Confirmation depth: blocks closer than this to the head are not processed.
    #[serde(default)]
    pub depth: u64,
    /// Sleep between tip polls once the session has caught up (milliseconds).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    /// Whether receipts of transactions not sent through the platform are of
    /// interest to the hook. The session fetches every receipt regardless and
    /// only passes this flag on through `Chain`; hooks do the filtering.
    #[serde(default)]
    pub external_tx_enabled: bool,
}

fn default_backoff_ms() -> u64 {
    1_000
}

/// Shortest sleep between tip polls, whatever `backoff_ms` says.
pub const MIN_BACKOFF_MS: u64 = 10;

impl Listener {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms.max(MIN_BACKOFF_MS))
    }
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            starting_block: StartingBlock::Latest,
            current_block: None,
            depth: 0,
            backoff_ms: default_backoff_ms(),
            external_tx_enabled: false,
        }
    }
}

/// `current_block` is written back by the tailer itself through the chain
/// registry; comparing it would turn every committed block into an UPDATE.
impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.starting_block == other.starting_block
            && self.depth == other.depth
            && self.backoff_ms == other.backoff_ms
            && self.external_tx_enabled == other.external_tx_enabled
    }
}

impl Eq for Listener {}

// ─── Chain ────────────────────────────────────────────────────────────────────

/// A chain the platform tails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    /// Registry identifier; the key of every per-chain structure.
    pub uuid: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub name: String,
    /// JSON-RPC endpoint of the node.
    pub url: String,
    /// Network/chain ID; resolved from the node when a session starts.
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub listener: Listener,
}

impl Chain {
    pub fn new(uuid: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            tenant_id: String::new(),
            name: String::new(),
            url: url.into(),
            chain_id: None,
            listener: Listener::default(),
        }
    }
}

// ─── Configuration ────────────────────────────────────────────────────────────

/// A full snapshot of the chains to tail, keyed by chain UUID.
///
/// Ordered so that anything derived from it (diff commands, logs) is
/// reproducible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    pub chains: BTreeMap<String, Chain>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a chain.
    pub fn insert(&mut self, chain: Chain) {
        self.chains.insert(chain.uuid.clone(), chain);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_chain(mut self, chain: Chain) -> Self {
        self.insert(chain);
        self
    }

    pub fn get(&self, uuid: &str) -> Option<&Chain> {
        self.chains.get(uuid)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}

impl FromIterator<Chain> for Configuration {
    fn from_iter<I: IntoIterator<Item = Chain>>(iter: I) -> Self {
        let mut cfg = Self::new();
        for chain in iter {
            cfg.insert(chain);
        }
        cfg
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
