//! Configuration file of the `chaintail` binary.
//!
//! ```json
//! {
//!   "log": { "level": "info", "json": false },
//!   "refresh_ms": 5000,
//!   "offsets": { "backend": "sqlite", "path": "./offsets.db" },
//!   "chains": [
//!     { "uuid": "c1", "url": "http://localhost:8545",
//!       "listener": { "startingBlock": "latest", "depth": 2 } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use chaintail_core::{Chain, Configuration};

use crate::logging::LogConfig;

/// Where delivery offsets are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetBackend {
    #[default]
    Memory,
    Sqlite,
    Registry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetsConfig {
    #[serde(default)]
    pub backend: OffsetBackend,
    /// SQLite database path (`sqlite` backend).
    #[serde(default = "default_sqlite_path")]
    pub path: String,
    /// Chain registry URL (`registry` backend); defaults to `registry_url`.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_sqlite_path() -> String {
    "./chaintail.db".to_string()
}

impl Default for OffsetsConfig {
    fn default() -> Self {
        Self {
            backend: OffsetBackend::Memory,
            path: default_sqlite_path(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub log: LogConfig,
    /// How often the chain source is re-read (milliseconds).
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
    #[serde(default)]
    pub offsets: OffsetsConfig,
    /// Poll chains from this registry instead of `chains`.
    #[serde(default)]
    pub registry_url: Option<String>,
    #[serde(default)]
    pub chains: Vec<Chain>,
}

fn default_refresh_ms() -> u64 {
    5_000
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reject configurations the tailer cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_ms == 0 {
            bail!("refresh_ms must be greater than zero");
        }
        if self.offsets.backend == OffsetBackend::Registry
            && self.registry_offsets_url().is_none()
        {
            bail!("offsets backend \"registry\" needs offsets.url or registry_url");
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.uuid.trim().is_empty() {
                bail!("chain without uuid");
            }
            if !seen.insert(chain.uuid.as_str()) {
                bail!("duplicate chain uuid {}", chain.uuid);
            }
            if chain.url.trim().is_empty() {
                bail!("chain {} has no url", chain.uuid);
            }
            if chain.listener.backoff_ms == 0 {
                bail!("chain {} has backoffMs 0", chain.uuid);
            }
        }
        Ok(())
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }

    pub fn registry_offsets_url(&self) -> Option<&str> {
        self.offsets
            .url
            .as_deref()
            .or(self.registry_url.as_deref())
    }

    /// The chains of the file as a snapshot.
    pub fn configuration(&self) -> Configuration {
        self.chains.iter().cloned().collect()
    }
}
