//! Chain sources for the binary: the config file itself, or the registry.

use std::path::PathBuf;

use async_trait::async_trait;

use chaintail_core::{Configuration, Poller, TailError};
use chaintail_storage::ChainRegistryClient;

use crate::config::FileConfig;

/// Re-reads the `chains` list of the config file, so edits are picked up
/// without a restart.
pub struct FilePoller {
    path: PathBuf,
}

impl FilePoller {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Poller for FilePoller {
    async fn poll(&self) -> Result<Configuration, TailError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| TailError::Provider(format!("{}: {e}", self.path.display())))?;
        let file = FileConfig::from_json(&raw)
            .map_err(|e| TailError::Provider(format!("{}: {e}", self.path.display())))?;
        file.validate()
            .map_err(|e| TailError::Provider(format!("{}: {e}", self.path.display())))?;
        Ok(file.configuration())
    }
}

/// Lists every chain of the registry.
pub struct RegistryPoller<R> {
    registry: R,
}

impl<R: ChainRegistryClient> RegistryPoller<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl<R: ChainRegistryClient> Poller for RegistryPoller<R> {
    async fn poll(&self) -> Result<Configuration, TailError> {
        let chains = self
            .registry
            .chains()
            .await
            .map_err(|e| TailError::Provider(e.to_string()))?;
        Ok(chains.into_iter().collect())
    }
}
