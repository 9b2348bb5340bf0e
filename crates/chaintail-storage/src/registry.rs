//! Chain-registry backed offsets.
//!
//! The chain registry owns the list of chains and, through each chain's
//! `listener.currentBlock`, the last block the tailer delivered. Only the
//! block number lives there: transaction indexes are kept in process, so a
//! restart replays the whole last block.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use chaintail_core::error::TailError;
use chaintail_core::offset::{OffsetKey, OffsetManager};
use chaintail_core::types::Chain;

/// Read/write access to the chain registry.
#[async_trait]
pub trait ChainRegistryClient: Send + Sync {
    /// Fetch one chain by UUID.
    async fn chain(&self, uuid: &str) -> Result<Chain, TailError>;

    /// Fetch every registered chain.
    async fn chains(&self) -> Result<Vec<Chain>, TailError>;

    /// Last block recorded for the chain, if any.
    async fn block_position(&self, uuid: &str) -> Result<Option<u64>, TailError> {
        Ok(self.chain(uuid).await?.listener.current_block)
    }

    /// Record `block` as the chain's last delivered block.
    async fn update_block_position(&self, uuid: &str, block: u64) -> Result<(), TailError>;
}

// ─── HttpChainRegistry ────────────────────────────────────────────────────────

/// [`ChainRegistryClient`] speaking the registry's REST API.
///
/// - `GET {base}/chains`
/// - `GET {base}/chains/{uuid}`
/// - `PATCH {base}/chains/{uuid}` with `{"listener":{"currentBlock":n}}`
pub struct HttpChainRegistry {
    base_url: String,
    http: reqwest::Client,
}

impl HttpChainRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, reqwest::Client::new())
    }

    pub fn with_client(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check(resp: reqwest::Response, url: &str) -> Result<reqwest::Response, TailError> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TailError::not_found(url.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TailError::Other(format!(
                "chain registry {url} - HTTP {}: {body}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, TailError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TailError::Other(format!("chain registry {url}: {e}")))?;

        Self::check(resp, url)
            .await?
            .json::<T>()
            .await
            .map_err(|e| TailError::Other(format!("chain registry {url}: invalid body: {e}")))
    }
}

#[async_trait]
impl ChainRegistryClient for HttpChainRegistry {
    async fn chain(&self, uuid: &str) -> Result<Chain, TailError> {
        self.get_json(&format!("{}/chains/{uuid}", self.base_url)).await
    }

    async fn chains(&self) -> Result<Vec<Chain>, TailError> {
        self.get_json(&format!("{}/chains", self.base_url)).await
    }

    async fn update_block_position(&self, uuid: &str, block: u64) -> Result<(), TailError> {
        let url = format!("{}/chains/{uuid}", self.base_url);
        let resp = self
            .http
            .patch(&url)
            .json(&json!({ "listener": { "currentBlock": block } }))
            .send()
            .await
            .map_err(|e| TailError::Other(format!("chain registry {url}: {e}")))?;

        Self::check(resp, &url).await?;
        debug!(chain = %uuid, block, "block position updated");
        Ok(())
    }
}

// ─── RegistryOffsetManager ────────────────────────────────────────────────────

/// [`OffsetManager`] storing block positions on the chain registry.
pub struct RegistryOffsetManager<R> {
    registry: R,
    tx_indexes: Mutex<HashMap<OffsetKey, u64>>,
}

impl<R: ChainRegistryClient> RegistryOffsetManager<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            tx_indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }
}

fn offset_error(err: TailError) -> TailError {
    TailError::Offset(err.to_string())
}

#[async_trait]
impl<R: ChainRegistryClient> OffsetManager for RegistryOffsetManager<R> {
    async fn last_block_number(&self, chain: &Chain) -> Result<Option<u64>, TailError> {
        self.registry
            .block_position(&chain.uuid)
            .await
            .map_err(offset_error)
    }

    async fn set_last_block_number(&self, chain: &Chain, block: u64) -> Result<(), TailError> {
        if let Some(stored) = self.last_block_number(chain).await? {
            if block < stored {
                debug!(chain = %chain.uuid, block, stored, "ignoring stale block position");
                return Ok(());
            }
        }
        self.registry
            .update_block_position(&chain.uuid, block)
            .await
            .map_err(offset_error)
    }

    async fn last_tx_index(&self, chain: &Chain, block: u64) -> Result<Option<u64>, TailError> {
        Ok(self
            .tx_indexes
            .lock()
            .unwrap()
            .get(&OffsetKey::last_tx_index(chain, block))
            .copied())
    }

    async fn set_last_tx_index(
        &self,
        chain: &Chain,
        block: u64,
        index: u64,
    ) -> Result<(), TailError> {
        let mut tx_indexes = self.tx_indexes.lock().unwrap();
        tx_indexes.retain(|key, _| !key.is_tx_index_before(chain, block));
        tx_indexes.insert(OffsetKey::last_tx_index(chain, block), index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Registry kept in a map, counting writes.
    #[derive(Default)]
    struct FakeRegistry {
        positions: Mutex<HashMap<String, Option<u64>>>,
        writes: Mutex<Vec<(String, u64)>>,
    }

    impl FakeRegistry {
        fn with_chain(self, uuid: &str, position: Option<u64>) -> Self {
            self.positions.lock().unwrap().insert(uuid.into(), position);
            self
        }
    }

    #[async_trait]
    impl ChainRegistryClient for FakeRegistry {
        async fn chain(&self, uuid: &str) -> Result<Chain, TailError> {
            let position = self
                .positions
                .lock()
                .unwrap()
                .get(uuid)
                .copied()
                .ok_or_else(|| TailError::not_found(uuid))?;
            let mut chain = Chain::new(uuid, "http://node");
            chain.listener.current_block = position;
            Ok(chain)
        }

        async fn chains(&self) -> Result<Vec<Chain>, TailError> {
            unimplemented!()
        }

        async fn update_block_position(&self, uuid: &str, block: u64) -> Result<(), TailError> {
            self.positions
                .lock()
                .unwrap()
                .insert(uuid.into(), Some(block));
            self.writes.lock().unwrap().push((uuid.into(), block));
            Ok(())
        }
    }

    #[tokio::test]
    async fn block_position_goes_through_registry() {
        let offsets = RegistryOffsetManager::new(FakeRegistry::default().with_chain("c1", None));
        let chain = Chain::new("c1", "http://node");

        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), None);
        offsets.set_last_block_number(&chain, 40).await.unwrap();
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), Some(40));
        assert_eq!(
            *offsets.registry().writes.lock().unwrap(),
            vec![("c1".to_string(), 40)]
        );
    }

    #[tokio::test]
    async fn stale_block_position_is_not_written() {
        let offsets =
            RegistryOffsetManager::new(FakeRegistry::default().with_chain("c1", Some(50)));
        let chain = Chain::new("c1", "http://node");

        offsets.set_last_block_number(&chain, 49).await.unwrap();
        assert_eq!(offsets.last_block_number(&chain).await.unwrap(), Some(50));
        assert!(offsets.registry().writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_chain_is_an_offset_error() {
        let offsets = RegistryOffsetManager::new(FakeRegistry::default());
        let chain = Chain::new("ghost", "http://node");
        let err = offsets.last_block_number(&chain).await.unwrap_err();
        assert!(matches!(err, TailError::Offset(_)));
    }

    #[tokio::test]
    async fn tx_index_stays_in_process() {
        let offsets = RegistryOffsetManager::new(FakeRegistry::default().with_chain("c1", None));
        let chain = Chain::new("c1", "http://node");

        assert_eq!(offsets.last_tx_index(&chain, 3).await.unwrap(), None);
        offsets.set_last_tx_index(&chain, 3, 8).await.unwrap();
        assert_eq!(offsets.last_tx_index(&chain, 3).await.unwrap(), Some(8));
        assert!(offsets.registry().writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_newest_tx_index_is_kept_per_chain() {
        let offsets = RegistryOffsetManager::new(FakeRegistry::default());
        let c1 = Chain::new("c1", "http://node");
        let c2 = Chain::new("c2", "http://node");

        for block in 1..=300 {
            offsets.set_last_tx_index(&c1, block, 2).await.unwrap();
        }
        offsets.set_last_tx_index(&c2, 4, 1).await.unwrap();

        assert_eq!(offsets.tx_indexes.lock().unwrap().len(), 2);
        assert_eq!(offsets.last_tx_index(&c1, 299).await.unwrap(), None);
        assert_eq!(offsets.last_tx_index(&c1, 300).await.unwrap(), Some(2));
        assert_eq!(offsets.last_tx_index(&c2, 4).await.unwrap(), Some(1));
    }

    // ─── HTTP ─────────────────────────────────────────────────────────────────

    /// Serve a single HTTP response and hand back the raw request.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length || n == 0 {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\n\
                 Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    #[tokio::test]
    async fn http_chains_parses_registry_payload() {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"uuid":"c1","tenantId":"t1","name":"mainnet","url":"http://geth:8545",
                 "listener":{"startingBlock":"latest","currentBlock":17,"depth":2}}]"#,
        )
        .await;

        let chains = HttpChainRegistry::new(format!("{url}/")).chains().await.unwrap();
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].uuid, "c1");
        assert_eq!(chains[0].tenant_id, "t1");
        assert_eq!(chains[0].listener.current_block, Some(17));
        assert_eq!(chains[0].listener.depth, 2);

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /chains HTTP/1.1"));
    }

    #[tokio::test]
    async fn http_update_block_position_patches_listener() {
        let (url, server) = serve_once("200 OK", "{}").await;

        HttpChainRegistry::new(url)
            .update_block_position("c1", 42)
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("PATCH /chains/c1 HTTP/1.1"));
        assert!(request.ends_with(r#"{"listener":{"currentBlock":42}}"#));
    }

    #[tokio::test]
    async fn http_missing_chain_is_not_found() {
        let (url, _server) = serve_once("404 Not Found", "").await;
        let err = HttpChainRegistry::new(url).chain("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
