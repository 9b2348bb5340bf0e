//! Configuration providers: sources of full chain snapshots.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TailError;
use crate::types::Configuration;

/// A full replacement snapshot emitted by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    provider_name: String,
    configuration: Configuration,
}

impl Message {
    pub fn new(provider_name: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            provider_name: provider_name.into(),
            configuration,
        }
    }

    pub fn provider_name(&self) -> &str {
        &self.provider_name
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn into_configuration(self) -> Configuration {
        self.configuration
    }
}

/// Trait for sources of chain configuration.
///
/// `run` pushes snapshots into `out` until `shutdown` is cancelled or the
/// source fails. The session manager treats the return of `run` (with or
/// without error) as the end of the configuration stream.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn run(
        &self,
        shutdown: CancellationToken,
        out: mpsc::Sender<Message>,
    ) -> Result<(), TailError>;
}

/// Send `msg`, giving up if `shutdown` fires first or the receiver is gone.
/// Returns `false` when the provider should stop.
async fn emit(shutdown: &CancellationToken, out: &mpsc::Sender<Message>, msg: Message) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        res = out.send(msg) => res.is_ok(),
    }
}

// ─── StaticProvider ───────────────────────────────────────────────────────────

/// Emits a single fixed snapshot, then idles until shutdown.
pub struct StaticProvider {
    message: Message,
}

impl StaticProvider {
    pub fn new(name: impl Into<String>, configuration: Configuration) -> Self {
        Self {
            message: Message::new(name, configuration),
        }
    }
}

#[async_trait]
impl Provider for StaticProvider {
    async fn run(
        &self,
        shutdown: CancellationToken,
        out: mpsc::Sender<Message>,
    ) -> Result<(), TailError> {
        if emit(&shutdown, &out, self.message.clone()).await {
            shutdown.cancelled().await;
        }
        Ok(())
    }
}

// ─── PollProvider ─────────────────────────────────────────────────────────────

/// Something that can produce a configuration snapshot on demand.
#[async_trait]
pub trait Poller: Send + Sync {
    async fn poll(&self) -> Result<Configuration, TailError>;
}

/// Polls a [`Poller`] every `refresh` and emits each snapshot.
///
/// A failed poll is logged and retried on the next tick; it does not end the
/// stream.
pub struct PollProvider<P> {
    name: String,
    poller: P,
    refresh: Duration,
}

impl<P: Poller> PollProvider<P> {
    pub fn new(name: impl Into<String>, poller: P, refresh: Duration) -> Self {
        Self {
            name: name.into(),
            poller,
            refresh,
        }
    }
}

#[async_trait]
impl<P: Poller> Provider for PollProvider<P> {
    async fn run(
        &self,
        shutdown: CancellationToken,
        out: mpsc::Sender<Message>,
    ) -> Result<(), TailError> {
        loop {
            match self.poller.poll().await {
                Ok(configuration) => {
                    debug!(
                        provider = %self.name,
                        chains = configuration.len(),
                        "polled configuration"
                    );
                    let msg = Message::new(self.name.clone(), configuration);
                    if !emit(&shutdown, &out, msg).await {
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!(provider = %self.name, error = %e, "configuration poll failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.refresh) => {}
            }
        }
    }
}
