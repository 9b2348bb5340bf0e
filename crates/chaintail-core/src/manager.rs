//! Session manager: keeps one session per configured chain.
//!
//! # Architecture
//!
//! ```text
//! Provider ──Message──▶ configuration loop ──Command──▶ command loop
//!                         (diff vs. last snapshot)        ├── START  → build, register, spawn
//!                                                         ├── STOP   → cancel registered session
//!                                                         └── UPDATE → STOP, wait, START
//! ```
//!
//! The three loops run concurrently inside [`SessionManager::run`] and must
//! all exit before it returns. Every command is acknowledged by the command
//! loop once applied, so a diff is fully applied before the next snapshot is
//! looked at.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::command::{compare_configuration, Command, CommandKind};
use crate::error::TailError;
use crate::provider::{Message, Provider};
use crate::session::SessionBuilder;
use crate::types::{Chain, Configuration};

/// Capacity of the channel on which session failures are reported.
pub const ERROR_CHANNEL_CAPACITY: usize = 128;

/// A registered session: how to stop it and how to know it has stopped.
#[derive(Clone)]
struct RegisteredSession {
    /// Distinguishes successive sessions of the same chain.
    id: u64,
    cancel: CancellationToken,
    finished: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<String, RegisteredSession>>>;

/// Removes a session from the registry when its task ends, panics included.
struct Registration {
    registry: Registry,
    uuid: String,
    id: u64,
    finished: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut sessions = self.registry.lock().unwrap();
        if sessions.get(&self.uuid).map(|s| s.id) == Some(self.id) {
            sessions.remove(&self.uuid);
        }
        drop(sessions);
        self.finished.cancel();
    }
}

/// A command plus the acknowledgement sent once it has been applied.
struct Dispatch {
    command: Command,
    applied: oneshot::Sender<()>,
}

/// Owns the running sessions and reconciles them with the provider's
/// snapshots.
pub struct SessionManager {
    builder: Arc<dyn SessionBuilder>,
    provider: Arc<dyn Provider>,
    sessions: Registry,
    next_id: AtomicU64,
    errors_tx: mpsc::Sender<TailError>,
    errors_rx: Mutex<Option<mpsc::Receiver<TailError>>>,
}

impl SessionManager {
    pub fn new(builder: Arc<dyn SessionBuilder>, provider: Arc<dyn Provider>) -> Self {
        Self::with_error_capacity(builder, provider, ERROR_CHANNEL_CAPACITY)
    }

    pub fn with_error_capacity(
        builder: Arc<dyn SessionBuilder>,
        provider: Arc<dyn Provider>,
        capacity: usize,
    ) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(capacity.max(1));
        Self {
            builder,
            provider,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        }
    }

    /// Receiver of session failures, each wrapped in [`TailError::Session`].
    ///
    /// Handed out once; later calls return `None`. Failures are dropped (with
    /// a warning) while the channel is full.
    pub fn errors(&self) -> Option<mpsc::Receiver<TailError>> {
        self.errors_rx.lock().unwrap().take()
    }

    /// UUIDs of the chains that currently have a registered session.
    pub fn active_sessions(&self) -> Vec<String> {
        let mut uuids: Vec<_> = self.sessions.lock().unwrap().keys().cloned().collect();
        uuids.sort();
        uuids
    }

    /// Run until `shutdown` is cancelled or the provider terminates.
    ///
    /// On return every session has been cancelled and awaited. The provider's
    /// error, if any, is returned.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), TailError> {
        let pipeline = shutdown.child_token();
        let (msg_tx, msg_rx) = mpsc::channel(1);
        let (cmd_tx, cmd_rx) = mpsc::channel(1);

        let (provider_result, (), mut sessions) = tokio::join!(
            self.listen_provider(pipeline.clone(), msg_tx),
            self.listen_configuration(&pipeline, msg_rx, cmd_tx),
            self.listen_commands(&pipeline, cmd_rx),
        );

        pipeline.cancel();
        debug!(sessions = sessions.len(), "waiting for sessions to stop");
        while let Some(res) = sessions.join_next().await {
            log_join(res);
        }

        if shutdown.is_cancelled() {
            info!("session manager finished gracefully");
        }
        info!("session manager stopped");
        provider_result
    }

    async fn listen_provider(
        &self,
        shutdown: CancellationToken,
        out: mpsc::Sender<Message>,
    ) -> Result<(), TailError> {
        debug!("starting provider");
        // `out` is moved into the provider and dropped with it, closing the
        // configuration loop's input.
        let res = self.provider.run(shutdown, out).await;
        if let Err(e) = &res {
            error!(error = %e, "error while listening provider");
        }
        res
    }

    async fn listen_configuration(
        &self,
        shutdown: &CancellationToken,
        mut input: mpsc::Receiver<Message>,
        commands: mpsc::Sender<Dispatch>,
    ) {
        let mut current = Configuration::default();

        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = input.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let provider = msg.provider_name().to_string();
            let next = msg.into_configuration();
            let diff = compare_configuration(&current, &next);
            debug!(
                %provider,
                chains = next.len(),
                commands = diff.len(),
                "configuration received"
            );

            for command in diff {
                let (applied, ack) = oneshot::channel();
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    res = commands.send(Dispatch { command, applied }) => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    res = ack => {
                        if res.is_err() {
                            return;
                        }
                    }
                }
            }

            current = next;
        }
        // Dropping `commands` closes the command loop's input.
    }

    async fn listen_commands(
        &self,
        shutdown: &CancellationToken,
        mut input: mpsc::Receiver<Dispatch>,
    ) -> JoinSet<()> {
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(res) = sessions.join_next(), if !sessions.is_empty() => log_join(res),
                dispatch = input.recv() => match dispatch {
                    Some(Dispatch { command, applied }) => {
                        self.execute_command(shutdown, command, &mut sessions).await;
                        let _ = applied.send(());
                    }
                    None => break,
                },
            }
        }

        sessions
    }

    async fn execute_command(
        &self,
        shutdown: &CancellationToken,
        command: Command,
        sessions: &mut JoinSet<()>,
    ) {
        let Command { kind, chain } = command;
        debug!(
            chain = %chain.uuid,
            tenant_id = %chain.tenant_id,
            name = %chain.name,
            command = %kind,
            "executing command"
        );

        match kind {
            CommandKind::Start => self.start_session(shutdown, chain, sessions).await,
            CommandKind::Stop => {
                self.stop_session(&chain);
            }
            CommandKind::Update => {
                self.stop_session(&chain);
                self.start_session(shutdown, chain, sessions).await;
            }
        }
    }

    async fn start_session(
        &self,
        shutdown: &CancellationToken,
        chain: Chain,
        sessions: &mut JoinSet<()>,
    ) {
        let previous = self.sessions.lock().unwrap().get(&chain.uuid).cloned();
        if let Some(previous) = previous {
            if !previous.cancel.is_cancelled() {
                warn!(chain = %chain.uuid, "session already running, ignoring start");
                return;
            }
            debug!(chain = %chain.uuid, "waiting for previous session to stop");
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = previous.finished.cancelled() => {}
            }
        }

        let uuid = chain.uuid.clone();
        let span = info_span!(
            "session",
            chain = %chain.uuid,
            tenant_id = %chain.tenant_id,
            name = %chain.name
        );

        let mut session = match self.builder.new_session(chain) {
            Ok(session) => session,
            Err(e) => {
                error!(chain = %uuid, error = %e, "failed to create a new session");
                report(&self.errors_tx, TailError::session(uuid, e));
                return;
            }
        };

        let entry = RegisteredSession {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            cancel: shutdown.child_token(),
            finished: CancellationToken::new(),
        };
        let registration = Registration {
            registry: Arc::clone(&self.sessions),
            uuid: uuid.clone(),
            id: entry.id,
            finished: entry.finished.clone(),
        };
        let cancel = entry.cancel.clone();
        self.sessions.lock().unwrap().insert(uuid.clone(), entry);

        let errors = self.errors_tx.clone();
        sessions.spawn(
            async move {
                let _registration = registration;
                info!("listener session started");
                match session.run(cancel).await {
                    Ok(()) => info!("listener session stopped"),
                    Err(e) => {
                        error!(error = %e, "listener session failed");
                        report(&errors, TailError::session(uuid, e));
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Cancel the session registered for `chain`, if any. The entry stays in
    /// the registry until the session task itself exits.
    fn stop_session(&self, chain: &Chain) -> bool {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(&chain.uuid) {
            Some(entry) => {
                debug!(chain = %chain.uuid, "stopping session");
                entry.cancel.cancel();
                true
            }
            None => {
                warn!(chain = %chain.uuid, "trying to stop a non-existing session");
                false
            }
        }
    }
}

fn report(errors: &mpsc::Sender<TailError>, err: TailError) {
    if let Err(e) = errors.try_send(err) {
        warn!(error = %e, "session error channel unavailable, dropping error");
    }
}

fn log_join(res: Result<(), JoinError>) {
    match res {
        Ok(()) => {}
        Err(e) if e.is_panic() => error!("session task panicked: {e:?}"),
        Err(e) => error!("session task failed: {e:?}"),
    }
}
