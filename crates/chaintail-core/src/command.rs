//! Configuration differ: turns two snapshots into session commands.

use std::fmt;

use crate::types::{Chain, Configuration};

/// What the session manager must do for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Chain appeared: start a session.
    Start,
    /// Chain disappeared: stop its session.
    Stop,
    /// Chain settings changed: restart its session.
    Update,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Update => write!(f, "update"),
        }
    }
}

/// A single instruction derived from a configuration diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub kind: CommandKind,
    pub chain: Chain,
}

impl Command {
    pub fn start(chain: Chain) -> Self {
        Self { kind: CommandKind::Start, chain }
    }

    pub fn stop(chain: Chain) -> Self {
        Self { kind: CommandKind::Stop, chain }
    }

    pub fn update(chain: Chain) -> Self {
        Self { kind: CommandKind::Update, chain }
    }
}

/// Compute the commands that take the running set of sessions from `old` to
/// `new`.
///
/// Chains only in `new` start, chains only in `old` stop, chains present in
/// both but unequal are updated (with the new settings). Every chain gets at
/// most one command and the result is sorted by chain UUID.
pub fn compare_configuration(old: &Configuration, new: &Configuration) -> Vec<Command> {
    let mut commands = Vec::new();

    for (uuid, chain) in &new.chains {
        match old.chains.get(uuid) {
            None => commands.push(Command::start(chain.clone())),
            Some(previous) if previous != chain => commands.push(Command::update(chain.clone())),
            Some(_) => {}
        }
    }

    for (uuid, chain) in &old.chains {
        if !new.chains.contains_key(uuid) {
            commands.push(Command::stop(chain.clone()));
        }
    }

    commands.sort_by(|a, b| a.chain.uuid.cmp(&b.chain.uuid));
    commands
}
