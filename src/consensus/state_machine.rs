/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The apply path: how committed log entries change a replica's state.
//!
//! Every replica of a [group](super::group::ConsensusGroup) owns one [`StateMachine`], and feeds it
//! the group's committed entries one at a time, in log order. Given the same entries in the same
//! order, every replica's state machine must end up in the same state. A state machine must therefore
//! never consult anything but the entry and its own state when applying.

use std::{collections::HashMap, sync::Arc};

use crate::{
    backend::{error::Result, pluggables::BackendStore},
    types::update_sets::BackendMutation,
};

use super::command::{SessionId, StoreCommand};

/// Deterministic consumer of committed log entries.
pub trait StateMachine: Send {
    /// Apply the committed entry at `index`, whose payload is `bytes`.
    ///
    /// An `Err` is a legitimate, deterministic outcome of a committed command (e.g. the engine
    /// rejected a malformed entry). It is reported to the command's submitter, and the log moves on.
    fn apply(&mut self, index: u64, bytes: &[u8]) -> Result<()>;
}

/// [`StateMachine`] that replays [`StoreCommand`]s against a local, non-replicated store.
///
/// Mutations of an open session are held here, not in the store, until the session commits. A commit
/// then runs the whole session through the store's own `begin_tx`, `mutate` and `commit_tx` inside
/// a single apply, so the sessions of different callers never share the store's staging area.
pub struct StoreStateMachine {
    store: Arc<dyn BackendStore>,
    sessions: HashMap<SessionId, Vec<BackendMutation>>,
}

impl StoreStateMachine {
    pub fn new(store: Arc<dyn BackendStore>) -> Self {
        Self {
            store,
            sessions: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn BackendStore> {
        &self.store
    }

    /// Number of sessions with a transaction open.
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Apply `command` to the store, staging it first if it belongs to an open session.
    pub fn execute(&mut self, command: &StoreCommand) -> Result<()> {
        match command {
            StoreCommand::Init => self.store.init(),
            StoreCommand::Truncate => {
                self.sessions.clear();
                self.store.truncate()
            }
            StoreCommand::BeginTx { session } => {
                self.sessions.entry(*session).or_default();
                Ok(())
            }
            StoreCommand::CommitTx { session } => match self.sessions.remove(session) {
                Some(staged) if !staged.is_empty() => self.commit_session(*session, staged),
                _ => Ok(()),
            },
            StoreCommand::RollbackTx { session } => {
                if let Some(staged) = self.sessions.remove(session) {
                    log::debug!(
                        "Store '{}' dropped {} staged mutations of session {}",
                        self.store.store(),
                        staged.len(),
                        session
                    );
                }
                Ok(())
            }
            StoreCommand::Clear { clear_space } => {
                self.sessions.clear();
                self.store.clear(*clear_space)
            }
            StoreCommand::Mutate { session, mutation } => match self.sessions.get_mut(session) {
                Some(staged) => {
                    staged.push(mutation.clone());
                    Ok(())
                }
                None => self.store.mutate(mutation),
            },
            StoreCommand::IncrCounter(incr) => {
                self.store.increase_counter(incr.ty, incr.increment)
            }
        }
    }

    fn commit_session(&self, session: SessionId, staged: Vec<BackendMutation>) -> Result<()> {
        self.store.begin_tx()?;
        let applied = staged
            .iter()
            .try_for_each(|mutation| self.store.mutate(mutation))
            .and_then(|()| self.store.commit_tx());
        if let Err(err) = applied {
            log::warn!(
                "Store '{}' failed to commit session {}: {}",
                self.store.store(),
                session,
                err
            );
            if let Err(rollback) = self.store.rollback_tx() {
                log::error!(
                    "Store '{}' failed to roll back session {}: {}",
                    self.store.store(),
                    session,
                    rollback
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

impl StateMachine for StoreStateMachine {
    /// # Panics
    ///
    /// Panics if `bytes` do not decode into a [`StoreCommand`]. Every replica would fail to decode the
    /// same entry, so there is no state to recover into.
    fn apply(&mut self, index: u64, bytes: &[u8]) -> Result<()> {
        let command = match StoreCommand::from_bytes(bytes) {
            Ok(command) => command,
            Err(err) => panic!(
                "store '{}' cannot apply log entry {}: {}",
                self.store.store(),
                index,
                err
            ),
        };
        log::trace!(
            "Store '{}' applies {} at {}",
            self.store.store(),
            command.name(),
            index
        );
        self.execute(&command)
    }
}
