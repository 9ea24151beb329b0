/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A [`BackendStore`] whose state-mutating calls go through a consensus group.
//!
//! [`ReplicatedStore`] decorates a local store with the same contract. Callers cannot tell the two
//! apart, except that writes take as long as it takes the group to commit them.
//!
//! ## Writes
//!
//! `init`, `truncate`, `clear`, `begin_tx`, `commit_tx`, `rollback_tx`, `mutate`, and
//! `increase_counter` never call the local store. Each is turned into a [`StoreCommand`] and
//! [submitted](ConsensusGroup::submit_command) to the store's group, and the calling thread blocks
//! until the group's leader has committed and applied it. The local store is changed by the group's
//! apply path only.
//!
//! Transactions are scoped to the calling thread. Each thread submits its transaction commands and
//! mutations under a [`SessionId`] of its own, so the transactions of different threads sharing one
//! wrapper, or one group, stay apart all the way to the apply path.
//!
//! ## Reads
//!
//! `query`, `query_number`, `get_counter`, `initialized`, `metadata`, and `features` are served by the
//! local store. In [`ReadMode::Local`] they may miss writes that other threads submitted but that were
//! not applied yet. In [`ReadMode::Linearizable`] they first wait for the group's
//! [read barrier](ConsensusGroup::read_index).
//!
//! ## One store per group
//!
//! Wrappers of the same database and store name share one group. Opening a wrapper fails with
//! [`BackendError::Conflict`] if its group already replicates a different local store.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use parking_lot::RwLock;

use crate::{
    backend::{
        config::BackendConfig,
        error::{BackendError, Result},
        pluggables::{BackendStore, EntryIterator},
    },
    types::{
        data_types::{GroupId, HugeType},
        features::{BackendFeatures, Metadata},
        query::Query,
        update_sets::BackendMutation,
    },
};

use super::{
    command::{IncrCounter, SessionId, StoreCommand},
    configuration::{ConsensusConfiguration, ReadMode},
    group::ConsensusGroup,
    registry::GroupRegistry,
    state_machine::{StateMachine, StoreStateMachine},
};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static SESSION: SessionId = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
}

/// The session the calling thread's transaction commands are submitted under.
pub fn current_session() -> SessionId {
    SESSION.with(|session| *session)
}

pub struct ReplicatedStore {
    store: Arc<dyn BackendStore>,
    followers: Vec<Arc<dyn BackendStore>>,
    registry: Arc<GroupRegistry>,
    config: ConsensusConfiguration,
    group: GroupId,
    node: RwLock<Option<Arc<ConsensusGroup>>>,
}

impl ReplicatedStore {
    /// Wrap `store`. The wrapper's group is created in `registry` when it is first opened.
    pub fn new(
        store: Arc<dyn BackendStore>,
        registry: Arc<GroupRegistry>,
        config: ConsensusConfiguration,
    ) -> Self {
        let group = GroupId::new(store.database(), store.store());
        Self {
            store,
            followers: Vec::new(),
            registry,
            config,
            group,
            node: RwLock::new(None),
        }
    }

    /// Replicate to a follower replica of the group for each of `followers`. Each follower store is
    /// opened along with the wrapped store, and is changed only by its replica's apply path.
    ///
    /// Followers only take effect if this wrapper is the one that creates the group.
    pub fn with_followers(mut self, followers: Vec<Arc<dyn BackendStore>>) -> Self {
        self.followers = followers;
        self
    }

    /// Identity of the group that replicates this store.
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// The running group, once the store has been opened.
    pub fn node(&self) -> Option<Arc<ConsensusGroup>> {
        self.node.read().clone()
    }

    pub fn config(&self) -> &ConsensusConfiguration {
        &self.config
    }

    /// The wrapped local store.
    pub fn inner(&self) -> &Arc<dyn BackendStore> {
        &self.store
    }

    pub fn followers(&self) -> &[Arc<dyn BackendStore>] {
        &self.followers
    }

    fn ready_node(&self) -> Result<Arc<ConsensusGroup>> {
        if !self.store.opened() {
            return Err(BackendError::not_ready(self.store.store(), "store is not open"));
        }
        self.node.read().clone().ok_or_else(|| {
            BackendError::not_ready(self.store.store(), "consensus group is not started")
        })
    }

    fn submit(&self, command: StoreCommand) -> Result<()> {
        let node = self.ready_node()?;
        log::trace!("Store '{}' submits {}", self.store.store(), command.name());
        node.submit_command(&command)
    }

    fn before_read(&self) -> Result<()> {
        if self.config.read_mode == ReadMode::Linearizable {
            self.ready_node()?.read_index()?;
        }
        Ok(())
    }

    fn start_group(&self) -> Result<ConsensusGroup> {
        let state_machine: Box<dyn StateMachine> =
            Box::new(StoreStateMachine::new(Arc::clone(&self.store)));
        let follower_state_machines = self
            .followers
            .iter()
            .map(|follower| {
                Box::new(StoreStateMachine::new(Arc::clone(follower))) as Box<dyn StateMachine>
            })
            .collect();
        Ok(ConsensusGroup::start(
            self.group.clone(),
            self.config.clone(),
            state_machine,
            follower_state_machines,
        )
        .with_store(Arc::clone(&self.store)))
    }

    fn join_group(&self) -> Result<Arc<ConsensusGroup>> {
        let node = self
            .registry
            .get_or_create(&self.group, || self.start_group())?;
        match node.store() {
            Some(replicated) if !same_store(replicated, &self.store) => Err(BackendError::Conflict(
                format!(
                    "group '{}' already replicates another instance of store '{}'",
                    self.group,
                    self.store.store()
                ),
            )),
            _ => Ok(node),
        }
    }

    // Close `opened` in reverse order. Errors are logged, the caller reports the failure that caused this.
    fn close_opened(&self, opened: &[&Arc<dyn BackendStore>]) {
        for store in opened.iter().rev() {
            if let Err(err) = store.close() {
                log::warn!(
                    "Failed to close store '{}' after a failed open: {}",
                    store.store(),
                    err
                );
            }
        }
    }
}

fn same_store(a: &Arc<dyn BackendStore>, b: &Arc<dyn BackendStore>) -> bool {
    Arc::as_ptr(a) as *const u8 == Arc::as_ptr(b) as *const u8
}

impl BackendStore for ReplicatedStore {
    fn store(&self) -> &str {
        self.store.store()
    }

    fn database(&self) -> &str {
        self.store.database()
    }

    fn is_schema_store(&self) -> bool {
        self.store.is_schema_store()
    }

    fn open(&self, config: &BackendConfig) -> Result<()> {
        self.store.open(config)?;
        let mut opened = vec![&self.store];
        for follower in &self.followers {
            if let Err(err) = follower.open(config) {
                self.close_opened(&opened);
                return Err(err);
            }
            opened.push(follower);
        }

        let node = match self.join_group() {
            Ok(node) => node,
            Err(err) => {
                self.close_opened(&opened);
                return Err(err);
            }
        };
        *self.node.write() = Some(node);
        log::debug!("Replicated store '{}' opened in group '{}'", self.store(), self.group);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.node.write().take();
        for follower in &self.followers {
            follower.close()?;
        }
        self.store.close()
    }

    fn opened(&self) -> bool {
        self.store.opened() && self.node.read().is_some()
    }

    fn init(&self) -> Result<()> {
        self.submit(StoreCommand::Init)
    }

    fn initialized(&self) -> Result<bool> {
        self.before_read()?;
        self.store.initialized()
    }

    fn truncate(&self) -> Result<()> {
        self.submit(StoreCommand::Truncate)
    }

    fn clear(&self, clear_space: bool) -> Result<()> {
        self.submit(StoreCommand::Clear { clear_space })
    }

    fn begin_tx(&self) -> Result<()> {
        self.submit(StoreCommand::BeginTx {
            session: current_session(),
        })
    }

    fn commit_tx(&self) -> Result<()> {
        self.submit(StoreCommand::CommitTx {
            session: current_session(),
        })
    }

    fn rollback_tx(&self) -> Result<()> {
        self.submit(StoreCommand::RollbackTx {
            session: current_session(),
        })
    }

    fn mutate(&self, mutation: &BackendMutation) -> Result<()> {
        self.submit(StoreCommand::Mutate {
            session: current_session(),
            mutation: mutation.clone(),
        })
    }

    fn query(&self, query: &Query) -> Result<EntryIterator> {
        self.before_read()?;
        self.store.query(query)
    }

    fn query_number(&self, query: &Query) -> Result<u64> {
        self.before_read()?;
        self.store.query_number(query)
    }

    fn increase_counter(&self, ty: HugeType, increment: i64) -> Result<()> {
        self.submit(StoreCommand::IncrCounter(IncrCounter { ty, increment }))
    }

    fn get_counter(&self, ty: HugeType) -> Result<i64> {
        self.before_read()?;
        self.store.get_counter(ty)
    }

    fn metadata(&self, ty: HugeType, key: &str, args: &[Metadata]) -> Result<Metadata> {
        self.before_read()?;
        self.store.metadata(ty, key, args)
    }

    fn features(&self) -> BackendFeatures {
        self.store.features()
    }
}
