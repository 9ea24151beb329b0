/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A volatile, in-memory implementation of [`BackendStore`].
//!
//! `MemoryStore` is the reference engine: it honours every guarantee of the contract, including staged
//! transactions, and is what tests and single-process deployments replicate. It does not persist
//! anything across process restarts.
//!
//! ## Transactions
//!
//! Staging areas belong to the calling thread. `begin_tx` opens one for the calling thread. Mutations
//! the thread makes while it is open are recorded there and only become visible to `query` when the
//! thread's `commit_tx` applies them, in order, under a single write lock. `rollback_tx` discards the
//! thread's staging area. A `begin_tx` while the thread's staging area is already open joins it.
//! Mutations made with no staging area open are applied immediately.

use std::{
    collections::{BTreeMap, HashMap},
    thread::{self, ThreadId},
};

use parking_lot::RwLock;

use crate::types::{
    data_types::{HugeType, Id},
    entry::BackendEntry,
    features::{BackendFeatures, Metadata},
    query::Query,
    update_sets::BackendMutation,
};

use super::{
    config::BackendConfig,
    error::{BackendError, Result},
    pluggables::{BackendStore, EntryIterator},
};

pub struct MemoryStore {
    database: String,
    store: String,
    schema: bool,
    state: RwLock<MemoryState>,
}

type Tables = BTreeMap<HugeType, BTreeMap<Id, BackendEntry>>;

#[derive(Default)]
struct MemoryState {
    opened: bool,
    read_only: bool,
    initialized: bool,
    tables: Tables,
    counters: BTreeMap<HugeType, i64>,
    staged: HashMap<ThreadId, Vec<BackendMutation>>,
}

impl MemoryStore {
    /// Create a closed, uninitialized store named `store` in `database`.
    pub fn new(database: &str, store: &str) -> Self {
        Self {
            database: database.to_string(),
            store: store.to_string(),
            schema: false,
            state: RwLock::new(MemoryState::default()),
        }
    }

    /// Create a closed, uninitialized schema store.
    pub fn new_schema_store(database: &str, store: &str) -> Self {
        Self {
            schema: true,
            ..Self::new(database, store)
        }
    }

    fn check_ready(&self, state: &MemoryState) -> Result<()> {
        if !state.opened {
            return Err(BackendError::not_ready(&self.store, "store is closed"));
        }
        Ok(())
    }

    fn check_space(&self, state: &MemoryState) -> Result<()> {
        self.check_ready(state)?;
        if !state.initialized {
            return Err(BackendError::engine(format!(
                "store '{}' has not been initialized",
                self.store
            )));
        }
        Ok(())
    }

    fn check_writable(&self, state: &MemoryState) -> Result<()> {
        self.check_space(state)?;
        self.check_not_read_only(state)
    }

    fn check_not_read_only(&self, state: &MemoryState) -> Result<()> {
        if state.read_only {
            return Err(BackendError::engine(format!(
                "store '{}' was opened read-only",
                self.store
            )));
        }
        Ok(())
    }

    fn validate(mutation: &BackendMutation) -> Result<()> {
        let malformed = mutation
            .additions()
            .iter()
            .chain(mutation.deletions().iter())
            .find(|entry| entry.id().is_empty());
        match malformed {
            Some(entry) => Err(BackendError::InvalidEntry(format!(
                "entry of type {} has an empty id",
                entry.ty()
            ))),
            None => Ok(()),
        }
    }

    fn apply(tables: &mut Tables, mutation: &BackendMutation) {
        for entry in mutation.deletions().iter() {
            if let Some(table) = tables.get_mut(&entry.ty()) {
                table.remove(entry.id());
            }
        }
        for entry in mutation.additions().iter() {
            tables
                .entry(entry.ty())
                .or_default()
                .insert(entry.id().clone(), entry.clone());
        }
    }

    fn select(state: &MemoryState, query: &Query) -> Vec<BackendEntry> {
        let table = match state.tables.get(&query.ty()) {
            Some(table) => table,
            None => return Vec::new(),
        };
        let limit = query.get_limit().unwrap_or(usize::MAX);
        if query.is_id_query() {
            query
                .ids()
                .iter()
                .filter_map(|id| table.get(id))
                .filter(|entry| query.matches(entry))
                .take(limit)
                .cloned()
                .collect()
        } else {
            table
                .values()
                .filter(|entry| query.matches(entry))
                .take(limit)
                .cloned()
                .collect()
        }
    }
}

impl BackendStore for MemoryStore {
    fn store(&self) -> &str {
        &self.store
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn is_schema_store(&self) -> bool {
        self.schema
    }

    fn open(&self, config: &BackendConfig) -> Result<()> {
        let mut state = self.state.write();
        if state.opened {
            log::debug!("Store '{}' has been opened", self.store);
            return Ok(());
        }
        state.opened = true;
        state.read_only = config.read_only;
        log::debug!("Store '{}' opened (read_only: {})", self.store, config.read_only);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        state.opened = false;
        state.staged.clear();
        log::debug!("Store '{}' closed", self.store);
        Ok(())
    }

    fn opened(&self) -> bool {
        self.state.read().opened
    }

    fn init(&self) -> Result<()> {
        let mut state = self.state.write();
        self.check_ready(&state)?;
        state.initialized = true;
        log::debug!("Store '{}' initialized", self.store);
        Ok(())
    }

    fn initialized(&self) -> Result<bool> {
        let state = self.state.read();
        self.check_ready(&state)?;
        Ok(state.initialized)
    }

    fn truncate(&self) -> Result<()> {
        let mut state = self.state.write();
        self.check_writable(&state)?;
        state.tables.clear();
        state.counters.clear();
        state.staged.clear();
        log::debug!("Store '{}' truncated", self.store);
        Ok(())
    }

    fn clear(&self, clear_space: bool) -> Result<()> {
        let mut state = self.state.write();
        self.check_ready(&state)?;
        self.check_not_read_only(&state)?;
        state.tables.clear();
        state.counters.clear();
        state.staged.clear();
        if clear_space {
            state.initialized = false;
        }
        log::debug!("Store '{}' cleared (clear_space: {})", self.store, clear_space);
        Ok(())
    }

    fn begin_tx(&self) -> Result<()> {
        let mut state = self.state.write();
        self.check_writable(&state)?;
        state.staged.entry(thread::current().id()).or_default();
        Ok(())
    }

    fn commit_tx(&self) -> Result<()> {
        let mut guard = self.state.write();
        self.check_writable(&guard)?;
        let state = &mut *guard;
        if let Some(staged) = state.staged.remove(&thread::current().id()) {
            staged
                .iter()
                .for_each(|mutation| Self::apply(&mut state.tables, mutation));
        }
        Ok(())
    }

    fn rollback_tx(&self) -> Result<()> {
        let mut state = self.state.write();
        self.check_ready(&state)?;
        if let Some(staged) = state.staged.remove(&thread::current().id()) {
            log::debug!(
                "Store '{}' rolled back {} staged mutations",
                self.store,
                staged.len()
            );
        }
        Ok(())
    }

    fn mutate(&self, mutation: &BackendMutation) -> Result<()> {
        let mut guard = self.state.write();
        self.check_writable(&guard)?;
        Self::validate(mutation)?;
        let state = &mut *guard;
        match state.staged.get_mut(&thread::current().id()) {
            Some(staged) => staged.push(mutation.clone()),
            None => Self::apply(&mut state.tables, mutation),
        }
        Ok(())
    }

    fn query(&self, query: &Query) -> Result<EntryIterator> {
        let state = self.state.read();
        self.check_space(&state)?;
        Ok(Box::new(Self::select(&state, query).into_iter()))
    }

    fn query_number(&self, query: &Query) -> Result<u64> {
        let state = self.state.read();
        self.check_space(&state)?;
        Ok(Self::select(&state, query).len() as u64)
    }

    fn increase_counter(&self, ty: HugeType, increment: i64) -> Result<()> {
        let mut state = self.state.write();
        self.check_writable(&state)?;
        let counter = state.counters.entry(ty).or_insert(0);
        match counter.checked_add(increment) {
            Some(value) => {
                *counter = value;
                Ok(())
            }
            None => Err(BackendError::engine(format!(
                "counter {} of store '{}' overflows: {} + {}",
                ty, self.store, counter, increment
            ))),
        }
    }

    fn get_counter(&self, ty: HugeType) -> Result<i64> {
        let state = self.state.read();
        self.check_space(&state)?;
        Ok(state.counters.get(&ty).copied().unwrap_or(0))
    }

    fn metadata(&self, ty: HugeType, key: &str, _args: &[Metadata]) -> Result<Metadata> {
        let state = self.state.read();
        self.check_ready(&state)?;
        match key {
            "entries" => Ok(Metadata::Int(
                state.tables.get(&ty).map_or(0, |table| table.len() as i64),
            )),
            "counters" => Ok(Metadata::Map(
                state
                    .counters
                    .iter()
                    .map(|(ty, value)| (ty.to_string(), Metadata::Int(*value)))
                    .collect(),
            )),
            "staged_mutations" => Ok(Metadata::Int(
                state
                    .staged
                    .get(&thread::current().id())
                    .map_or(0, |staged| staged.len() as i64),
            )),
            "engine" => Ok(Metadata::Text("memory".to_string())),
            unknown => Err(BackendError::NotFound(format!(
                "metadata '{}' of store '{}'",
                unknown, self.store
            ))),
        }
    }

    fn features(&self) -> BackendFeatures {
        BackendFeatures {
            supports_transaction: true,
            supports_persistence: false,
            supports_scan_id_range: true,
            supports_query_by_column: true,
            supports_shared_storage: false,
            supports_aggregate: true,
        }
    }
}
