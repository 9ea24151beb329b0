/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Buffering of writes, and all-or-nothing commits of buffered writes to a store.
//!
//! A [`Transaction`] accumulates additions and deletions of [entries](BackendEntry) in memory, and
//! hands them to its [`BackendStore`] as a single [`BackendMutation`] on [`commit`](Transaction::commit),
//! bracketed by the store's transaction boundary:
//!
//! ```text
//! begin_tx -> mutate(additions, deletions) -> commit_tx
//! ```
//!
//! Whether the store executes those calls locally or replicates them through a consensus group is
//! invisible to the transaction.
//!
//! ## States
//!
//! A transaction is [`Idle`](TxState::Idle) while both buffers are empty and
//! [`Dirty`](TxState::Dirty) otherwise. A successful `commit` clears the buffers. A failed `commit`
//! does not: the buffered writes stay in place so that the caller can inspect them, retry the commit,
//! or discard them explicitly with [`clear_updates`](Transaction::clear_updates).
//!
//! ## Reads
//!
//! Reads never merge buffered writes into their results. Instead, a read on a dirty transaction first
//! flushes the buffers through [`commit_or_rollback`](Transaction::commit_or_rollback), and then reads
//! from the store.
//!
//! ## Threads
//!
//! A transaction owns its buffers exclusively. Share the store between threads, not the transaction:
//! every unit of work gets a transaction of its own.

use std::sync::Arc;

use crate::{
    backend::{
        error::{BackendError, Result},
        pluggables::{BackendStore, EntryIterator},
        serializer::Serializer,
    },
    types::{
        data_types::{HugeType, Id},
        entry::BackendEntry,
        query::Query,
        update_sets::{BackendMutation, EntrySet},
    },
};

/// Whether a [`Transaction`] holds buffered writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Both buffers are empty.
    Idle,
    /// At least one addition or deletion is buffered.
    Dirty,
}

/// A unit of work against a single store.
pub struct Transaction<S: BackendStore + ?Sized = dyn BackendStore> {
    store: Arc<S>,
    serializer: Arc<dyn Serializer>,
    additions: EntrySet,
    deletions: EntrySet,
    auto_commit: bool,
}

impl<S: BackendStore + ?Sized> Transaction<S> {
    /// Create an idle transaction against `store`, with auto-commit off.
    pub fn new(store: Arc<S>, serializer: Arc<dyn Serializer>) -> Self {
        Self {
            store,
            serializer,
            additions: EntrySet::new(),
            deletions: EntrySet::new(),
            auto_commit: false,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// When enabled, every [`write`](Self::write) is followed by
    /// [`commit_or_rollback`](Self::commit_or_rollback).
    pub fn set_auto_commit(&mut self, auto_commit: bool) {
        self.auto_commit = auto_commit;
    }

    /* ↓↓↓ Buffering ↓↓↓ */

    /// Buffer the addition of `entry`. Adding an entry whose identity is already buffered for addition
    /// replaces its columns, keeping its position.
    pub fn add_entry(&mut self, entry: BackendEntry) -> Result<()> {
        log::debug!("Transaction add entry {}", entry);
        Self::check_entry(&entry)?;
        self.additions.insert(entry);
        Ok(())
    }

    /// Buffer the deletion of `entry`.
    pub fn remove_entry(&mut self, entry: BackendEntry) -> Result<()> {
        log::debug!("Transaction remove entry {}", entry);
        Self::check_entry(&entry)?;
        self.deletions.insert(entry);
        Ok(())
    }

    /// Buffer the deletion of the element `(ty, id)`, identified through the serializer.
    pub fn remove_by_id(&mut self, ty: HugeType, id: &Id) -> Result<()> {
        let entry = self.serializer.write_id(ty, id);
        self.remove_entry(entry)
    }

    fn check_entry(entry: &BackendEntry) -> Result<()> {
        if entry.id().is_empty() {
            return Err(BackendError::InvalidEntry(format!(
                "entry of type {} has an empty id",
                entry.ty()
            )));
        }
        Ok(())
    }

    pub fn has_updates(&self) -> bool {
        !self.additions.is_empty() || !self.deletions.is_empty()
    }

    pub fn state(&self) -> TxState {
        if self.has_updates() {
            TxState::Dirty
        } else {
            TxState::Idle
        }
    }

    /// Buffered additions, in the order they were first added.
    pub fn additions(&self) -> &EntrySet {
        &self.additions
    }

    /// Buffered deletions, in the order they were first removed.
    pub fn deletions(&self) -> &EntrySet {
        &self.deletions
    }

    /// The mutation the next [`commit`](Self::commit) would hand to the store.
    pub fn pending_mutation(&self) -> BackendMutation {
        BackendMutation::from_buffers(&self.additions, &self.deletions)
    }

    /// Discard every buffered write without touching the store.
    pub fn clear_updates(&mut self) {
        log::debug!(
            "Transaction discards {} additions and {} deletions",
            self.additions.len(),
            self.deletions.len()
        );
        self.additions.clear();
        self.deletions.clear();
    }

    /* ↓↓↓ Reads ↓↓↓ */

    /// Read the entries selected by `query` from the store.
    ///
    /// The query is rewritten through the serializer first. If this transaction is dirty, its buffered
    /// writes are flushed before the read reaches the store.
    pub fn query(&mut self, query: Query) -> Result<EntryIterator> {
        log::debug!("Transaction query: {}", query);
        let query = self.serializer.write_query(query);

        self.before_read()?;
        let results = self.store.query(&query)?;
        self.after_read();

        Ok(results)
    }

    /// Count the entries selected by `query`, flushing buffered writes first like [`query`](Self::query).
    pub fn query_number(&mut self, query: Query) -> Result<u64> {
        let query = self.serializer.write_query(query);

        self.before_read()?;
        let number = self.store.query_number(&query)?;
        self.after_read();

        Ok(number)
    }

    /// Look up the element `(ty, id)`.
    pub fn query_one(&mut self, ty: HugeType, id: impl Into<Id>) -> Result<Option<BackendEntry>> {
        let mut results = self.query(Query::by_id(ty, id))?;
        Ok(results.next())
    }

    /// Look up the element `(ty, id)`, failing with [`BackendError::NotFound`] if it does not exist.
    pub fn get(&mut self, ty: HugeType, id: impl Into<Id>) -> Result<BackendEntry> {
        let id = id.into();
        self.query_one(ty, id.clone())?.ok_or_else(|| {
            BackendError::NotFound(format!("id '{}' with type {}", id, ty))
        })
    }

    /* ↓↓↓ Commit and rollback ↓↓↓ */

    /// Hand the buffered writes to the store as one mutation, inside a store transaction.
    ///
    /// Does nothing if the transaction is idle. On success the buffers are cleared. On failure the error
    /// of the failing store call is returned as is, the buffers are kept, and the store is **not** rolled
    /// back: its transaction boundary is left exactly as the store left it.
    pub fn commit(&mut self) -> Result<()> {
        log::debug!("Transaction commit() [auto: {}]...", self.auto_commit);
        self.prepare_commit();

        let mutation = self.pending_mutation();
        if mutation.is_empty() {
            log::debug!("Transaction has no data to commit ({})", self.store.store());
            return Ok(());
        }

        self.store.begin_tx()?;
        self.store.mutate(&mutation)?;
        self.store.commit_tx()?;

        self.additions.clear();
        self.deletions.clear();
        Ok(())
    }

    /// Roll back the store's current transaction. Buffered writes are not touched.
    pub fn rollback(&self) -> Result<()> {
        log::debug!("Transaction rollback()...");
        self.store.rollback_tx()
    }

    /// [`commit`](Self::commit), and if that fails, [`rollback`](Self::rollback).
    ///
    /// A failed commit is always reported as [`BackendError::CommitFailed`] carrying the commit's error,
    /// whether or not the rollback succeeds. A failed rollback is logged, and otherwise ignored.
    pub fn commit_or_rollback(&mut self) -> Result<()> {
        log::debug!("Transaction commit_or_rollback()");
        match self.commit() {
            Ok(()) => Ok(()),
            Err(commit_err) => {
                log::error!("Failed to commit changes: {}", commit_err);
                if let Err(rollback_err) = self.rollback() {
                    log::error!("Failed to rollback changes: {}", rollback_err);
                }
                Err(BackendError::CommitFailed {
                    source: Box::new(commit_err),
                })
            }
        }
    }

    /// Step run before the buffered writes are turned into a mutation.
    pub fn prepare_commit(&mut self) {
        log::debug!("Transaction prepare_commit()...");
    }

    /* ↓↓↓ Hooks ↓↓↓ */

    pub fn before_write(&mut self) {}

    /// Flush the buffers if auto-commit is on.
    pub fn after_write(&mut self) -> Result<()> {
        if self.auto_commit {
            self.commit_or_rollback()?;
        }
        Ok(())
    }

    /// Flush the buffers if the transaction is dirty.
    pub fn before_read(&mut self) -> Result<()> {
        if self.has_updates() {
            self.commit_or_rollback()?;
        }
        Ok(())
    }

    pub fn after_read(&mut self) {}

    /// Run `write` between [`before_write`](Self::before_write) and [`after_write`](Self::after_write).
    ///
    /// ```ignore
    /// tx.set_auto_commit(true);
    /// tx.write(|tx| tx.add_entry(vertex))?; // committed on return
    /// ```
    pub fn write<T>(&mut self, write: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.before_write();
        let output = write(self)?;
        self.after_write()?;
        Ok(output)
    }
}
