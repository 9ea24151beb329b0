/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The trait every physical storage engine implements.

use crate::types::{
    data_types::HugeType,
    entry::BackendEntry,
    features::{BackendFeatures, Metadata},
    query::Query,
    update_sets::BackendMutation,
};

use super::{config::BackendConfig, error::Result};

/// Lazy, finite, single-pass sequence of query results.
pub type EntryIterator = Box<dyn Iterator<Item = BackendEntry> + Send>;

/// Uniform contract of a pluggable storage engine.
///
/// The same contract is implemented by physical engines (e.g. [`MemoryStore`](super::memory::MemoryStore))
/// and by decorators over them (e.g. [`ReplicatedStore`](crate::consensus::replicated_store::ReplicatedStore)),
/// so callers never need to know which one they hold.
///
/// All methods take `&self`: stores are shared between caller threads and, once replicated, with the
/// apply thread of their consensus group. Implementors synchronize internally.
///
/// # Readiness
///
/// Every method except [`store`](Self::store), [`database`](Self::database),
/// [`is_schema_store`](Self::is_schema_store), [`open`](Self::open), [`opened`](Self::opened), and
/// [`features`](Self::features) must fail with [`BackendError::NotReady`](super::error::BackendError::NotReady)
/// when called before `open` succeeds or after `close`.
///
/// # Transactions
///
/// `begin_tx`, `commit_tx`, and `rollback_tx` demarcate a physical transaction around one or more
/// `mutate` calls. No partial effect of a `mutate` inside the boundary may be visible to `query` until
/// `commit_tx` succeeds, and `rollback_tx` undoes every effect since the last `begin_tx`.
pub trait BackendStore: Send + Sync {
    /// Name of this store within its database.
    fn store(&self) -> &str;

    /// Name of the database this store belongs to.
    fn database(&self) -> &str;

    /// Whether this store holds schema (labels, property keys) rather than graph data.
    fn is_schema_store(&self) -> bool {
        false
    }

    /* ↓↓↓ Lifecycle ↓↓↓ */

    /// Open the store. Opening an already open store must not corrupt its state.
    fn open(&self, config: &BackendConfig) -> Result<()>;

    /// Release every underlying resource.
    fn close(&self) -> Result<()>;

    fn opened(&self) -> bool;

    /* ↓↓↓ Administration ↓↓↓ */

    /// Create the store's physical space.
    fn init(&self) -> Result<()>;

    fn initialized(&self) -> Result<bool>;

    /// Remove all data, keeping the physical space.
    fn truncate(&self) -> Result<()>;

    /// Remove all data. If `clear_space`, also remove the physical space, so that the store must be
    /// [`init`](Self::init)-ed again before use.
    fn clear(&self, clear_space: bool) -> Result<()>;

    /* ↓↓↓ Transactions ↓↓↓ */

    /// Open a transaction for the calling thread. Transactions of different threads are independent:
    /// one thread's `commit_tx` or `rollback_tx` never touches what another thread staged.
    fn begin_tx(&self) -> Result<()>;

    fn commit_tx(&self) -> Result<()>;

    fn rollback_tx(&self) -> Result<()>;

    /* ↓↓↓ Data ↓↓↓ */

    /// Apply a batch of additions and deletions, atomically with respect to the enclosing transaction
    /// boundary. Fails without applying anything if any entry is malformed.
    fn mutate(&self, mutation: &BackendMutation) -> Result<()>;

    /// Read the entries selected by `query` from the last committed state.
    fn query(&self, query: &Query) -> Result<EntryIterator>;

    /// Count the entries selected by `query`.
    fn query_number(&self, query: &Query) -> Result<u64>;

    /// Advance the counter of `ty` by `increment`. Linearizable with respect to itself.
    fn increase_counter(&self, ty: HugeType, increment: i64) -> Result<()>;

    fn get_counter(&self, ty: HugeType) -> Result<i64>;

    /* ↓↓↓ Introspection ↓↓↓ */

    /// Engine-specific introspection. Unknown `key`s fail with `NotFound`.
    fn metadata(&self, ty: HugeType, key: &str, args: &[Metadata]) -> Result<Metadata>;

    fn features(&self) -> BackendFeatures;
}
