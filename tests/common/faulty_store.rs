//! A [`BackendStore`] that records the calls made to it and fails the ones it is told to.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use replistore::{
    backend::{
        config::BackendConfig,
        error::{BackendError, Result},
        memory::MemoryStore,
        pluggables::{BackendStore, EntryIterator},
    },
    types::{
        data_types::HugeType,
        features::{BackendFeatures, Metadata},
        query::Query,
        update_sets::BackendMutation,
    },
};

/// Wraps a [`MemoryStore`]. Every lifecycle, administration, transaction, and data call is recorded by
/// name before it is forwarded, or failed with an engine error if its name was passed to
/// [`fail_on`](FaultyStore::fail_on).
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashSet<&'static str>>,
}

impl FaultyStore {
    pub(crate) fn new(database: &str, store: &str) -> Arc<FaultyStore> {
        Arc::new(FaultyStore {
            inner: MemoryStore::new(database, store),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
        })
    }

    /// Create, open, and initialize a store.
    pub(crate) fn ready(database: &str, store: &str) -> Arc<FaultyStore> {
        let store = FaultyStore::new(database, store);
        store.open(&BackendConfig::default()).unwrap();
        store.init().unwrap();
        store.clear_calls();
        store
    }

    pub(crate) fn fail_on(&self, call: &'static str) {
        self.failures.lock().unwrap().insert(call);
    }

    pub(crate) fn heal(&self, call: &'static str) {
        self.failures.lock().unwrap().remove(call);
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn record(&self, call: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.failures.lock().unwrap().contains(call) {
            return Err(BackendError::engine(format!("injected failure in {}", call)));
        }
        Ok(())
    }
}

impl BackendStore for FaultyStore {
    fn store(&self) -> &str {
        self.inner.store()
    }

    fn database(&self) -> &str {
        self.inner.database()
    }

    fn open(&self, config: &BackendConfig) -> Result<()> {
        self.record("open")?;
        self.inner.open(config)
    }

    fn close(&self) -> Result<()> {
        self.record("close")?;
        self.inner.close()
    }

    fn opened(&self) -> bool {
        self.inner.opened()
    }

    fn init(&self) -> Result<()> {
        self.record("init")?;
        self.inner.init()
    }

    fn initialized(&self) -> Result<bool> {
        self.inner.initialized()
    }

    fn truncate(&self) -> Result<()> {
        self.record("truncate")?;
        self.inner.truncate()
    }

    fn clear(&self, clear_space: bool) -> Result<()> {
        self.record("clear")?;
        self.inner.clear(clear_space)
    }

    fn begin_tx(&self) -> Result<()> {
        self.record("begin_tx")?;
        self.inner.begin_tx()
    }

    fn commit_tx(&self) -> Result<()> {
        self.record("commit_tx")?;
        self.inner.commit_tx()
    }

    fn rollback_tx(&self) -> Result<()> {
        self.record("rollback_tx")?;
        self.inner.rollback_tx()
    }

    fn mutate(&self, mutation: &BackendMutation) -> Result<()> {
        self.record("mutate")?;
        self.inner.mutate(mutation)
    }

    fn query(&self, query: &Query) -> Result<EntryIterator> {
        self.record("query")?;
        self.inner.query(query)
    }

    fn query_number(&self, query: &Query) -> Result<u64> {
        self.record("query_number")?;
        self.inner.query_number(query)
    }

    fn increase_counter(&self, ty: HugeType, increment: i64) -> Result<()> {
        self.record("increase_counter")?;
        self.inner.increase_counter(ty, increment)
    }

    fn get_counter(&self, ty: HugeType) -> Result<i64> {
        self.record("get_counter")?;
        self.inner.get_counter(ty)
    }

    fn metadata(&self, ty: HugeType, key: &str, args: &[Metadata]) -> Result<Metadata> {
        self.inner.metadata(ty, key, args)
    }

    fn features(&self) -> BackendFeatures {
        self.inner.features()
    }
}
