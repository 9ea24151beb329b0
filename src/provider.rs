/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Named store handles of one database.
//!
//! A [`StoreProvider`] is where the graph engine gets its stores from. Stores are registered under
//! their names once, and are handed out by name afterwards. A provider created with a
//! [`ConsensusConfiguration`] wraps every store it registers in a [`ReplicatedStore`], so the graph
//! engine gets replicated stores without knowing it.
//!
//! ```ignore
//! let provider = StoreProvider::replicated("hugegraph", registry, configuration);
//! provider.register(Arc::new(MemoryStore::new("hugegraph", "g")))?;
//! let store = provider.open("g", &BackendConfig::default())?;
//! store.init()?;
//! let mut tx = provider.transaction("g", Arc::new(BinarySerializer))?;
//! ```

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

use crate::{
    backend::{
        config::BackendConfig,
        error::{BackendError, Result},
        pluggables::BackendStore,
        serializer::Serializer,
    },
    consensus::{
        configuration::ConsensusConfiguration, registry::GroupRegistry,
        replicated_store::ReplicatedStore,
    },
    transaction::Transaction,
};

pub struct StoreProvider {
    database: String,
    registry: Arc<GroupRegistry>,
    consensus: Option<ConsensusConfiguration>,
    stores: RwLock<BTreeMap<String, Arc<dyn BackendStore>>>,
}

impl StoreProvider {
    /// Create a provider of local, non-replicated stores of `database`.
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            registry: Arc::new(GroupRegistry::new()),
            consensus: None,
            stores: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a provider of stores of `database` replicated through groups in `registry`.
    pub fn replicated(
        database: &str,
        registry: Arc<GroupRegistry>,
        configuration: ConsensusConfiguration,
    ) -> Self {
        Self {
            consensus: Some(configuration),
            registry,
            ..Self::new(database)
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    pub fn is_replicated(&self) -> bool {
        self.consensus.is_some()
    }

    /// Register `store` under its name, and return the handle the provider will hand out for it.
    ///
    /// Fails with [`BackendError::Conflict`] if a store with the same name is registered already, and
    /// with [`BackendError::InvalidEntry`] if `store` belongs to another database.
    pub fn register(&self, store: Arc<dyn BackendStore>) -> Result<Arc<dyn BackendStore>> {
        self.register_with_followers(store, Vec::new())
    }

    /// Like [`register`](Self::register), and replicate to `followers` if this provider replicates.
    /// `followers` are ignored otherwise.
    pub fn register_with_followers(
        &self,
        store: Arc<dyn BackendStore>,
        followers: Vec<Arc<dyn BackendStore>>,
    ) -> Result<Arc<dyn BackendStore>> {
        if store.database() != self.database {
            return Err(BackendError::InvalidEntry(format!(
                "store '{}' belongs to database '{}', not '{}'",
                store.store(),
                store.database(),
                self.database
            )));
        }

        let mut stores = self.stores.write();
        if stores.contains_key(store.store()) {
            return Err(BackendError::Conflict(format!(
                "store '{}' in database '{}'",
                store.store(),
                self.database
            )));
        }

        let handle: Arc<dyn BackendStore> = match &self.consensus {
            Some(configuration) => Arc::new(
                ReplicatedStore::new(store, Arc::clone(&self.registry), configuration.clone())
                    .with_followers(followers),
            ),
            None => store,
        };
        stores.insert(handle.store().to_string(), Arc::clone(&handle));
        log::debug!("Registered store '{}' of '{}'", handle.store(), self.database);
        Ok(handle)
    }

    /// Get the handle of the store named `name`.
    pub fn store(&self, name: &str) -> Result<Arc<dyn BackendStore>> {
        self.stores.read().get(name).cloned().ok_or_else(|| {
            BackendError::NotFound(format!("store '{}' in database '{}'", name, self.database))
        })
    }

    /// Get the handle of the store named `name`, and open it with `config`.
    pub fn open(&self, name: &str, config: &BackendConfig) -> Result<Arc<dyn BackendStore>> {
        let store = self.store(name)?;
        store.open(config)?;
        Ok(store)
    }

    /// Open every registered store with `config`, in name order.
    pub fn open_all(&self, config: &BackendConfig) -> Result<()> {
        for store in self.stores.read().values() {
            store.open(config)?;
        }
        Ok(())
    }

    /// Close every registered store. Every store is attempted; the first failure is returned.
    pub fn close_all(&self) -> Result<()> {
        let mut first_failure = None;
        for store in self.stores.read().values() {
            if let Err(err) = store.close() {
                log::error!("Failed to close store '{}': {}", store.store(), err);
                first_failure.get_or_insert(err);
            }
        }
        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Names of every registered store, in order.
    pub fn names(&self) -> Vec<String> {
        self.stores.read().keys().cloned().collect()
    }

    /// Start a transaction against the store named `name`.
    pub fn transaction(
        &self,
        name: &str,
        serializer: Arc<dyn Serializer>,
    ) -> Result<Transaction> {
        Ok(Transaction::new(self.store(name)?, serializer))
    }
}
