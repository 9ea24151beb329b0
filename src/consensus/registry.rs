/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Map from [group identity](GroupId) to the running [`ConsensusGroup`] that replicates it.
//!
//! A registry is an ordinary value, owned by whatever manages store lifecycles (usually a
//! [`StoreProvider`](crate::provider::StoreProvider)) and shared with the stores it hands out. Any
//! number of registries may exist in one process. Within one registry, there is at most one group per
//! identity for the registry's lifetime, however many threads race to create it.

use std::{collections::HashMap, sync::Arc};

use parking_lot::{Mutex, RwLock};

use crate::{
    backend::error::{BackendError, Result},
    types::data_types::GroupId,
};

use super::group::ConsensusGroup;

#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<GroupId, Arc<ConsensusGroup>>>,
    // Serializes creations only. Lookups of existing groups never take it.
    creation: Mutex<()>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the group identified by `id`, if it was created.
    pub fn get(&self, id: &GroupId) -> Option<Arc<ConsensusGroup>> {
        self.groups.read().get(id).cloned()
    }

    /// Get the group identified by `id`, creating it with `create` if it does not exist yet.
    ///
    /// `create` is called at most once per identity. A thread that races with another thread creating
    /// the same group blocks until that creation finishes, and then returns the created group. If
    /// `create` fails, nothing is registered, and the next caller tries again.
    pub fn get_or_create(
        &self,
        id: &GroupId,
        create: impl FnOnce() -> Result<ConsensusGroup>,
    ) -> Result<Arc<ConsensusGroup>> {
        if let Some(group) = self.get(id) {
            return Ok(group);
        }

        let _creating = self.creation.lock();
        if let Some(group) = self.get(id) {
            return Ok(group);
        }

        let group = Arc::new(create()?);
        log::debug!("Registered consensus group '{}'", id);
        self.groups.write().insert(id.clone(), Arc::clone(&group));
        Ok(group)
    }

    /// Register an already started group. Fails with [`BackendError::Conflict`] if a group with the same
    /// identity is registered.
    pub fn register(&self, group: ConsensusGroup) -> Result<Arc<ConsensusGroup>> {
        let _creating = self.creation.lock();
        let id = group.id().clone();
        if self.groups.read().contains_key(&id) {
            return Err(BackendError::Conflict(format!("consensus group '{}'", id)));
        }
        let group = Arc::new(group);
        self.groups.write().insert(id, Arc::clone(&group));
        Ok(group)
    }

    /// Unregister the group identified by `id`. Its threads stop once every store holding it lets go.
    pub fn remove(&self, id: &GroupId) -> Option<Arc<ConsensusGroup>> {
        let _creating = self.creation.lock();
        self.groups.write().remove(id)
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.groups.read().contains_key(id)
    }

    /// Identities of every registered group, in no particular order.
    pub fn ids(&self) -> Vec<GroupId> {
        self.groups.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}
