/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store pending additions and deletions of [entries](BackendEntry).

use std::collections::HashMap;

use borsh::{BorshDeserialize, BorshSerialize};

use super::{data_types::EntryKey, entry::BackendEntry};

/// Insertion-ordered set of entries, deduplicated by entry identity `(type, id)`.
///
/// # Last writer wins
///
/// [`insert`](Self::insert)-ing an entry whose identity is already in the set keeps the entry at its
/// original position, but replaces its columns with those of the newer entry.
#[derive(Clone, Debug, Default)]
pub struct EntrySet {
    entries: Vec<BackendEntry>,
    positions: HashMap<EntryKey, usize>,
}

impl EntrySet {
    /// Create a new, empty `EntrySet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `entry`. Returns whether the identity of `entry` was not already in the set.
    pub fn insert(&mut self, entry: BackendEntry) -> bool {
        match self.positions.get(&entry.key()) {
            Some(&position) => {
                self.entries[position] = entry;
                false
            }
            None => {
                self.positions.insert(entry.key(), self.entries.len());
                self.entries.push(entry);
                true
            }
        }
    }

    /// Remove the entry identified by `key`, if present, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &EntryKey) -> Option<BackendEntry> {
        let position = self.positions.remove(key)?;
        let removed = self.entries.remove(position);
        for entry in &self.entries[position..] {
            if let Some(shifted) = self.positions.get_mut(&entry.key()) {
                *shifted -= 1;
            }
        }
        Some(removed)
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.positions.contains_key(key)
    }

    pub fn get(&self, key: &EntryKey) -> Option<&BackendEntry> {
        self.positions.get(key).map(|&position| &self.entries[position])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    /// Iterate through the entries in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, BackendEntry> {
        self.entries.iter()
    }

    /// Get the entries as a slice, in insertion order.
    pub fn as_slice(&self) -> &[BackendEntry] {
        &self.entries
    }
}

impl FromIterator<BackendEntry> for EntrySet {
    fn from_iter<T: IntoIterator<Item = BackendEntry>>(iter: T) -> Self {
        let mut set = EntrySet::new();
        iter.into_iter().for_each(|entry| {
            set.insert(entry);
        });
        set
    }
}

impl PartialEq for EntrySet {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .zip(other.entries.iter())
                .all(|(a, b)| a.same_content(b))
    }
}

/// A batch of entry additions and deletions that a store applies atomically.
///
/// # Uniqueness of identity between `additions` and `deletions`
///
/// An identity is never in both sets at once: [`add`](Self::add) cancels a pending deletion of the
/// same identity, and [`delete`](Self::delete) cancels a pending addition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendMutation {
    additions: EntrySet,
    deletions: EntrySet,
}

impl BackendMutation {
    /// Create a new `BackendMutation` with empty `additions` and `deletions`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mutation from separately buffered additions and deletions. Additions are applied first,
    /// so an identity present in both buffers ends up as a deletion.
    pub fn from_buffers(additions: &EntrySet, deletions: &EntrySet) -> Self {
        let mut mutation = Self::new();
        additions.iter().cloned().for_each(|entry| mutation.add(entry));
        deletions.iter().cloned().for_each(|entry| mutation.delete(entry));
        mutation
    }

    /// Schedule the addition of `entry`, cancelling a scheduled deletion of the same identity.
    pub fn add(&mut self, entry: BackendEntry) {
        self.deletions.remove(&entry.key());
        self.additions.insert(entry);
    }

    /// Schedule the deletion of `entry`, cancelling a scheduled addition of the same identity.
    pub fn delete(&mut self, entry: BackendEntry) {
        self.additions.remove(&entry.key());
        self.deletions.insert(entry);
    }

    pub fn additions(&self) -> &EntrySet {
        &self.additions
    }

    pub fn deletions(&self) -> &EntrySet {
        &self.deletions
    }

    /// Total number of scheduled additions and deletions.
    pub fn len(&self) -> usize {
        self.additions.len() + self.deletions.len()
    }

    /// Whether both `additions` and `deletions` are empty.
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.deletions.is_empty()
    }
}

/// Intermediate representation of [`BackendMutation`] for serialization and deserialization.
///
/// ## Rationale
///
/// The position index inside [`EntrySet`] is derived data and is not serialized. Deserializing through
/// `MutationBytes` rebuilds it, and re-applies the identity uniqueness rules of `BackendMutation` so
/// that a decoded mutation satisfies them even if its bytes were not produced by this crate.
#[derive(BorshSerialize, BorshDeserialize)]
pub struct MutationBytes {
    additions: Vec<BackendEntry>,
    deletions: Vec<BackendEntry>,
}

impl From<&BackendMutation> for MutationBytes {
    fn from(mutation: &BackendMutation) -> Self {
        MutationBytes {
            additions: mutation.additions.as_slice().to_vec(),
            deletions: mutation.deletions.as_slice().to_vec(),
        }
    }
}

impl From<MutationBytes> for BackendMutation {
    fn from(bytes: MutationBytes) -> Self {
        let mut mutation = BackendMutation::new();
        bytes.additions.into_iter().for_each(|entry| mutation.add(entry));
        bytes.deletions.into_iter().for_each(|entry| mutation.delete(entry));
        mutation
    }
}
