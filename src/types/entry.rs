/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The unit of stored data.

use std::{
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{BackendColumn, EntryKey, HugeType, Id};

/// A single stored record: a type tag, an id, and an ordered list of columns.
///
/// Entries are immutable once handed to the store layer. Equality and hashing consider only the
/// entry's identity, `(type, id)`, so two entries that differ only in their columns are the same entry.
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct BackendEntry {
    ty: HugeType,
    id: Id,
    columns: Vec<BackendColumn>,
}

impl BackendEntry {
    /// Create an entry with no columns.
    pub fn new(ty: HugeType, id: impl Into<Id>) -> Self {
        Self {
            ty,
            id: id.into(),
            columns: Vec::new(),
        }
    }

    /// Create an entry with `columns`.
    pub fn with_columns(ty: HugeType, id: impl Into<Id>, columns: Vec<BackendColumn>) -> Self {
        Self {
            ty,
            id: id.into(),
            columns,
        }
    }

    /// Append a column, builder-style.
    pub fn column(mut self, name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        self.columns.push(BackendColumn::new(name, value));
        self
    }

    pub fn ty(&self) -> HugeType {
        self.ty
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn columns(&self) -> &[BackendColumn] {
        &self.columns
    }

    /// Get the value of the first column named `name`, if any.
    pub fn column_value(&self, name: &[u8]) -> Option<&[u8]> {
        self.columns
            .iter()
            .find(|column| column.name == name)
            .map(|column| column.value.as_slice())
    }

    /// Get the identity of this entry.
    pub fn key(&self) -> EntryKey {
        EntryKey::new(self.ty, self.id.clone())
    }

    /// Whether this entry is identical to `other` in identity *and* columns.
    pub fn same_content(&self, other: &BackendEntry) -> bool {
        self == other && self.columns == other.columns
    }
}

impl PartialEq for BackendEntry {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.id == other.id
    }
}

impl Eq for BackendEntry {}

impl Hash for BackendEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ty.hash(state);
        self.id.hash(state);
    }
}

impl Display for BackendEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({} columns)", self.ty, self.id, self.columns.len())
    }
}
