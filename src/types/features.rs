/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Capability flags and engine-specific introspection values.

use std::collections::BTreeMap;

/// Static capability flags describing what a physical engine supports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendFeatures {
    /// Engine honours `begin_tx`/`commit_tx`/`rollback_tx` boundaries.
    pub supports_transaction: bool,
    /// Data survives a process restart.
    pub supports_persistence: bool,
    /// Engine can evaluate [`Condition::IdRange`](super::query::Condition::IdRange) natively.
    pub supports_scan_id_range: bool,
    /// Engine can evaluate [`Condition::ColumnEquals`](super::query::Condition::ColumnEquals) natively.
    pub supports_query_by_column: bool,
    /// Several stores may share one physical space, so `clear(true)` affects siblings.
    pub supports_shared_storage: bool,
    /// Engine's `query_number` is cheaper than counting a query's results.
    pub supports_aggregate: bool,
}

/// Value passed to and returned by [`BackendStore::metadata`](crate::backend::pluggables::BackendStore::metadata).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Metadata {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
    Map(BTreeMap<String, Metadata>),
}

impl Metadata {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Metadata::Int(int) => Some(*int),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Metadata::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Metadata>> {
        match self {
            Metadata::Map(map) => Some(map),
            _ => None,
        }
    }
}
