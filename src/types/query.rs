/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Read requests.

use std::fmt::{self, Display, Formatter};

use super::{
    data_types::{HugeType, Id},
    entry::BackendEntry,
};

/// A predicate over entries, evaluated by the store in addition to the query's type and id filters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Condition {
    /// Id is within `[start, end)`. A missing bound is unbounded.
    IdRange { start: Option<Id>, end: Option<Id> },

    /// Entry has a column named `name` whose value equals `value`.
    ColumnEquals { name: Vec<u8>, value: Vec<u8> },
}

impl Condition {
    /// Whether `entry` satisfies this condition.
    pub fn test(&self, entry: &BackendEntry) -> bool {
        match self {
            Condition::IdRange { start, end } => {
                start.as_ref().map_or(true, |start| entry.id() >= start)
                    && end.as_ref().map_or(true, |end| entry.id() < end)
            }
            Condition::ColumnEquals { name, value } => {
                entry.column_value(name) == Some(value.as_slice())
            }
        }
    }
}

/// A read request: a type filter, an optional list of ids, conditions, and an optional limit.
///
/// Queries are immutable once built. A [`Serializer`](crate::backend::serializer::Serializer) may rewrite
/// the ids of a query into their physical form exactly once; after that the query is
/// [`rewritten`](Self::rewritten) and further rewrites leave it unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    ty: HugeType,
    ids: Vec<Id>,
    conditions: Vec<Condition>,
    limit: Option<usize>,
    rewritten: bool,
}

impl Query {
    /// Query every entry of type `ty`.
    pub fn new(ty: HugeType) -> Self {
        Self {
            ty,
            ids: Vec::new(),
            conditions: Vec::new(),
            limit: None,
            rewritten: false,
        }
    }

    /// Query the entry of type `ty` with id `id`.
    pub fn by_id(ty: HugeType, id: impl Into<Id>) -> Self {
        Self::new(ty).id(id)
    }

    /// Restrict the query to `id`, in addition to ids already given.
    pub fn id(mut self, id: impl Into<Id>) -> Self {
        self.ids.push(id.into());
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ty(&self) -> HugeType {
        self.ty
    }

    pub fn ids(&self) -> &[Id] {
        &self.ids
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn get_limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn rewritten(&self) -> bool {
        self.rewritten
    }

    /// Whether this query selects specific ids rather than scanning its type.
    pub fn is_id_query(&self) -> bool {
        !self.ids.is_empty()
    }

    /// Whether `entry` is selected by this query, ignoring its limit.
    pub fn matches(&self, entry: &BackendEntry) -> bool {
        entry.ty() == self.ty
            && (self.ids.is_empty() || self.ids.contains(entry.id()))
            && self.conditions.iter().all(|condition| condition.test(entry))
    }

    /// Apply `encode` to every id this query mentions, and mark the query rewritten. Does nothing if the
    /// query is already rewritten.
    pub fn rewrite_ids(mut self, encode: impl Fn(&Id) -> Id) -> Self {
        if self.rewritten {
            return self;
        }
        self.ids = self.ids.iter().map(&encode).collect();
        self.conditions = self
            .conditions
            .into_iter()
            .map(|condition| match condition {
                Condition::IdRange { start, end } => Condition::IdRange {
                    start: start.as_ref().map(&encode),
                    end: end.as_ref().map(&encode),
                },
                other => other,
            })
            .collect();
        self.rewritten = true;
        self
    }
}

impl Display for Query {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Query(type={}", self.ty)?;
        if !self.ids.is_empty() {
            write!(f, ", ids={:?}", self.ids)?;
        }
        if !self.conditions.is_empty() {
            write!(f, ", conditions={:?}", self.conditions)?;
        }
        if let Some(limit) = self.limit {
            write!(f, ", limit={}", limit)?;
        }
        write!(f, ")")
    }
}
