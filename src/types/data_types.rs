/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to identify and carry stored bytes, and do not have any major "active" behavior.

use std::fmt::{self, Debug, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

/// Opaque identifier of a stored element.
///
/// Ids are owned by the caller and never mutated after creation. They are totally ordered: ids of the
/// same variant compare by their inner value, and ids of different variants compare by variant in
/// declaration order (`Number < Text < Bytes`).
///
/// `Bytes` is the "physical" form: the form a [`Serializer`](crate::backend::serializer::Serializer)
/// may rewrite logical ids into before they reach a store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub enum Id {
    Number(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Id {
    /// Whether this id carries no identifying content. Stores reject entries with empty ids.
    pub fn is_empty(&self) -> bool {
        match self {
            Id::Number(_) => false,
            Id::Text(text) => text.is_empty(),
            Id::Bytes(bytes) => bytes.is_empty(),
        }
    }
}

impl From<i64> for Id {
    fn from(int: i64) -> Self {
        Id::Number(int)
    }
}

impl From<&str> for Id {
    fn from(text: &str) -> Self {
        Id::Text(text.to_string())
    }
}

impl From<String> for Id {
    fn from(text: String) -> Self {
        Id::Text(text)
    }
}

impl From<Vec<u8>> for Id {
    fn from(bytes: Vec<u8>) -> Self {
        Id::Bytes(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(int) => write!(f, "{}", int),
            Id::Text(text) => write!(f, "{}", text),
            Id::Bytes(bytes) => {
                write!(f, "0x")?;
                bytes.iter().try_for_each(|byte| write!(f, "{:02x}", byte))
            }
        }
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(int) => write!(f, "Id::Number({})", int),
            Id::Text(text) => write!(f, "Id::Text({:?})", text),
            Id::Bytes(_) => write!(f, "Id::Bytes({})", self),
        }
    }
}

/// Type tag of a stored element.
///
/// Schema types describe the shape of the graph, graph types are the graph itself, and index types are
/// derived entries maintained alongside graph types.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum HugeType {
    VertexLabel,
    EdgeLabel,
    PropertyKey,
    IndexLabel,
    Vertex,
    EdgeOut,
    EdgeIn,
    SecondaryIndex,
    RangeIndex,
    SearchIndex,
    Task,
}

impl HugeType {
    /// Every variant, in declaration order.
    pub const ALL: [HugeType; 11] = [
        HugeType::VertexLabel,
        HugeType::EdgeLabel,
        HugeType::PropertyKey,
        HugeType::IndexLabel,
        HugeType::Vertex,
        HugeType::EdgeOut,
        HugeType::EdgeIn,
        HugeType::SecondaryIndex,
        HugeType::RangeIndex,
        HugeType::SearchIndex,
        HugeType::Task,
    ];

    pub const fn is_schema(&self) -> bool {
        matches!(
            self,
            HugeType::VertexLabel | HugeType::EdgeLabel | HugeType::PropertyKey | HugeType::IndexLabel
        )
    }

    pub const fn is_graph(&self) -> bool {
        matches!(self, HugeType::Vertex | HugeType::EdgeOut | HugeType::EdgeIn)
    }

    pub const fn is_index(&self) -> bool {
        matches!(
            self,
            HugeType::SecondaryIndex | HugeType::RangeIndex | HugeType::SearchIndex
        )
    }

    /// Stable one-byte code of this type, used in physical key encodings.
    pub const fn code(&self) -> u8 {
        match self {
            HugeType::VertexLabel => 1,
            HugeType::EdgeLabel => 2,
            HugeType::PropertyKey => 3,
            HugeType::IndexLabel => 4,
            HugeType::Vertex => 101,
            HugeType::EdgeOut => 130,
            HugeType::EdgeIn => 140,
            HugeType::SecondaryIndex => 150,
            HugeType::RangeIndex => 160,
            HugeType::SearchIndex => 170,
            HugeType::Task => 180,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: u8) -> Option<HugeType> {
        HugeType::ALL.into_iter().find(|ty| ty.code() == code)
    }
}

impl Display for HugeType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

/// Identity of an entry: the pair `(type, id)`. Two entries with the same key are the same entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryKey {
    pub ty: HugeType,
    pub id: Id,
}

impl EntryKey {
    pub fn new(ty: HugeType, id: Id) -> Self {
        Self { ty, id }
    }
}

impl Display for EntryKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ty, self.id)
    }
}

/// One column (sub-value) of a [`BackendEntry`](super::entry::BackendEntry).
#[derive(Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BackendColumn {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl BackendColumn {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Identity of a consensus group: `database + "-" + store`.
///
/// Every logical store is replicated by exactly one group, and every group is identified by exactly one
/// `GroupId` for the lifetime of the process.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(String);

impl GroupId {
    /// Create the `GroupId` of the store named `store` in `database`.
    pub fn new(database: &str, store: &str) -> Self {
        Self(format!("{}-{}", database, store))
    }

    /// Get the string form of this `GroupId`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}
