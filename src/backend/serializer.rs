/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Translation of logical ids into the physical form a store keys its entries by.
//!
//! A [`Transaction`](crate::transaction::Transaction) passes every query and every id-only deletion
//! through its serializer before the store sees it. Stores never see logical ids that a serializer
//! would have rewritten.

use crate::types::{
    data_types::{HugeType, Id},
    entry::BackendEntry,
    query::Query,
};

/// Collaborator that encodes logical ids into physical ids.
///
/// Only [`encode_id`](Self::encode_id) is required. The provided methods derive queries and entries
/// from it, and must not be overridden in a way that makes [`write_query`](Self::write_query)
/// non-idempotent.
pub trait Serializer: Send + Sync {
    /// Encode a logical id into its physical form. Encoding a physical id must return it unchanged.
    fn encode_id(&self, id: &Id) -> Id;

    /// Rewrite every id in `query` into its physical form. A query that was already rewritten is
    /// returned as is.
    fn write_query(&self, query: Query) -> Query {
        query.rewrite_ids(|id| self.encode_id(id))
    }

    /// Build the (column-less) entry that identifies the element `(ty, id)` in the store, e.g. to delete
    /// it.
    fn write_id(&self, ty: HugeType, id: &Id) -> BackendEntry {
        BackendEntry::new(ty, self.encode_id(id))
    }
}

/// Serializer for stores that key entries by logical ids directly.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentitySerializer;

impl Serializer for IdentitySerializer {
    fn encode_id(&self, id: &Id) -> Id {
        id.clone()
    }
}

/// Serializer that encodes every id into order-preserving bytes.
///
/// # Encoding
///
/// - `Number(n)`: `[0x01]` followed by the big-endian bytes of `n` with its sign bit flipped, so that
///   byte-wise order equals numeric order.
/// - `Text(s)`: `[0x02]` followed by the UTF-8 bytes of `s`.
/// - `Bytes(b)`: unchanged. Byte ids are already physical.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinarySerializer;

const NUMBER_PREFIX: u8 = 0x01;
const TEXT_PREFIX: u8 = 0x02;

impl BinarySerializer {
    /// Recover the logical id an id produced by [`encode_id`](Serializer::encode_id) was encoded from.
    /// Returns `None` if `id` is not in the physical form this serializer produces.
    pub fn decode_id(&self, id: &Id) -> Option<Id> {
        let bytes = match id {
            Id::Bytes(bytes) => bytes,
            _ => return None,
        };
        match bytes.split_first() {
            Some((&NUMBER_PREFIX, rest)) => {
                let be: [u8; 8] = rest.try_into().ok()?;
                Some(Id::Number((u64::from_be_bytes(be) ^ (1 << 63)) as i64))
            }
            Some((&TEXT_PREFIX, rest)) => String::from_utf8(rest.to_vec()).ok().map(Id::Text),
            _ => None,
        }
    }
}

impl Serializer for BinarySerializer {
    fn encode_id(&self, id: &Id) -> Id {
        match id {
            Id::Number(int) => {
                let mut bytes = Vec::with_capacity(9);
                bytes.push(NUMBER_PREFIX);
                bytes.extend_from_slice(&((*int as u64) ^ (1 << 63)).to_be_bytes());
                Id::Bytes(bytes)
            }
            Id::Text(text) => {
                let mut bytes = Vec::with_capacity(text.len() + 1);
                bytes.push(TEXT_PREFIX);
                bytes.extend_from_slice(text.as_bytes());
                Id::Bytes(bytes)
            }
            Id::Bytes(_) => id.clone(),
        }
    }
}
