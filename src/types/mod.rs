//! Value types shared by the backend contract, the transaction engine, and the consensus wrapper.
//!
//! None of these types have any behavior beyond construction, inspection, and (for the types that cross
//! the replicated log) serialization. Stores, transactions, and consensus groups are defined in their
//! own modules.

pub mod crypto_primitives;

pub mod data_types;

pub mod entry;

pub mod features;

pub mod query;

pub mod update_sets;
