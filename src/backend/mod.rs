/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The store contract, and the pieces a physical engine needs to satisfy it.
//!
//! # Pluggable persistence
//!
//! - Data is kept by a physical storage engine, chosen by the library user.
//! - replistore merely requires that whatever the user provides implements the contract of a
//!   [`BackendStore`](pluggables::BackendStore): lifecycle, administration, transaction boundaries,
//!   batched mutation, queries, counters, and introspection.
//! - The same contract is implemented by the [replicated wrapper](crate::consensus::replicated_store),
//!   so a [`Transaction`](crate::transaction::Transaction) never knows whether its writes go through a
//!   consensus group.
//! - [`MemoryStore`](memory::MemoryStore) is a volatile implementation of the contract, usable both as a
//!   reference and as the engine underneath replicated stores in single-process deployments.
//!
//! # Failures
//!
//! Every operation reports failure through [`BackendError`](error::BackendError). An engine failure is
//! wrapped with its original cause attached, so callers can catch one error type and still inspect
//! what went wrong underneath.
//!
//! # Physical ids
//!
//! A store keys entries by whatever ids it is handed. The [`serializer`] module defines how a
//! transaction translates logical ids into the physical form a given engine expects before queries and
//! id-only deletions reach the store.

pub mod config;

pub mod error;

pub mod memory;

pub mod pluggables;

pub mod serializer;
