/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! replistore is the storage layer of a multi-tenant graph database. It offers:
//! 1. A uniform [store contract](backend::pluggables::BackendStore) that any physical storage engine can
//!    implement, and a volatile [reference engine](backend::memory::MemoryStore),
//! 2. [Transactions](transaction::Transaction) that buffer writes and commit them all-or-nothing,
//! 3. Transparent [replication](consensus) of every state-mutating store call through a consensus
//!    group, applied in one total order on every replica before the caller continues,
//! 4. and a [registry](consensus::registry::GroupRegistry) that guarantees one group per store
//!    identity, however many threads open the store at once.

pub mod backend;

pub mod consensus;

pub mod event_bus;

pub mod events;

pub mod logging;

pub mod provider;

pub mod transaction;

pub mod types;
