/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Replication of stores through consensus groups.
//!
//! ## Overview
//!
//! Every logical store, identified by its database and store name, is replicated by exactly one
//! [consensus group](group::ConsensusGroup). Groups live in a [registry](registry::GroupRegistry), and
//! are created lazily the first time a [replicated store](replicated_store::ReplicatedStore) over that
//! identity is opened.
//!
//! The flow of a state-mutating call is:
//! 1. The replicated store turns the call into a [`StoreCommand`](command::StoreCommand) and encodes it.
//! 2. The command is submitted to the group's leader. The calling thread blocks.
//! 3. The leader appends the command to its log and replicates it to its followers.
//! 4. Once a majority holds the entry, it is committed, and every replica's
//!    [state machine](state_machine::StoreStateMachine) applies it to its local store, in log order.
//! 5. The calling thread wakes up with the result of the leader's apply.
//!
//! Commands are the only values that cross the log. Reads are served by the local store (see
//! [`ReadMode`](configuration::ReadMode)).
//!
//! ## Failures
//!
//! Every failure of the path above (no leader, no majority within the replication timeout, leadership
//! lost while replicating, an error from the apply path, a submit timeout) reaches the caller as a
//! [`BackendError::Consensus`](crate::backend::error::BackendError::Consensus), carrying the engine
//! error as its source when there is one. A command that cannot be decoded on the apply path is a
//! defect, and panics the replica that applies it.

pub mod command;

pub mod configuration;

pub mod group;

pub mod registry;

pub mod replicated_store;

pub mod state_machine;
