/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The unit of replication: one state-mutating store call, in a form that can cross the replicated log.
//!
//! ## Encoding
//!
//! A command is encoded as its one-byte opcode followed by its payload:
//!
//! |Command|Opcode|Payload|
//! |---|---|---|
//! |[`Init`](StoreCommand::Init)|[`INIT`]|empty|
//! |[`Truncate`](StoreCommand::Truncate)|[`TRUNCATE`]|empty|
//! |[`BeginTx`](StoreCommand::BeginTx)|[`BEGIN_TX`]|borsh-serialized [`SessionId`]|
//! |[`CommitTx`](StoreCommand::CommitTx)|[`COMMIT_TX`]|borsh-serialized [`SessionId`]|
//! |[`RollbackTx`](StoreCommand::RollbackTx)|[`ROLLBACK_TX`]|borsh-serialized [`SessionId`]|
//! |[`Clear`](StoreCommand::Clear)|[`CLEAR`]|one flag byte: `1` to clear the space, `0` otherwise|
//! |[`Mutate`](StoreCommand::Mutate)|[`MUTATE`]|borsh-serialized `(SessionId, MutationBytes)`|
//! |[`IncrCounter`](StoreCommand::IncrCounter)|[`INCR_COUNTER`]|borsh-serialized [`IncrCounter`]|
//!
//! Every encoded command carries everything needed to replay it, so a replica can apply it without any
//! context beyond the store it applies it to.
//!
//! ## Sessions
//!
//! Many callers share one replicated log, so the transaction commands of different callers interleave
//! in it. Transaction commands and mutations therefore name the [`SessionId`] of the caller that
//! issued them, and the [state machine](super::state_machine::StoreStateMachine) stages each session
//! separately.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

use crate::types::{
    data_types::HugeType,
    update_sets::{BackendMutation, MutationBytes},
};

pub const INIT: u8 = 1;
pub const TRUNCATE: u8 = 2;
pub const BEGIN_TX: u8 = 3;
pub const COMMIT_TX: u8 = 4;
pub const ROLLBACK_TX: u8 = 5;
pub const CLEAR: u8 = 6;
pub const MUTATE: u8 = 7;
pub const INCR_COUNTER: u8 = 8;

/// Identifies the caller a transaction command belongs to. Unique within a process.
pub type SessionId = u64;

/// Arguments of a replicated `increase_counter` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct IncrCounter {
    pub ty: HugeType,
    pub increment: i64,
}

/// One state-mutating call on a [`BackendStore`](crate::backend::pluggables::BackendStore).
#[derive(Clone, Debug, PartialEq)]
pub enum StoreCommand {
    Init,
    Truncate,
    BeginTx { session: SessionId },
    CommitTx { session: SessionId },
    RollbackTx { session: SessionId },
    Clear { clear_space: bool },
    /// Staged in `session` if it has a transaction open, applied immediately otherwise.
    Mutate {
        session: SessionId,
        mutation: BackendMutation,
    },
    IncrCounter(IncrCounter),
}

/// Why some bytes could not be decoded into a [`StoreCommand`].
#[derive(Debug, Error)]
pub enum CommandDecodeError {
    #[error("command bytes are empty")]
    Empty,

    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("malformed payload for opcode {opcode}")]
    MalformedPayload {
        opcode: u8,
        #[source]
        source: io::Error,
    },
}

impl StoreCommand {
    pub fn opcode(&self) -> u8 {
        match self {
            StoreCommand::Init => INIT,
            StoreCommand::Truncate => TRUNCATE,
            StoreCommand::BeginTx { .. } => BEGIN_TX,
            StoreCommand::CommitTx { .. } => COMMIT_TX,
            StoreCommand::RollbackTx { .. } => ROLLBACK_TX,
            StoreCommand::Clear { .. } => CLEAR,
            StoreCommand::Mutate { .. } => MUTATE,
            StoreCommand::IncrCounter(_) => INCR_COUNTER,
        }
    }

    /// Human-readable name of the command, used in logs and events.
    pub fn name(&self) -> &'static str {
        match self {
            StoreCommand::Init => "Init",
            StoreCommand::Truncate => "Truncate",
            StoreCommand::BeginTx { .. } => "BeginTx",
            StoreCommand::CommitTx { .. } => "CommitTx",
            StoreCommand::RollbackTx { .. } => "RollbackTx",
            StoreCommand::Clear { .. } => "Clear",
            StoreCommand::Mutate { .. } => "Mutate",
            StoreCommand::IncrCounter(_) => "IncrCounter",
        }
    }

    /// Encode this command into bytes that can be appended to the replicated log.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut bytes = vec![self.opcode()];
        match self {
            StoreCommand::Init | StoreCommand::Truncate => (),
            StoreCommand::BeginTx { session }
            | StoreCommand::CommitTx { session }
            | StoreCommand::RollbackTx { session } => session.serialize(&mut bytes)?,
            StoreCommand::Clear { clear_space } => bytes.push(u8::from(*clear_space)),
            StoreCommand::Mutate { session, mutation } => {
                (*session, MutationBytes::from(mutation)).serialize(&mut bytes)?
            }
            StoreCommand::IncrCounter(incr) => incr.serialize(&mut bytes)?,
        }
        Ok(bytes)
    }

    /// Decode bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<StoreCommand, CommandDecodeError> {
        let (&opcode, payload) = bytes.split_first().ok_or(CommandDecodeError::Empty)?;
        let malformed = |source: io::Error| CommandDecodeError::MalformedPayload { opcode, source };
        let expect_empty = |command: StoreCommand| {
            if payload.is_empty() {
                Ok(command)
            } else {
                Err(malformed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unexpected payload",
                )))
            }
        };

        match opcode {
            INIT => expect_empty(StoreCommand::Init),
            TRUNCATE => expect_empty(StoreCommand::Truncate),
            BEGIN_TX => SessionId::try_from_slice(payload)
                .map(|session| StoreCommand::BeginTx { session })
                .map_err(malformed),
            COMMIT_TX => SessionId::try_from_slice(payload)
                .map(|session| StoreCommand::CommitTx { session })
                .map_err(malformed),
            ROLLBACK_TX => SessionId::try_from_slice(payload)
                .map(|session| StoreCommand::RollbackTx { session })
                .map_err(malformed),
            CLEAR => match payload {
                [flag @ (0 | 1)] => Ok(StoreCommand::Clear {
                    clear_space: *flag == 1,
                }),
                _ => Err(malformed(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "expected a single flag byte",
                ))),
            },
            MUTATE => <(SessionId, MutationBytes)>::try_from_slice(payload)
                .map(|(session, bytes)| StoreCommand::Mutate {
                    session,
                    mutation: BackendMutation::from(bytes),
                })
                .map_err(malformed),
            INCR_COUNTER => IncrCounter::try_from_slice(payload)
                .map(StoreCommand::IncrCounter)
                .map_err(malformed),
            unknown => Err(CommandDecodeError::UnknownOpcode(unknown)),
        }
    }
}
