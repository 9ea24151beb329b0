/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the group's
//! [configuration](crate::consensus::configuration::ConsensusConfiguration).
//!
//! replistore logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least three values. The first three values
//! are always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//! 3. The [group](crate::types::data_types::GroupId) that emitted the event.
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [SubmitCommand](crate::events::SubmitCommandEvent) is printed:
//!
//! ```text
//! SubmitCommand, 1701329264, graph-g, 12, Mutate, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The fourth value is the log index the command was appended at.
//! - The fifth value is the name of the command.
//! - The sixth value is the first seven characters of the Base64 encoding of the hash of the encoded
//!   command.

use std::{sync::Arc, time::SystemTime};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};

use crate::{event_bus::HandlerPtr, events::*};

// Names of each event in PascalCase for printing:
pub const CREATE_GROUP: &str = "CreateGroup";
pub const SUBMIT_COMMAND: &str = "SubmitCommand";
pub const COMMIT_ENTRY: &str = "CommitEntry";
pub const APPLY_COMMAND: &str = "ApplyCommand";
pub const REJECT_COMMAND: &str = "RejectCommand";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> HandlerPtr<Self>;
}

impl Logger for CreateGroupEvent {
    fn get_logger() -> HandlerPtr<Self> {
        let logger = |create_group_event: &CreateGroupEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CREATE_GROUP,
                secs_since_unix_epoch(create_group_event.timestamp),
                create_group_event.group,
                create_group_event.followers
            )
        };
        Arc::new(logger)
    }
}

impl Logger for SubmitCommandEvent {
    fn get_logger() -> HandlerPtr<Self> {
        let logger = |submit_command_event: &SubmitCommandEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SUBMIT_COMMAND,
                secs_since_unix_epoch(submit_command_event.timestamp),
                submit_command_event.group,
                submit_command_event.index,
                submit_command_event.command,
                first_seven_base64_chars(&submit_command_event.digest.bytes())
            )
        };
        Arc::new(logger)
    }
}

impl Logger for CommitEntryEvent {
    fn get_logger() -> HandlerPtr<Self> {
        let logger = |commit_entry_event: &CommitEntryEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMMIT_ENTRY,
                secs_since_unix_epoch(commit_entry_event.timestamp),
                commit_entry_event.group,
                commit_entry_event.index,
                commit_entry_event.acks
            )
        };
        Arc::new(logger)
    }
}

impl Logger for ApplyCommandEvent {
    fn get_logger() -> HandlerPtr<Self> {
        let logger = |apply_command_event: &ApplyCommandEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                APPLY_COMMAND,
                secs_since_unix_epoch(apply_command_event.timestamp),
                apply_command_event.group,
                apply_command_event.index,
                apply_command_event.command,
                if apply_command_event.success { "ok" } else { "failed" }
            )
        };
        Arc::new(logger)
    }
}

impl Logger for RejectCommandEvent {
    fn get_logger() -> HandlerPtr<Self> {
        let logger = |reject_command_event: &RejectCommandEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                REJECT_COMMAND,
                secs_since_unix_epoch(reject_command_event.timestamp),
                reject_command_event.group,
                reject_command_event.command,
                reject_command_event.reason
            )
        };
        Arc::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
