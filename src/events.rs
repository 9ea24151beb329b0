/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events emitted by consensus groups, for event handling and logging.
//!
//! Note: an event for a given action indicates that the action has been completed.
//!
//! Events are published by the leader thread of a [group](crate::consensus::group::ConsensusGroup) and
//! delivered to handlers on a separate [event bus](crate::event_bus) thread, so handlers never delay
//! replication. Register handlers through the setters of
//! [`ConsensusConfiguration`](crate::consensus::configuration::ConsensusConfiguration).

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::types::{crypto_primitives::CryptoHash, data_types::GroupId};

pub enum Event {
    CreateGroup(CreateGroupEvent),
    SubmitCommand(SubmitCommandEvent),
    CommitEntry(CommitEntryEvent),
    ApplyCommand(ApplyCommandEvent),
    RejectCommand(RejectCommandEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The event bus only disconnects when the group is being dropped.
            let _ = event_publisher.send(event);
        }
    }
}

/// A group was started: its leader and followers are ready to accept commands.
pub struct CreateGroupEvent {
    pub timestamp: SystemTime,
    pub group: GroupId,
    pub followers: usize,
}

/// The leader accepted a command and appended it to its log.
pub struct SubmitCommandEvent {
    pub timestamp: SystemTime,
    pub group: GroupId,
    pub index: u64,
    pub command: &'static str,
    pub digest: CryptoHash,
}

/// A majority of the group holds the entry at `index`, so it is committed.
pub struct CommitEntryEvent {
    pub timestamp: SystemTime,
    pub group: GroupId,
    pub index: u64,
    pub acks: usize,
}

/// The leader applied the committed entry at `index` to its store.
pub struct ApplyCommandEvent {
    pub timestamp: SystemTime,
    pub group: GroupId,
    pub index: u64,
    pub command: &'static str,
    pub success: bool,
}

/// The leader gave up on a command: it is not the leader, or a majority could not be reached in time.
pub struct RejectCommandEvent {
    pub timestamp: SystemTime,
    pub group: GroupId,
    pub command: &'static str,
    pub reason: String,
}
