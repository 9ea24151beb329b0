/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of consensus groups.
//!
//! The configuration is built using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     ConsensusConfiguration::builder()
//!     .submit_timeout(Duration::from_secs(5))
//!     .replication_timeout(Duration::from_millis(500))
//!     .read_mode(ReadMode::Linearizable)
//!     .max_log_entries(1024)
//!     .log_events(true)
//!     .on_commit_entry(|event| println!("committed {}", event.index))
//!     .build()
//! ```
//!
//! ### Optional setters
//!
//! Every setter is optional. The event handler setters register a user-defined handler for an event
//! from [crate::events]:
//! - `.on_create_group(...)`
//! - `.on_submit_command(...)`
//! - `.on_commit_entry(...)`
//! - `.on_apply_command(...)`
//! - `.on_reject_command(...)`
//!
//! A configuration is cloned into every group built from it, and so are its handlers.

use std::{fmt, sync::Arc, time::Duration};

use typed_builder::TypedBuilder;

use crate::{event_bus::HandlerPtr, events::*};

/// How a [`ReplicatedStore`](super::replicated_store::ReplicatedStore) serves reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadMode {
    /// Read the local store directly. A read may miss writes that were submitted but not yet applied
    /// locally.
    #[default]
    Local,

    /// Before reading the local store, wait until every command the leader committed before the read
    /// was issued has been applied locally.
    Linearizable,
}

/// Stores the user-defined parameters of a consensus group, that is:
/// 1. The submit timeout: the longest a caller blocks waiting for its command to be committed and
///    applied.
/// 2. The replication timeout: the longest the leader waits for a majority of the group to acknowledge
///    an entry before giving up on it.
/// 3. The [read mode](ReadMode).
/// 4. The log bound: the most entries the leader keeps for followers that are behind. A follower that
///    falls further behind than that is detached from the group.
/// 5. The "Log Events" flag, if set to "true" then events are [logged](crate::logging).
/// 6. Optional event handlers.
///
/// ## Timeouts
///
/// `submit_timeout` should be longer than `replication_timeout`, so that a caller observes the leader's
/// own verdict on a command rather than timing out while the leader is still waiting for acknowledgements.
#[derive(Clone, TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ConsensusConfiguration]. Every setter is optional.

    Optional:
    - `.submit_timeout(...)`
    - `.replication_timeout(...)`
    - `.read_mode(...)`
    - `.max_log_entries(...)`
    - `.log_events(...)`
    - `.on_create_group(...)`
    - `.on_submit_command(...)`
    - `.on_commit_entry(...)`
    - `.on_apply_command(...)`
    - `.on_reject_command(...)`
"))]
pub struct ConsensusConfiguration {
    #[builder(
        default = Duration::from_secs(10),
        setter(doc = "Set how long a caller waits for its command to be applied. Optional, defaults to 10 seconds.")
    )]
    pub submit_timeout: Duration,
    #[builder(
        default = Duration::from_secs(2),
        setter(doc = "Set how long the leader waits for a majority to acknowledge an entry. Optional, defaults to 2 seconds.")
    )]
    pub replication_timeout: Duration,
    #[builder(default, setter(doc = "Set how reads are served. Optional, defaults to `ReadMode::Local`."))]
    pub read_mode: ReadMode,
    #[builder(
        default = 4096,
        setter(doc = "Set how many entries the leader keeps for lagging followers. Optional, defaults to 4096.")
    )]
    pub max_log_entries: usize,
    #[builder(default = false, setter(doc = "Enable logging of events? Optional, defaults to false."))]
    pub log_events: bool,
    #[builder(default, setter(transform = |handler: impl Fn(&CreateGroupEvent) + Send + Sync + 'static| Some(Arc::new(handler) as HandlerPtr<CreateGroupEvent>),
    doc = "Register a handler closure to be invoked after a group is started. Optional."))]
    pub on_create_group: Option<HandlerPtr<CreateGroupEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SubmitCommandEvent) + Send + Sync + 'static| Some(Arc::new(handler) as HandlerPtr<SubmitCommandEvent>),
    doc = "Register a handler closure to be invoked after the leader appends a command to its log. Optional."))]
    pub on_submit_command: Option<HandlerPtr<SubmitCommandEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitEntryEvent) + Send + Sync + 'static| Some(Arc::new(handler) as HandlerPtr<CommitEntryEvent>),
    doc = "Register a handler closure to be invoked after an entry is committed by a majority. Optional."))]
    pub on_commit_entry: Option<HandlerPtr<CommitEntryEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyCommandEvent) + Send + Sync + 'static| Some(Arc::new(handler) as HandlerPtr<ApplyCommandEvent>),
    doc = "Register a handler closure to be invoked after the leader applies a committed command. Optional."))]
    pub on_apply_command: Option<HandlerPtr<ApplyCommandEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectCommandEvent) + Send + Sync + 'static| Some(Arc::new(handler) as HandlerPtr<RejectCommandEvent>),
    doc = "Register a handler closure to be invoked after the leader rejects a command. Optional."))]
    pub on_reject_command: Option<HandlerPtr<RejectCommandEvent>>,
}

impl Default for ConsensusConfiguration {
    fn default() -> Self {
        ConsensusConfiguration::builder().build()
    }
}

impl fmt::Debug for ConsensusConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusConfiguration")
            .field("submit_timeout", &self.submit_timeout)
            .field("replication_timeout", &self.replication_timeout)
            .field("read_mode", &self.read_mode)
            .field("max_log_entries", &self.max_log_entries)
            .field("log_events", &self.log_events)
            .finish_non_exhaustive()
    }
}
