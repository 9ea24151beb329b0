/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An in-process replicated log, replicating one logical store.
//!
//! A [`ConsensusGroup`] is a leader replica and zero or more follower replicas, each running on a
//! thread of its own and each owning a [`StateMachine`]. Threads talk to each other only through
//! channels. The leader is the sole writer of the group's log.
//!
//! ## Submitting a command
//!
//! A caller [submits](ConsensusGroup::submit) encoded command bytes and blocks until the leader reports
//! back through a one-shot completion channel. The leader thread handles proposals one at a time, in
//! the order it receives them:
//! 1. If the local replica is not the leader, reject the proposal.
//! 2. Append an entry carrying the bytes and their [digest](CryptoHash) to the log.
//! 3. Send the entry to every reachable follower, preceded by any earlier entries it is missing.
//!    Followers verify the digest before appending the entry and acknowledging it.
//! 4. Wait up to the replication timeout for acknowledgements from enough followers that, together
//!    with the leader, they form a majority of the group. If they do not arrive, or leadership was lost
//!    in the meantime, remove the entry from the log, tell followers to do the same, and reject the
//!    proposal.
//! 5. Otherwise the entry is committed. Apply it to the leader's state machine, tell followers to
//!    apply everything up to it, and complete the proposal with the result of the local apply.
//!
//! Because proposals are handled one at a time, entries are committed and applied in one total order
//! on every replica, whatever the order callers submitted them in.
//!
//! ## Read barrier
//!
//! [`read_index`](ConsensusGroup::read_index) passes through the same proposal queue. By the time the
//! leader handles it, every command committed before it has been applied by the leader, so a local
//! read made after `read_index` returns observes them.
//!
//! ## Fault injection
//!
//! Leadership can be given up and reclaimed with [`resign`](ConsensusGroup::resign) and
//! [`campaign`](ConsensusGroup::campaign). A follower can be cut off from the leader with
//! [`set_follower_reachable`](ConsensusGroup::set_follower_reachable). An unreachable follower receives
//! nothing and acknowledges nothing, and is caught up on the first proposal after it becomes reachable
//! again.
//!
//! ## Log compaction
//!
//! After each commit the leader drops the committed entries that every attached follower has already
//! received, and each follower drops the entries it has applied. A follower that stays unreachable
//! holds entries back on the leader, up to
//! [`max_log_entries`](ConsensusConfiguration::max_log_entries) of them. Past that bound the leader
//! compacts anyway and detaches the follower: a detached follower is sent nothing more, and the group
//! must be rebuilt to bring it back.

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use parking_lot::Mutex;

use crate::{
    backend::{
        error::{BackendError, Result},
        pluggables::BackendStore,
    },
    event_bus::{start_event_bus, EventHandlers},
    events::*,
    types::{crypto_primitives::CryptoHash, data_types::GroupId},
};

use super::{
    command::StoreCommand, configuration::ConsensusConfiguration, state_machine::StateMachine,
};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Handle to the threads of a consensus group. When this value is dropped, all of the group's threads
/// are shut down.
pub struct ConsensusGroup {
    id: GroupId,
    config: ConsensusConfiguration,
    proposals: Mutex<Sender<Proposal>>,
    is_leader: Arc<AtomicBool>,
    commit_index: Arc<AtomicU64>,
    log_len: Arc<AtomicUsize>,
    followers: Vec<FollowerHandle>,
    store: Option<Arc<dyn BackendStore>>,
    threads: Mutex<Vec<(Sender<()>, JoinHandle<()>)>>,
}

struct FollowerHandle {
    reachable: Arc<AtomicBool>,
    detached: Arc<AtomicBool>,
    applied_index: Arc<AtomicU64>,
}

impl ConsensusGroup {
    /// Start the threads of the group `id`: a leader applying to `state_machine`, and one follower for
    /// each of `follower_state_machines`.
    pub fn start(
        id: GroupId,
        config: ConsensusConfiguration,
        state_machine: Box<dyn StateMachine>,
        follower_state_machines: Vec<Box<dyn StateMachine>>,
    ) -> ConsensusGroup {
        let mut threads = Vec::new();

        let event_handlers = EventHandlers::new(
            config.log_events,
            config.on_create_group.clone(),
            config.on_submit_command.clone(),
            config.on_commit_entry.clone(),
            config.on_apply_command.clone(),
            config.on_reject_command.clone(),
        );
        let event_publisher = if !event_handlers.is_empty() {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
            threads.push((shutdown, event_bus));
            Some(event_publisher)
        } else {
            None
        };

        let (ack_sender, acks) = mpsc::channel();
        let mut followers = Vec::new();
        let mut links = Vec::new();
        for (follower, state_machine) in follower_state_machines.into_iter().enumerate() {
            let (sender, inbox) = mpsc::channel();
            let (shutdown, shutdown_receiver) = mpsc::channel();
            let handle = FollowerHandle {
                reachable: Arc::new(AtomicBool::new(true)),
                detached: Arc::new(AtomicBool::new(false)),
                applied_index: Arc::new(AtomicU64::new(0)),
            };
            let replica = FollowerReplica {
                group: id.clone(),
                follower,
                state_machine,
                log: ReplicatedLog::new(),
                applied_index: Arc::clone(&handle.applied_index),
                acks: ack_sender.clone(),
            };
            links.push(FollowerLink {
                sender,
                reachable: Arc::clone(&handle.reachable),
                detached: Arc::clone(&handle.detached),
                next_index: 1,
            });
            followers.push(handle);
            threads.push((shutdown, replica.start(inbox, shutdown_receiver)));
        }

        Event::publish(
            &event_publisher,
            Event::CreateGroup(CreateGroupEvent {
                timestamp: SystemTime::now(),
                group: id.clone(),
                followers: followers.len(),
            }),
        );

        let is_leader = Arc::new(AtomicBool::new(true));
        let commit_index = Arc::new(AtomicU64::new(0));
        let log_len = Arc::new(AtomicUsize::new(0));
        let (proposal_sender, proposal_receiver) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let leader = LeaderReplica {
            group: id.clone(),
            replication_timeout: config.replication_timeout,
            max_log_entries: config.max_log_entries,
            state_machine,
            log: ReplicatedLog::new(),
            log_len: Arc::clone(&log_len),
            sequence: 0,
            followers: links,
            acks,
            is_leader: Arc::clone(&is_leader),
            commit_index: Arc::clone(&commit_index),
            event_publisher,
        };
        // The leader goes first, so that it stops sending before the followers stop receiving.
        threads.insert(0, (shutdown, leader.start(proposal_receiver, shutdown_receiver)));

        log::debug!(
            "Consensus group '{}' started with {} followers",
            id,
            followers.len()
        );

        ConsensusGroup {
            id,
            config,
            proposals: Mutex::new(proposal_sender),
            is_leader,
            commit_index,
            log_len,
            followers,
            store: None,
            threads: Mutex::new(threads),
        }
    }

    /// Record `store` as the store whose writes this group replicates.
    pub fn with_store(mut self, store: Arc<dyn BackendStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The store recorded by [`with_store`](Self::with_store), if any.
    pub fn store(&self) -> Option<&Arc<dyn BackendStore>> {
        self.store.as_ref()
    }

    pub fn id(&self) -> &GroupId {
        &self.id
    }

    pub fn config(&self) -> &ConsensusConfiguration {
        &self.config
    }

    /// Append `bytes` to the log, and block until they are committed and applied by the leader, the
    /// leader rejects them, or the submit timeout passes. `name` labels the entry in events and errors.
    ///
    /// A timed-out submission may still be committed afterwards.
    pub fn submit(&self, name: &'static str, bytes: Vec<u8>) -> Result<()> {
        let (completion, result) = mpsc::sync_channel(1);
        self.propose(Proposal::Command {
            name,
            bytes,
            completion,
        })?;
        self.wait(name, result)
    }

    /// Encode `command` and [`submit`](Self::submit) it.
    pub fn submit_command(&self, command: &StoreCommand) -> Result<()> {
        let bytes = command.to_bytes()?;
        self.submit(command.name(), bytes)
    }

    /// Block until every command committed before this call has been applied by the leader, and return
    /// the index of the last of them. Fails if the local replica is not the leader.
    pub fn read_index(&self) -> Result<u64> {
        let (completion, result) = mpsc::sync_channel(1);
        self.propose(Proposal::ReadIndex { completion })?;
        self.wait("ReadIndex", result)
    }

    fn propose(&self, proposal: Proposal) -> Result<()> {
        self.proposals
            .lock()
            .send(proposal)
            .map_err(|_| BackendError::consensus(&self.id, "group has stopped"))
    }

    fn wait<T>(&self, name: &str, result: Receiver<Result<T>>) -> Result<T> {
        match result.recv_timeout(self.config.submit_timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(BackendError::consensus(
                &self.id,
                format!(
                    "timed out after {:?} waiting for {} to be applied",
                    self.config.submit_timeout, name
                ),
            )),
            Err(RecvTimeoutError::Disconnected) => Err(BackendError::consensus(
                &self.id,
                format!("group stopped before {} completed", name),
            )),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Stop acting as leader. Proposals handled afterwards are rejected.
    pub fn resign(&self) {
        log::info!("Consensus group '{}' resigns leadership", self.id);
        self.is_leader.store(false, Ordering::SeqCst);
    }

    /// Become the leader again.
    pub fn campaign(&self) {
        log::info!("Consensus group '{}' reclaims leadership", self.id);
        self.is_leader.store(true, Ordering::SeqCst);
    }

    /// Index of the last committed entry. `0` if nothing was committed yet.
    pub fn commit_index(&self) -> u64 {
        self.commit_index.load(Ordering::SeqCst)
    }

    /// Number of replicas in the group, including the leader.
    pub fn size(&self) -> usize {
        self.followers.len() + 1
    }

    pub fn follower_count(&self) -> usize {
        self.followers.len()
    }

    /// Number of entries the leader currently keeps in its log.
    pub fn log_len(&self) -> usize {
        self.log_len.load(Ordering::SeqCst)
    }

    /// Whether the follower numbered `follower` fell too far behind and was detached from the group.
    pub fn follower_detached(&self, follower: usize) -> Option<bool> {
        self.followers
            .get(follower)
            .map(|handle| handle.detached.load(Ordering::SeqCst))
    }

    /// Index of the last entry the follower numbered `follower` applied.
    pub fn follower_applied_index(&self, follower: usize) -> Option<u64> {
        self.followers
            .get(follower)
            .map(|handle| handle.applied_index.load(Ordering::SeqCst))
    }

    /// Connect or disconnect the follower numbered `follower` from the leader.
    pub fn set_follower_reachable(&self, follower: usize, reachable: bool) {
        if let Some(handle) = self.followers.get(follower) {
            log::info!(
                "Follower {} of group '{}' is now {}",
                follower,
                self.id,
                if reachable { "reachable" } else { "unreachable" }
            );
            handle.reachable.store(reachable, Ordering::SeqCst);
        }
    }
}

impl Drop for ConsensusGroup {
    fn drop(&mut self) {
        for (shutdown, thread) in self.threads.get_mut().drain(..) {
            let _ = shutdown.send(());
            if thread.join().is_err() {
                log::error!("A thread of consensus group '{}' panicked", self.id);
            }
        }
    }
}

enum Proposal {
    Command {
        name: &'static str,
        bytes: Vec<u8>,
        completion: SyncSender<Result<()>>,
    },
    ReadIndex {
        completion: SyncSender<Result<u64>>,
    },
}

#[derive(Clone)]
struct LogEntry {
    index: u64,
    digest: CryptoHash,
    bytes: Arc<Vec<u8>>,
}

enum ReplicationMessage {
    /// Append `entry`. `sequence` identifies the proposal this message was sent for.
    Append { entry: LogEntry, sequence: u64 },
    /// Apply every entry up to and including this index.
    Commit(u64),
    /// Remove every entry from this index onwards.
    Truncate(u64),
}

struct Ack {
    follower: usize,
    index: u64,
    sequence: u64,
}

// Entries from `first_index` onwards. Everything before `first_index` was compacted away.
struct ReplicatedLog {
    first_index: u64,
    entries: VecDeque<LogEntry>,
}

impl ReplicatedLog {
    fn new() -> Self {
        Self {
            first_index: 1,
            entries: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    /// `first_index - 1` if the log is empty.
    fn last_index(&self) -> u64 {
        self.first_index + self.entries.len() as u64 - 1
    }

    fn get(&self, index: u64) -> Option<&LogEntry> {
        index
            .checked_sub(self.first_index)
            .and_then(|offset| self.entries.get(offset as usize))
    }

    fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
    }

    fn entries_from(&self, index: u64) -> impl Iterator<Item = &LogEntry> {
        self.entries
            .iter()
            .skip(index.saturating_sub(self.first_index) as usize)
    }

    // Remove every entry from `index` onwards.
    fn truncate_from(&mut self, index: u64) {
        self.entries
            .truncate(index.saturating_sub(self.first_index) as usize);
    }

    // Remove every entry up to and including `index`.
    fn compact_through(&mut self, index: u64) {
        while self.first_index <= index && self.entries.pop_front().is_some() {
            self.first_index += 1;
        }
    }
}

struct FollowerLink {
    sender: Sender<ReplicationMessage>,
    reachable: Arc<AtomicBool>,
    detached: Arc<AtomicBool>,
    // Index of the first entry the follower may be missing.
    next_index: u64,
}

struct LeaderReplica {
    group: GroupId,
    replication_timeout: Duration,
    max_log_entries: usize,
    state_machine: Box<dyn StateMachine>,
    log: ReplicatedLog,
    log_len: Arc<AtomicUsize>,
    sequence: u64,
    followers: Vec<FollowerLink>,
    acks: Receiver<Ack>,
    is_leader: Arc<AtomicBool>,
    commit_index: Arc<AtomicU64>,
    event_publisher: Option<Sender<Event>>,
}

impl LeaderReplica {
    fn start(mut self, proposals: Receiver<Proposal>, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match proposals.recv_timeout(POLL_INTERVAL) {
                Ok(Proposal::Command {
                    name,
                    bytes,
                    completion,
                }) => {
                    let result = self.on_command(name, bytes);
                    let _ = completion.send(result);
                }
                Ok(Proposal::ReadIndex { completion }) => {
                    let result = self.on_read_index();
                    let _ = completion.send(result);
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn on_command(&mut self, name: &'static str, bytes: Vec<u8>) -> Result<()> {
        if !self.is_leader.load(Ordering::SeqCst) {
            return Err(self.reject(name, "not leader".to_string()));
        }

        // 1. Append.
        let entry = LogEntry {
            index: self.log.last_index() + 1,
            digest: CryptoHash::digest(&bytes),
            bytes: Arc::new(bytes),
        };
        let index = entry.index;
        self.log.push(entry.clone());
        Event::publish(
            &self.event_publisher,
            Event::SubmitCommand(SubmitCommandEvent {
                timestamp: SystemTime::now(),
                group: self.group.clone(),
                index,
                command: name,
                digest: entry.digest,
            }),
        );

        // 2. Replicate.
        let acks = self.replicate(index);
        let required = (self.followers.len() + 1) / 2;
        if acks < required || !self.is_leader.load(Ordering::SeqCst) {
            self.truncate(index);
            let reason = if acks < required {
                format!(
                    "entry {} was acknowledged by {} of the {} followers required within {:?}",
                    index, acks, required, self.replication_timeout
                )
            } else {
                format!("leadership was lost while replicating entry {}", index)
            };
            return Err(self.reject(name, reason));
        }

        // 3. Commit.
        self.commit_index.store(index, Ordering::SeqCst);
        Event::publish(
            &self.event_publisher,
            Event::CommitEntry(CommitEntryEvent {
                timestamp: SystemTime::now(),
                group: self.group.clone(),
                index,
                acks,
            }),
        );

        // 4. Apply.
        let result = self.state_machine.apply(index, &entry.bytes);
        Event::publish(
            &self.event_publisher,
            Event::ApplyCommand(ApplyCommandEvent {
                timestamp: SystemTime::now(),
                group: self.group.clone(),
                index,
                command: name,
                success: result.is_ok(),
            }),
        );
        for follower in self.followers.iter().filter(|link| link.is_reachable()) {
            let _ = follower.sender.send(ReplicationMessage::Commit(index));
        }
        self.compact(index);

        result.map_err(|err| {
            BackendError::consensus_caused_by(
                &self.group,
                format!("failed to apply {} at {}", name, index),
                err,
            )
        })
    }

    fn on_read_index(&mut self) -> Result<u64> {
        if !self.is_leader.load(Ordering::SeqCst) {
            return Err(BackendError::consensus(&self.group, "not leader"));
        }
        Ok(self.commit_index.load(Ordering::SeqCst))
    }

    // Send the entry at `index` to every reachable follower, and return how many of them acknowledge it
    // before the replication timeout. Waits only for as many acknowledgements as a majority needs.
    fn replicate(&mut self, index: u64) -> usize {
        self.sequence += 1;
        let sequence = self.sequence;

        for follower in self
            .followers
            .iter_mut()
            .filter(|link| link.is_reachable() && !link.is_detached())
        {
            for entry in self.log.entries_from(follower.next_index) {
                let _ = follower.sender.send(ReplicationMessage::Append {
                    entry: entry.clone(),
                    sequence,
                });
            }
            follower.next_index = index + 1;
        }

        let required = (self.followers.len() + 1) / 2;
        let deadline = Instant::now() + self.replication_timeout;
        let mut acked = HashSet::new();
        while acked.len() < required {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.acks.recv_timeout(deadline - now) {
                Ok(ack) if ack.index == index && ack.sequence == sequence => {
                    if self.followers[ack.follower].is_reachable() {
                        acked.insert(ack.follower);
                    }
                }
                Ok(_) => (),
                Err(_) => break,
            }
        }
        acked.len()
    }

    fn truncate(&mut self, index: u64) {
        self.log.truncate_from(index);
        for follower in &mut self.followers {
            follower.next_index = follower.next_index.min(index);
            let _ = follower.sender.send(ReplicationMessage::Truncate(index));
        }
        self.log_len.store(self.log.len(), Ordering::SeqCst);
    }

    // Drop the entries up to `commit_index` that every attached follower has received. If followers
    // that are behind hold back more than `max_log_entries`, drop them anyway and detach those
    // followers.
    fn compact(&mut self, commit_index: u64) {
        let received = self
            .followers
            .iter()
            .filter(|link| !link.is_detached())
            .map(|link| link.next_index - 1)
            .min()
            .unwrap_or(commit_index);
        self.log.compact_through(received.min(commit_index));

        if self.log.len() > self.max_log_entries {
            self.log.compact_through(commit_index);
            for (follower, link) in self.followers.iter().enumerate() {
                if !link.is_detached() && link.next_index < self.log.first_index {
                    log::warn!(
                        "Follower {} of group '{}' fell more than {} entries behind and was detached",
                        follower,
                        self.group,
                        self.max_log_entries
                    );
                    link.detached.store(true, Ordering::SeqCst);
                }
            }
        }
        self.log_len.store(self.log.len(), Ordering::SeqCst);
    }

    fn reject(&self, name: &'static str, reason: String) -> BackendError {
        log::warn!("Group '{}' rejected {}: {}", self.group, name, reason);
        Event::publish(
            &self.event_publisher,
            Event::RejectCommand(RejectCommandEvent {
                timestamp: SystemTime::now(),
                group: self.group.clone(),
                command: name,
                reason: reason.clone(),
            }),
        );
        BackendError::consensus(&self.group, reason)
    }
}

impl FollowerLink {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }
}

struct FollowerReplica {
    group: GroupId,
    follower: usize,
    state_machine: Box<dyn StateMachine>,
    // Entries received but not applied yet.
    log: ReplicatedLog,
    applied_index: Arc<AtomicU64>,
    acks: Sender<Ack>,
}

impl FollowerReplica {
    fn start(
        mut self,
        inbox: Receiver<ReplicationMessage>,
        shutdown_signal: Receiver<()>,
    ) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match inbox.recv_timeout(POLL_INTERVAL) {
                Ok(ReplicationMessage::Append { entry, sequence }) => {
                    self.on_append(entry, sequence)
                }
                Ok(ReplicationMessage::Commit(index)) => self.on_commit(index),
                Ok(ReplicationMessage::Truncate(index)) => self.log.truncate_from(index),
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return,
            }
        })
    }

    fn on_append(&mut self, entry: LogEntry, sequence: u64) {
        if CryptoHash::digest(&entry.bytes) != entry.digest {
            log::warn!(
                "Follower {} of group '{}' dropped entry {}: digest mismatch",
                self.follower,
                self.group,
                entry.index
            );
            return;
        }
        let index = entry.index;
        if index > self.log.last_index() + 1 || index < self.log.first_index {
            log::warn!(
                "Follower {} of group '{}' dropped entry {}: log holds {} to {}",
                self.follower,
                self.group,
                index,
                self.log.first_index,
                self.log.last_index()
            );
            return;
        }
        self.log.truncate_from(index);
        self.log.push(entry);
        let _ = self.acks.send(Ack {
            follower: self.follower,
            index,
            sequence,
        });
    }

    fn on_commit(&mut self, index: u64) {
        let mut applied = self.applied_index.load(Ordering::SeqCst);
        while applied < index {
            let entry = match self.log.get(applied + 1) {
                Some(entry) => entry,
                None => break,
            };
            if let Err(err) = self.state_machine.apply(entry.index, &entry.bytes) {
                log::debug!(
                    "Follower {} of group '{}' applied entry {} with error: {}",
                    self.follower,
                    self.group,
                    entry.index,
                    err
                );
            }
            applied += 1;
            self.applied_index.store(applied, Ordering::SeqCst);
        }
        self.log.compact_through(applied);
    }
}
