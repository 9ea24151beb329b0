/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that delivers [events](crate::events) to their handlers.

use std::{
    sync::{
        mpsc::{Receiver, RecvTimeoutError, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure. Handlers are shared between every group built from one configuration.
pub type HandlerPtr<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub(crate) struct EventHandlers {
    pub(crate) create_group_handlers: Vec<HandlerPtr<CreateGroupEvent>>,
    pub(crate) submit_command_handlers: Vec<HandlerPtr<SubmitCommandEvent>>,
    pub(crate) commit_entry_handlers: Vec<HandlerPtr<CommitEntryEvent>>,
    pub(crate) apply_command_handlers: Vec<HandlerPtr<ApplyCommandEvent>>,
    pub(crate) reject_command_handlers: Vec<HandlerPtr<RejectCommandEvent>>,
}

impl EventHandlers {
    /// Collect the user's handlers for each event, preceded by the event's logger if `log_events`.
    pub(crate) fn new(
        log_events: bool,
        create_group_handler: Option<HandlerPtr<CreateGroupEvent>>,
        submit_command_handler: Option<HandlerPtr<SubmitCommandEvent>>,
        commit_entry_handler: Option<HandlerPtr<CommitEntryEvent>>,
        apply_command_handler: Option<HandlerPtr<ApplyCommandEvent>>,
        reject_command_handler: Option<HandlerPtr<RejectCommandEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            create_group_handlers: handlers(log_events, create_group_handler),
            submit_command_handlers: handlers(log_events, submit_command_handler),
            commit_entry_handlers: handlers(log_events, commit_entry_handler),
            apply_command_handlers: handlers(log_events, apply_command_handler),
            reject_command_handlers: handlers(log_events, reject_command_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.create_group_handlers.is_empty()
            && self.submit_command_handlers.is_empty()
            && self.commit_entry_handlers.is_empty()
            && self.apply_command_handlers.is_empty()
            && self.reject_command_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::CreateGroup(create_group_event) => self
                .create_group_handlers
                .iter()
                .for_each(|handler| handler(&create_group_event)),

            Event::SubmitCommand(submit_command_event) => self
                .submit_command_handlers
                .iter()
                .for_each(|handler| handler(&submit_command_event)),

            Event::CommitEntry(commit_entry_event) => self
                .commit_entry_handlers
                .iter()
                .for_each(|handler| handler(&commit_entry_event)),

            Event::ApplyCommand(apply_command_event) => self
                .apply_command_handlers
                .iter()
                .for_each(|handler| handler(&apply_command_event)),

            Event::RejectCommand(reject_command_event) => self
                .reject_command_handlers
                .iter()
                .for_each(|handler| handler(&reject_command_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // The publisher (the group's leader thread) has stopped. Nothing more will arrive.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
