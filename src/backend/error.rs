/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single error type surfaced by stores, transactions, and consensus groups.

use std::error::Error as StdError;

use thiserror::Error;

use crate::types::data_types::GroupId;

/// Boxed cause attached to a [`BackendError`].
pub type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// Error produced by any [`BackendStore`](super::pluggables::BackendStore) operation.
///
/// The variants distinguish the failure classes callers may react to differently. All of them carry a
/// human-readable message; those that wrap another failure expose it through
/// [`source`](std::error::Error::source).
#[derive(Debug, Error)]
pub enum BackendError {
    /// The operation was attempted before the store was opened, or after it was closed.
    #[error("store '{store}' is not ready: {reason}")]
    NotReady { store: String, reason: String },

    /// A point lookup found nothing. Distinct from an empty range result.
    #[error("not found: {0}")]
    NotFound(String),

    /// Creation of something that must be unique found it already exists.
    #[error("already exists: {0}")]
    Conflict(String),

    /// An entry handed to the store layer cannot be stored.
    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    /// The physical engine failed during a local operation.
    #[error("backend failure: {message}")]
    Engine {
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// Submission to, or application through, the replicated log failed.
    #[error("consensus failure in group '{group}': {message}")]
    Consensus {
        group: GroupId,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// A commit attempt failed. Raised by [`Transaction::commit_or_rollback`](crate::transaction::Transaction::commit_or_rollback)
    /// whether or not the subsequent rollback succeeded.
    #[error("failed to commit changes")]
    CommitFailed {
        #[source]
        source: Box<BackendError>,
    },

    /// Bytes could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] std::io::Error),
}

impl BackendError {
    pub fn not_ready(store: &str, reason: impl Into<String>) -> Self {
        BackendError::NotReady {
            store: store.to_string(),
            reason: reason.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        BackendError::Engine {
            message: message.into(),
            source: None,
        }
    }

    pub fn engine_caused_by(message: impl Into<String>, cause: impl Into<Cause>) -> Self {
        BackendError::Engine {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    pub fn consensus(group: &GroupId, message: impl Into<String>) -> Self {
        BackendError::Consensus {
            group: group.clone(),
            message: message.into(),
            source: None,
        }
    }

    pub fn consensus_caused_by(
        group: &GroupId,
        message: impl Into<String>,
        cause: impl Into<Cause>,
    ) -> Self {
        BackendError::Consensus {
            group: group.clone(),
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, BackendError::NotReady { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Conflict(_))
    }

    pub fn is_consensus(&self) -> bool {
        matches!(self, BackendError::Consensus { .. })
    }

    /// Walk the chain of sources starting from `self`, and return the innermost `BackendError`.
    pub fn root_cause(&self) -> &BackendError {
        let mut current = self;
        loop {
            let next = match current {
                BackendError::CommitFailed { source } => Some(&**source),
                BackendError::Engine { source: Some(source), .. }
                | BackendError::Consensus { source: Some(source), .. } => {
                    source.downcast_ref::<BackendError>()
                }
                _ => None,
            };
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }
}

/// Result type alias for backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
