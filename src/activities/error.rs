//! Activity error classification.

use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{MessageProvider, RepoProvider, Sha};

/// A rebase that stopped instead of completing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseConflict {
    /// Abbreviated hash of the commit that could not be applied.
    pub sha: Sha,
    pub message: String,
    /// The checkout already had a rebase in progress.
    pub in_progress: bool,
}

/// Errors returned by activities.
///
/// Only [`ActivityError::is_retryable`] errors are retried by the runtime.
#[derive(Debug, Error)]
pub enum ActivityError {
    /// Network or process failure that may succeed on another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Deterministic failure; retrying will not help.
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("rebase stopped at {}: {}", .0.sha, .0.message)]
    RebaseConflict(RebaseConflict),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("activity timed out after {0:?}")]
    Timeout(Duration),

    /// The task running the activity panicked or was cancelled.
    #[error("activity task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ActivityError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ActivityError::Transient(_)
            | ActivityError::CommandFailed { .. }
            | ActivityError::Timeout(_)
            | ActivityError::Io(_) => true,
            ActivityError::Permanent(_)
            | ActivityError::RebaseConflict(_)
            | ActivityError::NotFound { .. }
            | ActivityError::Join(_)
            | ActivityError::Json(_) => false,
        }
    }

    pub fn as_conflict(&self) -> Option<&RebaseConflict> {
        match self {
            ActivityError::RebaseConflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<tokio::task::JoinError> for ActivityError {
    fn from(e: tokio::task::JoinError) -> Self {
        ActivityError::Join(e.to_string())
    }
}

/// A provider the repository refers to has no registered implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("repository provider not configured: {0}")]
    RepoProvider(RepoProvider),

    #[error("message provider not configured: {0}")]
    MessageProvider(MessageProvider),
}
