//! Newtype wrappers for domain identifiers.
//!
//! These types keep repository ids, pull request numbers, commit hashes, and
//! control process ids from being mixed up with each other or with plain
//! strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A pull request number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// A git commit hash, full or abbreviated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    /// Creates a new Sha from a string without validating it.
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha(s)
    }
}

/// Identifier of a repository record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoId(pub Uuid);

impl RepoId {
    pub fn new_v4() -> Self {
        RepoId(Uuid::new_v4())
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new_v4() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic identity of one running control process.
///
/// Two signals addressed to the same entity always resolve to the same id,
/// which is what lets signal-with-start find an already running process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlId(String);

impl ControlId {
    pub fn repo(repo: RepoId) -> Self {
        ControlId(format!("repo.{repo}"))
    }

    pub fn trunk(repo: RepoId) -> Self {
        ControlId(format!("repo.{repo}.trunk"))
    }

    pub fn branch(repo: RepoId, branch: &str) -> Self {
        ControlId(format!("repo.{repo}.branch.{branch}"))
    }

    pub fn queue(repo: RepoId, branch: &str) -> Self {
        ControlId(format!("repo.{repo}.queue.{branch}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name used when this control's checkpoint is stored on disk.
    ///
    /// Branch names may contain `/`, which is folded to `~` so every
    /// checkpoint lives directly in the state directory.
    pub fn file_name(&self) -> String {
        format!("{}.json", self.0.replace('/', "~"))
    }
}

impl fmt::Display for ControlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
