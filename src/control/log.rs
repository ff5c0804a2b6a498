//! Per-controller logging.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::types::{RepoId, RepoProvider, Repository};

/// Logger built once per controller.
///
/// Every line carries the controller kind, the repository, and the branch it
/// is acting on; callers supply the action.
#[derive(Debug, Clone)]
pub struct ControlLog {
    kind: &'static str,
    repo_id: RepoId,
    provider: RepoProvider,
    default_branch: String,
    branch: String,
}

impl ControlLog {
    pub fn new(kind: &'static str, repo: &Repository, branch: impl Into<String>) -> Self {
        ControlLog {
            kind,
            repo_id: repo.id,
            provider: repo.provider,
            default_branch: repo.default_branch.clone(),
            branch: branch.into(),
        }
    }

    /// The same logger tagged with another branch.
    pub fn with_branch(&self, branch: impl Into<String>) -> Self {
        ControlLog {
            branch: branch.into(),
            ..self.clone()
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    fn prefix<'a>(&'a self, action: &'a str) -> Prefix<'a> {
        Prefix {
            kind: self.kind,
            branch: &self.branch,
            action,
        }
    }

    pub fn debug(&self, action: &str, msg: impl fmt::Display) {
        debug!(
            kind = self.kind,
            repo_id = %self.repo_id,
            provider = %self.provider,
            default_branch = %self.default_branch,
            branch = %self.branch,
            action,
            "{}{msg}",
            self.prefix(action)
        );
    }

    pub fn info(&self, action: &str, msg: impl fmt::Display) {
        info!(
            kind = self.kind,
            repo_id = %self.repo_id,
            provider = %self.provider,
            default_branch = %self.default_branch,
            branch = %self.branch,
            action,
            "{}{msg}",
            self.prefix(action)
        );
    }

    pub fn warn(&self, action: &str, msg: impl fmt::Display) {
        warn!(
            kind = self.kind,
            repo_id = %self.repo_id,
            provider = %self.provider,
            default_branch = %self.default_branch,
            branch = %self.branch,
            action,
            "{}{msg}",
            self.prefix(action)
        );
    }

    pub fn error(&self, action: &str, msg: impl fmt::Display) {
        error!(
            kind = self.kind,
            repo_id = %self.repo_id,
            provider = %self.provider,
            default_branch = %self.default_branch,
            branch = %self.branch,
            action,
            "{}{msg}",
            self.prefix(action)
        );
    }
}

/// `kind/branch/action: ` with the branch segment omitted when empty.
struct Prefix<'a> {
    kind: &'a str,
    branch: &'a str,
    action: &'a str,
}

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.branch.is_empty() {
            write!(f, "{}/{}: ", self.kind, self.action)
        } else {
            write!(f, "{}/{}/{}: ", self.kind, self.branch, self.action)
        }
    }
}
