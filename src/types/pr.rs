//! Pull request references and the state a branch tracks about them.

use serde::{Deserialize, Serialize};

use super::ids::PrNumber;

/// The unit of work the merge queue operates on.
///
/// Immutable once enqueued; identified by its number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: PrNumber,
    pub head_branch: String,
    pub base_branch: String,
}

impl PullRequestRef {
    pub fn new(number: u64, head_branch: impl Into<String>, base_branch: impl Into<String>) -> Self {
        PullRequestRef {
            number: PrNumber(number),
            head_branch: head_branch.into(),
            base_branch: base_branch.into(),
        }
    }
}

/// The pull request associated with a branch, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "pull_request", rename_all = "snake_case")]
pub enum PullRequestState {
    /// No pull request has been seen for the branch.
    #[default]
    Absent,

    /// A pull request is open against the branch.
    Open(PullRequestRef),

    /// The last pull request seen for the branch was closed.
    Closed(PullRequestRef),
}

impl PullRequestState {
    /// Returns the open pull request, if there is one.
    pub fn open(&self) -> Option<&PullRequestRef> {
        match self {
            PullRequestState::Open(pr) => Some(pr),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PullRequestState::Open(_))
    }

    /// Records an opened pull request.
    ///
    /// Returns true when this is a transition into the open state, i.e. the
    /// branch had no open pull request or had a different one.
    pub fn opened(&mut self, pr: PullRequestRef) -> bool {
        let transition = self.open().is_none_or(|current| current.number != pr.number);
        *self = PullRequestState::Open(pr);
        transition
    }

    /// Records that the open pull request was closed. No-op otherwise.
    pub fn closed(&mut self) {
        if let PullRequestState::Open(pr) = std::mem::take(self) {
            *self = PullRequestState::Closed(pr);
        }
    }
}
