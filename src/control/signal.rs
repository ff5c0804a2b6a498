//! Signals delivered to control processes.

use serde::{Deserialize, Serialize};

use crate::events::{
    BranchOrTag, Event, PullRequest, PullRequestComment, PullRequestLabel, PullRequestReview, Push,
};
use crate::types::{PrNumber, PullRequestRef};

/// A named message for a control process.
///
/// Provider events arrive wrapped in their envelope so lineage survives
/// forwarding. Queue mutations carry only what the queue needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "payload", rename_all = "snake_case")]
pub enum Signal {
    Push(Event<Push>),
    CreateOrDelete(Event<BranchOrTag>),
    /// A trunk push every other branch should rebase onto.
    Rebase(Event<Push>),
    PullRequest(Event<PullRequest>),
    PullRequestLabel(Event<PullRequestLabel>),
    PullRequestComment(Event<PullRequestComment>),
    PullRequestReview(Event<PullRequestReview>),

    QueueAdd(PullRequestRef),
    QueueAddPriority(PullRequestRef),
    QueueRemove(PrNumber),
    QueuePromote(PrNumber),
    QueueDemote(PrNumber),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Push(_) => "push",
            Signal::CreateOrDelete(_) => "create_delete",
            Signal::Rebase(_) => "rebase",
            Signal::PullRequest(_) => "pull_request",
            Signal::PullRequestLabel(_) => "pull_request_label",
            Signal::PullRequestComment(_) => "pull_request_comment",
            Signal::PullRequestReview(_) => "pull_request_review",
            Signal::QueueAdd(_) => "queue_add",
            Signal::QueueAddPriority(_) => "queue_add_priority",
            Signal::QueueRemove(_) => "queue_remove",
            Signal::QueuePromote(_) => "queue_promote",
            Signal::QueueDemote(_) => "queue_demote",
        }
    }

    /// Whether the merge queue consumes this signal.
    pub fn is_queue(&self) -> bool {
        matches!(
            self,
            Signal::QueueAdd(_)
                | Signal::QueueAddPriority(_)
                | Signal::QueueRemove(_)
                | Signal::QueuePromote(_)
                | Signal::QueueDemote(_)
        )
    }
}
