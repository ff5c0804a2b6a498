//! Typed payloads carried inside event envelopes.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::EventScope;
use crate::types::{Commit, PrNumber, PullRequestRef, Sha, branch_name_from_ref};

/// A payload type that may be stored in a flattened event.
pub trait Payload: Serialize + DeserializeOwned {
    /// Whether a flattened event with `scope` can be decoded as this payload.
    fn accepts(scope: EventScope) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefKind {
    Branch,
    Tag,
}

/// A branch or tag that was created or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchOrTag {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub kind: RefKind,
}

impl BranchOrTag {
    pub fn branch(name: impl Into<String>) -> Self {
        BranchOrTag {
            git_ref: name.into(),
            kind: RefKind::Branch,
        }
    }

    pub fn is_branch(&self) -> bool {
        self.kind == RefKind::Branch
    }

    /// The short branch or tag name.
    pub fn name(&self) -> &str {
        let name = branch_name_from_ref(&self.git_ref);
        name.strip_prefix("refs/tags/").unwrap_or(name)
    }
}

impl Payload for BranchOrTag {
    fn accepts(scope: EventScope) -> bool {
        matches!(scope, EventScope::Branch | EventScope::Tag)
    }
}

/// A push of one or more commits to a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Push {
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub before: Sha,
    pub after: Sha,
    #[serde(default)]
    pub repository: String,
    #[serde(default)]
    pub sender_id: u64,
    #[serde(default)]
    pub commits: Vec<Commit>,
    pub timestamp: DateTime<Utc>,
}

impl Push {
    /// The branch pushed to.
    pub fn branch(&self) -> &str {
        branch_name_from_ref(&self.git_ref)
    }

    /// The newest commit of the push.
    pub fn head_commit(&self) -> Option<&Commit> {
        self.commits.last()
    }
}

impl Payload for Push {
    fn accepts(scope: EventScope) -> bool {
        scope == EventScope::Push
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: PrNumber,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_commit_sha: Option<Sha>,
    #[serde(default)]
    pub author_id: u64,
    pub head_branch: String,
    pub base_branch: String,
    pub timestamp: DateTime<Utc>,
}

impl PullRequest {
    /// The queueable reference to this pull request.
    pub fn reference(&self) -> PullRequestRef {
        PullRequestRef {
            number: self.number,
            head_branch: self.head_branch.clone(),
            base_branch: self.base_branch.clone(),
        }
    }
}

impl Payload for PullRequest {
    fn accepts(scope: EventScope) -> bool {
        scope == EventScope::PullRequest
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestLabel {
    pub name: String,
    pub pull_request_number: PrNumber,
    pub branch: String,
    pub timestamp: DateTime<Utc>,
}

impl Payload for PullRequestLabel {
    fn accepts(scope: EventScope) -> bool {
        scope == EventScope::PullRequestLabel
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestReview {
    pub id: u64,
    pub pull_request_number: PrNumber,
    pub branch: String,
    pub state: String,
    #[serde(default)]
    pub author_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl Payload for PullRequestReview {
    fn accepts(scope: EventScope) -> bool {
        scope == EventScope::PullRequestReview
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestComment {
    pub id: u64,
    pub pull_request_number: PrNumber,
    pub branch: String,
    #[serde(default)]
    pub review_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(default)]
    pub commit_sha: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub position: u64,
    #[serde(default)]
    pub author_id: u64,
    pub timestamp: DateTime<Utc>,
}

impl Payload for PullRequestComment {
    fn accepts(scope: EventScope) -> bool {
        scope == EventScope::PullRequestComment
    }
}
