//! Versioned event envelopes.
//!
//! Every inbound provider occurrence (push, branch create/delete, pull request
//! activity) travels through the controllers wrapped in an [`Event`]. The
//! envelope carries the causal context (`parent_id`) that lets a push be traced
//! back to the event that created its branch.
//!
//! For storage an envelope is flattened into a [`FlatEvent`] whose payload is an
//! opaque JSON blob; [`FlatEvent::reconstruct`] turns it back into a typed event
//! by the recorded scope.

mod flat;
mod lineage;
mod payloads;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, RepoId, RepoProvider};

pub use flat::{AnyEvent, EventError, FlatEvent};
pub use lineage::BranchTriggers;
pub use payloads::{
    BranchOrTag, Payload, PullRequest, PullRequestComment, PullRequestLabel, PullRequestReview,
    Push, RefKind,
};

/// Envelope schema version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventVersion {
    #[default]
    #[serde(rename = "v1")]
    V1,
}

/// What kind of occurrence an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventScope {
    Branch,
    Tag,
    Push,
    PullRequest,
    PullRequestLabel,
    PullRequestReview,
    PullRequestComment,
}

impl fmt::Display for EventScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventScope::Branch => "branch",
            EventScope::Tag => "tag",
            EventScope::Push => "push",
            EventScope::PullRequest => "pull_request",
            EventScope::PullRequestLabel => "pull_request_label",
            EventScope::PullRequestReview => "pull_request_review",
            EventScope::PullRequestComment => "pull_request_comment",
        };
        f.write_str(name)
    }
}

/// What happened to the subject of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Created,
    Deleted,
    Updated,
    Forced,
    Reopened,
    Closed,
    Merged,
    Started,
    Completed,
    Dismissed,
    Abandoned,
    Added,
    Removed,
    Requested,
}

/// Causal and provenance metadata of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EventId>,
    pub provider: RepoProvider,
    pub scope: EventScope,
    pub action: EventAction,
    #[serde(default)]
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

/// The entity an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubject {
    pub id: RepoId,
    pub name: String,
}

impl EventSubject {
    pub fn repo(id: RepoId) -> Self {
        EventSubject {
            id,
            name: "repos".to_string(),
        }
    }
}

/// A typed event envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event<P> {
    pub version: EventVersion,
    pub context: EventContext,
    pub subject: EventSubject,
    pub payload: P,
}

impl<P> Event<P> {
    pub fn new(
        provider: RepoProvider,
        subject: EventSubject,
        scope: EventScope,
        action: EventAction,
        payload: P,
    ) -> Self {
        Event {
            version: EventVersion::V1,
            context: EventContext {
                id: EventId::new_v4(),
                parent_id: None,
                provider,
                scope,
                action,
                source: String::new(),
                timestamp: Utc::now(),
            },
            subject,
            payload,
        }
    }

    pub fn id(&self) -> EventId {
        self.context.id
    }

    pub fn action(&self) -> EventAction {
        self.context.action
    }

    pub fn scope(&self) -> EventScope {
        self.context.scope
    }

    /// Links this event to the event that caused it.
    pub fn set_parent(&mut self, parent: EventId) {
        self.context.parent_id = Some(parent);
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.context.source = source.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.context.timestamp = timestamp;
        self
    }
}
