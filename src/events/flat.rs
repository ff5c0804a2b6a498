//! Flattened storage form of event envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::payloads::{
    BranchOrTag, Payload, PullRequest, PullRequestComment, PullRequestLabel, PullRequestReview,
    Push,
};
use super::{Event, EventAction, EventContext, EventScope, EventSubject, EventVersion};
use crate::types::{EventId, RepoId, RepoProvider};

#[derive(Debug, Error)]
pub enum EventError {
    /// The stored scope does not match the requested payload type.
    #[error("event {id} has scope {scope}, which does not decode as the requested payload")]
    ScopeMismatch { id: EventId, scope: EventScope },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An event whose payload is kept as an opaque JSON blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlatEvent {
    pub version: EventVersion,
    pub id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<EventId>,
    pub provider: RepoProvider,
    pub scope: EventScope,
    pub action: EventAction,
    pub source: String,
    pub subject_id: RepoId,
    pub subject_name: String,
    pub created_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// A reconstructed event of any supported scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyEvent {
    BranchOrTag(Event<BranchOrTag>),
    Push(Event<Push>),
    PullRequest(Event<PullRequest>),
    PullRequestLabel(Event<PullRequestLabel>),
    PullRequestReview(Event<PullRequestReview>),
    PullRequestComment(Event<PullRequestComment>),
}

impl<P: Payload> Event<P> {
    pub fn flatten(&self) -> Result<FlatEvent, EventError> {
        Ok(FlatEvent {
            version: self.version,
            id: self.context.id,
            parent_id: self.context.parent_id,
            provider: self.context.provider,
            scope: self.context.scope,
            action: self.context.action,
            source: self.context.source.clone(),
            subject_id: self.subject.id,
            subject_name: self.subject.name.clone(),
            created_at: self.context.timestamp,
            payload: serde_json::to_vec(&self.payload)?,
        })
    }
}

impl FlatEvent {
    /// Decodes the payload as `P`, checking that the stored scope allows it.
    pub fn decode<P: Payload>(&self) -> Result<Event<P>, EventError> {
        if !P::accepts(self.scope) {
            return Err(EventError::ScopeMismatch {
                id: self.id,
                scope: self.scope,
            });
        }

        let payload = serde_json::from_slice(&self.payload)?;
        Ok(Event {
            version: self.version,
            context: EventContext {
                id: self.id,
                parent_id: self.parent_id,
                provider: self.provider,
                scope: self.scope,
                action: self.action,
                source: self.source.clone(),
                timestamp: self.created_at,
            },
            subject: EventSubject {
                id: self.subject_id,
                name: self.subject_name.clone(),
            },
            payload,
        })
    }

    /// Rebuilds the typed event by the recorded scope.
    pub fn reconstruct(&self) -> Result<AnyEvent, EventError> {
        Ok(match self.scope {
            EventScope::Branch | EventScope::Tag => AnyEvent::BranchOrTag(self.decode()?),
            EventScope::Push => AnyEvent::Push(self.decode()?),
            EventScope::PullRequest => AnyEvent::PullRequest(self.decode()?),
            EventScope::PullRequestLabel => AnyEvent::PullRequestLabel(self.decode()?),
            EventScope::PullRequestReview => AnyEvent::PullRequestReview(self.decode()?),
            EventScope::PullRequestComment => AnyEvent::PullRequestComment(self.decode()?),
        })
    }
}
