//! The production activity bundle.

use std::collections::HashMap;

use tracing::info;

use super::{
    Activities, EventStore, GitIo, MessageIo, PrProcessor, RegistryError, RepoIo, Result,
};
use crate::types::{MessageProvider, PullRequestRef, RepoProvider, Repository};

/// Activity implementations plus the provider registries.
///
/// Constructed once at startup and shared by every control process.
pub struct Kernel<R, M, G, E, P> {
    repos: HashMap<RepoProvider, R>,
    messages: HashMap<MessageProvider, M>,
    git: G,
    events: E,
    processor: P,
}

impl<R, M, G, E, P> Kernel<R, M, G, E, P>
where
    R: RepoIo,
    M: MessageIo,
    G: GitIo,
    E: EventStore,
    P: PrProcessor,
{
    pub fn new(git: G, events: E, processor: P) -> Self {
        Kernel {
            repos: HashMap::new(),
            messages: HashMap::new(),
            git,
            events,
            processor,
        }
    }

    pub fn with_repo_io(mut self, provider: RepoProvider, io: R) -> Self {
        self.repos.insert(provider, io);
        self
    }

    pub fn with_message_io(mut self, provider: MessageProvider, io: M) -> Self {
        self.messages.insert(provider, io);
        self
    }
}

impl<R, M, G, E, P> Activities for Kernel<R, M, G, E, P>
where
    R: RepoIo,
    M: MessageIo,
    G: GitIo,
    E: EventStore,
    P: PrProcessor,
{
    type Repo = R;
    type Message = M;
    type Git = G;
    type Events = E;
    type Processor = P;

    fn repo_io(&self, provider: RepoProvider) -> std::result::Result<&R, RegistryError> {
        self.repos
            .get(&provider)
            .ok_or(RegistryError::RepoProvider(provider))
    }

    fn message_io(&self, provider: MessageProvider) -> std::result::Result<&M, RegistryError> {
        self.messages
            .get(&provider)
            .ok_or(RegistryError::MessageProvider(provider))
    }

    fn git(&self) -> &G {
        &self.git
    }

    fn events(&self) -> &E {
        &self.events
    }

    fn processor(&self) -> &P {
        &self.processor
    }
}

/// Accepts every pull request handed to it.
///
/// Merging happens on the hosting provider; this processor records that the
/// queue released the pull request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcknowledgeProcessor;

impl PrProcessor for AcknowledgeProcessor {
    async fn process(&self, repo: &Repository, pr: &PullRequestRef) -> Result<()> {
        info!(
            repo_id = %repo.id,
            pr = %pr.number,
            head = %pr.head_branch,
            base = %pr.base_branch,
            "Pull request released from merge queue"
        );
        Ok(())
    }
}
