//! The side-effecting operations control processes depend on.
//!
//! Controllers never talk to git, a hosting provider, or a chat service
//! directly. They go through the traits in this module, bundled by
//! [`Activities`], so the same controller code runs against the real
//! implementations and against recording mocks in tests.
//!
//! # Providers
//!
//! Repositories name their hosting provider and their notification provider.
//! [`Activities::repo_io`] and [`Activities::message_io`] resolve those names
//! and fail with a [`RegistryError`] when nothing is registered, which the
//! controllers treat as fatal misconfiguration.

mod error;
mod events;
mod git;
mod kernel;
mod local;
mod message;

use std::future::Future;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::events::FlatEvent;
use crate::types::{
    Changes, MessageProvider, ProviderInfo, PullRequestRef, RepoProvider, Repository, Sha,
};

pub use error::{ActivityError, RebaseConflict, RegistryError};
pub use events::FileEventStore;
pub use git::{CommitIdentity, GitCli, classify_rebase};
pub use kernel::{AcknowledgeProcessor, Kernel};
pub use local::LocalRepoIo;
pub use message::{
    LinesExceededMessage, LogMessageIo, MergeConflictMessage, MessagePayload, StaleBranchMessage,
};

/// Result type for activities.
pub type Result<T> = std::result::Result<T, ActivityError>;

/// Where and what to clone for a rebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClonePayload {
    /// Authenticated clone URL.
    pub url: String,
    pub branch: String,
    /// Trunk commit the clone will be rebased onto.
    pub commit: Sha,
    pub path: PathBuf,
}

/// Inputs of a branch-versus-default diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectChangesPayload {
    pub installation_id: String,
    pub owner: String,
    pub repo_name: String,
    pub default_branch: String,
    pub target_branch: String,
}

/// Hosting provider operations.
pub trait RepoIo: Send + Sync + 'static {
    /// Fetches fresh provider metadata for the repository.
    fn provider_info(
        &self,
        repo: &Repository,
    ) -> impl Future<Output = Result<ProviderInfo>> + Send;

    fn all_branches(&self, info: &ProviderInfo) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn detect_changes(
        &self,
        payload: &DetectChangesPayload,
    ) -> impl Future<Output = Result<Changes>> + Send;

    fn tokenized_clone_url(&self, info: &ProviderInfo) -> impl Future<Output = Result<String>> + Send;
}

/// Chat notification delivery.
pub trait MessageIo: Send + Sync + 'static {
    fn send_stale_branch(&self, msg: &StaleBranchMessage) -> impl Future<Output = Result<()>> + Send;

    fn send_lines_exceeded(
        &self,
        msg: &LinesExceededMessage,
    ) -> impl Future<Output = Result<()>> + Send;

    fn send_merge_conflict(
        &self,
        msg: &MergeConflictMessage,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Operations on an ephemeral git checkout.
pub trait GitIo: Send + Sync + 'static {
    /// Clones a single branch into `payload.path`.
    fn clone_branch(&self, payload: &ClonePayload) -> impl Future<Output = Result<()>> + Send;

    /// Fetches the default branch into an existing clone.
    fn fetch_branch(&self, path: &Path, default_branch: &str) -> impl Future<Output = Result<()>> + Send;

    /// Rebases the checkout onto `commit`.
    ///
    /// A stopped rebase is reported as [`ActivityError::RebaseConflict`].
    fn rebase_at_commit(&self, path: &Path, commit: &Sha) -> impl Future<Output = Result<()>> + Send;

    fn push_branch(
        &self,
        path: &Path,
        branch: &str,
        force: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Recursively deletes a clone. A missing path is not an error.
    fn remove_cloned(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Durable record of events the controllers act on.
pub trait EventStore: Send + Sync + 'static {
    fn save_event(&self, event: &FlatEvent) -> impl Future<Output = Result<()>> + Send;
}

/// Handles one pull request taken off a merge queue.
pub trait PrProcessor: Send + Sync + 'static {
    fn process(
        &self,
        repo: &Repository,
        pr: &PullRequestRef,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Everything a control process may invoke.
pub trait Activities: Send + Sync + 'static {
    type Repo: RepoIo;
    type Message: MessageIo;
    type Git: GitIo;
    type Events: EventStore;
    type Processor: PrProcessor;

    fn repo_io(&self, provider: RepoProvider) -> std::result::Result<&Self::Repo, RegistryError>;

    fn message_io(
        &self,
        provider: MessageProvider,
    ) -> std::result::Result<&Self::Message, RegistryError>;

    fn git(&self) -> &Self::Git;

    fn events(&self) -> &Self::Events;

    fn processor(&self) -> &Self::Processor;
}
