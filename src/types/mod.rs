//! Core domain types.
//!
//! Identifiers, repository records, and pull request references shared by the
//! controllers, the merge queue, and the activity interface.

pub mod ids;
pub mod pr;
pub mod repo;

pub use ids::{ControlId, EventId, PrNumber, RepoId, Sha};
pub use pr::{PullRequestRef, PullRequestState};
pub use repo::{
    Changes, Commit, MessageProvider, NotifyConfig, ProviderInfo, RepoProvider, Repository,
    branch_name_from_ref,
};
