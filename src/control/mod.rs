//! Control processes.
//!
//! Four controllers drive a repository:
//!
//! - [`RepoController`](repo::RepoController): entry point for provider
//!   events; routes them to the trunk or branch controllers.
//! - [`TrunkController`](trunk::TrunkController): the default branch; fans a
//!   trunk push out as a rebase signal to every other branch.
//! - [`BranchController`](branch::BranchController): one per feature branch;
//!   tracks commits and pull requests, warns about size and staleness, and
//!   rebases onto trunk.
//! - [`QueueController`](queue::QueueController): the merge queue of a base
//!   branch; processes one pull request at a time.
//!
//! Each controller runs until it is done or its weighted mutation count
//! reaches the checkpoint threshold, then returns an [`Exit`] to the runtime.
//! The arguments in [`Exit::Checkpoint`] are all that survives the restart.

mod base;
mod branch;
mod log;
mod queue;
mod repo;
mod signal;
mod stale;
mod trunk;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::activities::{Activities, ActivityError, RegistryError};
use crate::queue::SerializedQueues;
use crate::runtime::{ControlMessage, Runtime, RuntimeError};
use crate::types::{ControlId, Repository};

pub use base::{ACTIVITY_WEIGHT, BaseControl, CHILD_WEIGHT, Step};
pub use branch::{BranchController, BranchSnapshot};
pub use log::ControlLog;
pub use queue::QueueController;
pub use repo::RepoController;
pub use signal::Signal;
pub use stale::StaleInterval;
pub use trunk::TrunkController;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("provider lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("activity failed: {0}")]
    Activity(#[from] ActivityError),
}

pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Repo,
    Trunk,
    Branch,
    Queue,
}

impl ControlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlKind::Repo => "repo",
            ControlKind::Trunk => "trunk",
            ControlKind::Branch => "branch",
            ControlKind::Queue => "queue",
        }
    }
}

/// Arguments a control process starts (and restarts) with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlArgs {
    Repo {
        repo: Repository,
    },
    Trunk {
        repo: Repository,
    },
    Branch {
        repo: Repository,
        branch: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        snapshot: Option<BranchSnapshot>,
    },
    Queue {
        repo: Repository,
        branch: String,
        #[serde(default)]
        queues: SerializedQueues,
    },
}

impl ControlArgs {
    pub fn control_id(&self) -> ControlId {
        match self {
            ControlArgs::Repo { repo } => ControlId::repo(repo.id),
            ControlArgs::Trunk { repo } => ControlId::trunk(repo.id),
            ControlArgs::Branch { repo, branch, .. } => ControlId::branch(repo.id, branch),
            ControlArgs::Queue { repo, branch, .. } => ControlId::queue(repo.id, branch),
        }
    }

    pub fn kind(&self) -> ControlKind {
        match self {
            ControlArgs::Repo { .. } => ControlKind::Repo,
            ControlArgs::Trunk { .. } => ControlKind::Trunk,
            ControlArgs::Branch { .. } => ControlKind::Branch,
            ControlArgs::Queue { .. } => ControlKind::Queue,
        }
    }

    pub fn repo(&self) -> &Repository {
        match self {
            ControlArgs::Repo { repo }
            | ControlArgs::Trunk { repo }
            | ControlArgs::Branch { repo, .. }
            | ControlArgs::Queue { repo, .. } => repo,
        }
    }

    /// The same process with no carried state.
    pub fn fresh(&self) -> ControlArgs {
        match self {
            ControlArgs::Branch { repo, branch, .. } => ControlArgs::Branch {
                repo: repo.clone(),
                branch: branch.clone(),
                snapshot: None,
            },
            ControlArgs::Queue { repo, branch, .. } => ControlArgs::Queue {
                repo: repo.clone(),
                branch: branch.clone(),
                queues: SerializedQueues::default(),
            },
            other => other.clone(),
        }
    }
}

/// How a controller run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// Finished for good.
    Done,

    /// Restart with `args`, discarding everything else.
    Checkpoint { reason: String, args: ControlArgs },
}

/// Checkpoint reason used when the runtime is shutting down.
pub const SHUTDOWN_REASON: &str = "shutdown";

/// Checkpoint reason used when the mutation counter reaches the threshold.
pub const THRESHOLD_REASON: &str = "threshold";

/// Runs the controller `args` describes until it exits.
pub(crate) async fn run<A: Activities>(
    runtime: Runtime<A>,
    args: ControlArgs,
    rx: &mut mpsc::Receiver<ControlMessage>,
    cancel: CancellationToken,
) -> Result<Exit> {
    match args {
        ControlArgs::Repo { repo } => RepoController::new(runtime, repo).run(rx, cancel).await,
        ControlArgs::Trunk { repo } => TrunkController::new(runtime, repo).run(rx, cancel).await,
        ControlArgs::Branch {
            repo,
            branch,
            snapshot,
        } => {
            BranchController::new(runtime, repo, branch, snapshot.unwrap_or_default())
                .run(rx, cancel)
                .await
        }
        ControlArgs::Queue {
            repo,
            branch,
            queues,
        } => {
            QueueController::new(runtime, repo, branch, queues)
                .run(rx, cancel)
                .await
        }
    }
}
