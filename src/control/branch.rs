//! Branch controller: one per feature branch.
//!
//! Tracks the branch's latest commit and pull request, warns when the branch
//! grows past the repository threshold or goes quiet for too long, and
//! rebases it onto every new trunk commit.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::base::{BaseControl, Step};
use super::stale::StaleInterval;
use super::{
    ControlArgs, ControlKind, Exit, Result, SHUTDOWN_REASON, Signal, THRESHOLD_REASON,
};
use crate::activities::{
    Activities, ActivityError, ClonePayload, DetectChangesPayload, GitIo, LinesExceededMessage,
    MergeConflictMessage, MessageIo, RebaseConflict, RepoIo, StaleBranchMessage,
};
use crate::events::{Event, EventAction, PullRequest, PullRequestLabel, Push};
use crate::runtime::{ControlMessage, Runtime};
use crate::types::{Changes, Commit, PullRequestRef, PullRequestState, Repository, Sha};

/// Branch state carried across checkpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<Commit>,
    #[serde(default)]
    pub pr: PullRequestState,
}

pub struct BranchController<A> {
    base: BaseControl<A>,
    state: Arc<Mutex<BranchSnapshot>>,
    interval: StaleInterval,
}

impl<A: Activities> BranchController<A> {
    pub fn new(
        runtime: Runtime<A>,
        repo: Repository,
        branch: impl Into<String>,
        snapshot: BranchSnapshot,
    ) -> Self {
        let interval = StaleInterval::new(repo.stale_duration(), CancellationToken::new());
        BranchController {
            base: BaseControl::new(runtime, ControlKind::Branch, repo, branch),
            state: Arc::new(Mutex::new(snapshot)),
            interval,
        }
    }

    pub fn base(&self) -> &BaseControl<A> {
        &self.base
    }

    pub fn snapshot(&self) -> BranchSnapshot {
        self.state().clone()
    }

    fn state(&self) -> MutexGuard<'_, BranchSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn args(&self) -> ControlArgs {
        ControlArgs::Branch {
            repo: self.base.repo().clone(),
            branch: self.base.branch().to_string(),
            snapshot: Some(self.snapshot()),
        }
    }

    pub async fn run(
        self,
        rx: &mut mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
    ) -> Result<Exit> {
        let stale = self.base.invoke_async(
            "stale_check",
            stale_loop(self.base.clone(), Arc::clone(&self.state), self.interval.clone()),
        );

        let exit = self.main_loop(rx, &cancel).await;

        self.interval.cancel();
        stale.abort();
        exit
    }

    async fn main_loop(
        &self,
        rx: &mut mpsc::Receiver<ControlMessage>,
        cancel: &CancellationToken,
    ) -> Result<Exit> {
        loop {
            if !self.base.is_active() {
                return Ok(Exit::Done);
            }
            if self.base.needs_checkpoint() {
                return Ok(self.base.checkpoint(THRESHOLD_REASON, self.args()));
            }

            match self.base.next_step(rx, cancel).await {
                Step::Signal(signal) => {
                    let action = signal.name();
                    let result = self.handle(signal).await;
                    self.base.absorb(action, result)?;
                }
                Step::Done => return Ok(Exit::Done),
                Step::Cancelled => return Ok(self.base.checkpoint(SHUTDOWN_REASON, self.args())),
            }
        }
    }

    pub(crate) async fn handle(&self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Push(event) => self.on_push(&event).await,
            Signal::Rebase(event) => self.on_rebase(&event).await,
            Signal::PullRequest(event) => self.on_pull_request(&event).await,
            Signal::PullRequestLabel(event) => self.on_label(&event).await,
            Signal::CreateOrDelete(event) => {
                match event.action() {
                    EventAction::Created => {
                        self.state().created_at = Some(event.context.timestamp);
                        self.base.log().info("create_delete", "branch created");
                    }
                    EventAction::Deleted => self.base.terminate("branch deleted"),
                    _ => {}
                }
                Ok(())
            }
            Signal::PullRequestReview(event) => {
                self.base.log().info(
                    "pull_request_review",
                    format_args!(
                        "review {} on {}: {}",
                        event.payload.id, event.payload.pull_request_number, event.payload.state
                    ),
                );
                Ok(())
            }
            Signal::PullRequestComment(event) => {
                self.base.log().info(
                    "pull_request_comment",
                    format_args!(
                        "comment {} on {}",
                        event.payload.id, event.payload.pull_request_number
                    ),
                );
                Ok(())
            }
            other => {
                self.base.log().debug(other.name(), "ignored by branch controller");
                Ok(())
            }
        }
    }

    async fn on_push(&self, event: &Event<Push>) -> Result<()> {
        self.interval.restart();
        if let Some(commit) = event.payload.head_commit() {
            self.state().last_commit = Some(commit.clone());
        }

        let changes = self.detect_changes().await?;
        let threshold = self.base.repo().threshold;
        self.base.log().debug(
            "push",
            format_args!("delta {} against threshold {threshold}", changes.delta),
        );
        if changes.delta > threshold {
            self.warn_lines_exceeded(changes, threshold).await?;
            self.base.persist(event).await?;
        }
        Ok(())
    }

    async fn detect_changes(&self) -> Result<Changes> {
        let info = self.base.ensure_info().await?;
        let io = self.base.runtime().activities().repo_io(self.base.repo().provider)?;
        let payload = DetectChangesPayload {
            installation_id: info.installation_id,
            owner: info.owner,
            repo_name: info.repo_name,
            default_branch: self.base.repo().default_branch.clone(),
            target_branch: self.base.branch().to_string(),
        };
        let changes = self
            .base
            .invoke_activity("detect_changes", || io.detect_changes(&payload))
            .await?;
        Ok(changes)
    }

    async fn warn_lines_exceeded(&self, changes: Changes, threshold: u64) -> Result<()> {
        let io = self
            .base
            .runtime()
            .activities()
            .message_io(self.base.repo().notify.provider)?;
        let msg = LinesExceededMessage {
            payload: self.base.message_payload(&self.author()),
            threshold,
            changes,
        };
        self.base
            .invoke_activity("send_lines_exceeded", || io.send_lines_exceeded(&msg))
            .await?;
        Ok(())
    }

    async fn on_rebase(&self, event: &Event<Push>) -> Result<()> {
        let target = event.payload.after.clone();
        let info = self.base.ensure_info().await?;
        let activities = self.base.runtime().activities();
        let repo_io = activities.repo_io(self.base.repo().provider)?;
        let git = activities.git();

        let url = self
            .base
            .invoke_activity("tokenized_clone_url", || repo_io.tokenized_clone_url(&info))
            .await?;

        let session = self.base.runtime().sessions().open("rebase").await?;
        let path = session.clone_path().to_path_buf();
        let result = self.rebase_in(git, url, &path, &target).await;

        // The clone is removed on every path, pushed or not.
        if let Err(e) = self
            .base
            .invoke_activity("remove_cloned", || git.remove_cloned(&path))
            .await
        {
            self.base
                .log()
                .warn("remove_cloned", format_args!("{}: {e}", path.display()));
        }
        drop(session);

        match result {
            Ok(()) => {
                self.base
                    .log()
                    .info("rebase", format_args!("rebased onto {}", target.short()));
                Ok(())
            }
            Err(ActivityError::RebaseConflict(conflict)) if conflict.in_progress => {
                self.base
                    .log()
                    .warn("rebase", format_args!("rebase already in progress: {}", conflict.message));
                Ok(())
            }
            Err(ActivityError::RebaseConflict(conflict)) => {
                self.warn_merge_conflict(&conflict, info.repo_url(self.base.repo().provider))
                    .await?;
                self.base.persist(event).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn rebase_in(
        &self,
        git: &A::Git,
        url: String,
        path: &Path,
        target: &Sha,
    ) -> std::result::Result<(), ActivityError> {
        let branch = self.base.branch();
        let payload = ClonePayload {
            url,
            branch: branch.to_string(),
            commit: target.clone(),
            path: path.to_path_buf(),
        };
        let default_branch = &self.base.repo().default_branch;

        self.base
            .invoke_activity("clone_branch", || git.clone_branch(&payload))
            .await?;
        self.base
            .invoke_activity("fetch_branch", || git.fetch_branch(path, default_branch))
            .await?;
        self.base
            .invoke_activity("rebase_at_commit", || git.rebase_at_commit(path, target))
            .await?;
        self.base
            .invoke_activity("push_branch", || git.push_branch(path, branch, true))
            .await
    }

    async fn warn_merge_conflict(&self, conflict: &RebaseConflict, repo_url: String) -> Result<()> {
        self.base.log().warn(
            "rebase",
            format_args!("conflict at {}: {}", conflict.sha, conflict.message),
        );
        let io = self
            .base
            .runtime()
            .activities()
            .message_io(self.base.repo().notify.provider)?;
        let msg = MergeConflictMessage {
            payload: self.base.message_payload(&self.author()),
            commit_url: self.commit_url(),
            repo_url,
            sha: conflict.sha.to_string(),
        };
        self.base
            .invoke_activity("send_merge_conflict", || io.send_merge_conflict(&msg))
            .await?;
        Ok(())
    }

    async fn on_pull_request(&self, event: &Event<PullRequest>) -> Result<()> {
        let pr = event.payload.reference();
        match event.action() {
            EventAction::Created | EventAction::Reopened => {
                let opened = self.state().pr.opened(pr.clone());
                if opened {
                    self.base.log().info("pull_request", format_args!("{} opened", pr.number));
                    let base_branch = pr.base_branch.clone();
                    self.base
                        .signal_queue(&base_branch, Signal::QueueAdd(pr))
                        .await?;
                }
            }
            EventAction::Closed | EventAction::Merged => {
                let was_open = {
                    let mut state = self.state();
                    let was_open = state.pr.open().is_some_and(|open| open.number == pr.number);
                    if was_open {
                        state.pr.closed();
                    }
                    was_open
                };
                if was_open {
                    self.base.log().info("pull_request", format_args!("{} closed", pr.number));
                    self.base
                        .signal_queue(&pr.base_branch, Signal::QueueRemove(pr.number))
                        .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_label(&self, event: &Event<PullRequestLabel>) -> Result<()> {
        let label = &event.payload;
        let config = self.base.runtime().config();
        let urgent = if label.name == config.priority_label {
            true
        } else if label.name == config.queue_label {
            false
        } else {
            return Ok(());
        };

        let pr = match self.state().pr.open() {
            Some(open) if open.number == label.pull_request_number => open.clone(),
            _ => PullRequestRef {
                number: label.pull_request_number,
                head_branch: label.branch.clone(),
                base_branch: self.base.repo().default_branch.clone(),
            },
        };
        let base_branch = pr.base_branch.clone();
        let signal = if urgent {
            Signal::QueueAddPriority(pr)
        } else {
            Signal::QueueAdd(pr)
        };
        self.base.signal_queue(&base_branch, signal).await?;
        Ok(())
    }

    fn author(&self) -> String {
        self.state()
            .last_commit
            .as_ref()
            .map(|c| c.author.clone())
            .unwrap_or_default()
    }

    fn commit_url(&self) -> String {
        self.state()
            .last_commit
            .as_ref()
            .map(|c| c.url.clone())
            .unwrap_or_default()
    }
}

/// Sends a stale-branch warning each time the interval expires.
async fn stale_loop<A: Activities>(
    base: BaseControl<A>,
    state: Arc<Mutex<BranchSnapshot>>,
    interval: StaleInterval,
) {
    while interval.next().await {
        let commit = state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_commit
            .clone();
        if let Err(e) = send_stale(&base, commit).await {
            base.log().warn("stale_check", format_args!("stale warning not sent: {e}"));
        }
    }
}

async fn send_stale<A: Activities>(base: &BaseControl<A>, commit: Option<Commit>) -> Result<()> {
    let info = base.ensure_info().await?;
    let io = base.runtime().activities().message_io(base.repo().notify.provider)?;
    let author = commit.as_ref().map(|c| c.author.as_str()).unwrap_or_default();
    let msg = StaleBranchMessage {
        payload: base.message_payload(author),
        commit_url: commit.as_ref().map(|c| c.url.clone()).unwrap_or_default(),
        repo_url: info.repo_url(base.repo().provider),
    };
    base.log().info("stale_check", "branch is stale");
    base.invoke_activity("send_stale_branch", || io.send_stale_branch(&msg))
        .await?;
    Ok(())
}
