//! Repository controller: the entry point for provider events.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::base::{BaseControl, Step};
use super::{
    ControlArgs, ControlError, ControlKind, Exit, Result, SHUTDOWN_REASON, Signal,
    THRESHOLD_REASON,
};
use crate::activities::Activities;
use crate::events::{BranchTriggers, EventAction};
use crate::runtime::{ControlMessage, Runtime};
use crate::types::Repository;

/// Routes inbound events to the controller of the branch they concern.
///
/// Keeps the branch set and the lineage of branch creations; holds no
/// state across checkpoints.
pub struct RepoController<A> {
    base: BaseControl<A>,
    triggers: BranchTriggers,
}

impl<A: Activities> RepoController<A> {
    pub fn new(runtime: Runtime<A>, repo: Repository) -> Self {
        RepoController {
            base: BaseControl::new(runtime, ControlKind::Repo, repo, ""),
            triggers: BranchTriggers::new(),
        }
    }

    pub fn base(&self) -> &BaseControl<A> {
        &self.base
    }

    fn args(&self) -> ControlArgs {
        ControlArgs::Repo {
            repo: self.base.repo().clone(),
        }
    }

    pub async fn run(
        mut self,
        rx: &mut mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
    ) -> Result<Exit> {
        match self.base.refresh_info().await {
            Ok(_) => {}
            Err(ControlError::Registry(e)) => return Err(e.into()),
            Err(e) => self.base.log().warn("get_provider_info", e),
        }

        loop {
            if !self.base.is_active() {
                return Ok(Exit::Done);
            }
            if self.base.needs_checkpoint() {
                return Ok(self.base.checkpoint(THRESHOLD_REASON, self.args()));
            }

            match self.base.next_step(rx, &cancel).await {
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

    pub(crate) async fn handle(&mut self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Push(mut event) => {
                let branch = event.payload.branch().to_string();
                if event.context.parent_id.is_none() {
                    if let Some(parent) = self.triggers.get(&branch) {
                        event.set_parent(parent);
                    }
                }
                self.route(&branch, Signal::Push(event)).await;
            }
            Signal::CreateOrDelete(event) => {
                if !event.payload.is_branch() {
                    self.base
                        .log()
                        .debug("create_delete", format_args!("ignoring tag {}", event.payload.name()));
                    return Ok(());
                }
                let branch = event.payload.name().to_string();
                match event.action() {
                    EventAction::Created => {
                        self.base.add_branch(&branch);
                        self.triggers.add(branch.clone(), event.id());
                    }
                    EventAction::Deleted => {
                        self.base.remove_branch(&branch);
                        self.triggers.remove(&branch);
                    }
                    _ => {}
                }
                let default = self.base.repo().default_branch.clone();
                if branch != default {
                    self.route(&default, Signal::CreateOrDelete(event.clone())).await;
                }
                self.route(&branch, Signal::CreateOrDelete(event)).await;
            }
            Signal::PullRequest(event) => {
                let branch = event.payload.head_branch.clone();
                self.route(&branch, Signal::PullRequest(event)).await;
            }
            Signal::PullRequestLabel(event) => {
                let branch = event.payload.branch.clone();
                self.route(&branch, Signal::PullRequestLabel(event)).await;
            }
            Signal::PullRequestReview(event) => {
                let branch = event.payload.branch.clone();
                self.route(&branch, Signal::PullRequestReview(event)).await;
            }
            Signal::PullRequestComment(event) => {
                let branch = event.payload.branch.clone();
                self.route(&branch, Signal::PullRequestComment(event)).await;
            }
            signal if signal.is_queue() => {
                // Number-only signals address the default branch's queue.
                let branch = match &signal {
                    Signal::QueueAdd(pr) | Signal::QueueAddPriority(pr) => pr.base_branch.clone(),
                    _ => self.base.repo().default_branch.clone(),
                };
                let _ = self.base.signal_queue(&branch, signal).await;
            }
            other => {
                self.base
                    .log()
                    .warn(other.name(), "signal not handled by repository controller");
            }
        }
        Ok(())
    }

    async fn route(&self, branch: &str, signal: Signal) {
        // Failures are logged by signal_branch; one lost route must not stop the others.
        let _ = self.base.signal_branch(branch, signal).await;
    }
}
