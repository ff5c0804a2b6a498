//! Trunk controller: the repository's default branch.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::base::{BaseControl, Step};
use super::{
    ControlArgs, ControlError, ControlKind, Exit, Result, SHUTDOWN_REASON, Signal,
    THRESHOLD_REASON,
};
use crate::activities::Activities;
use crate::events::EventAction;
use crate::runtime::{ControlMessage, Runtime};
use crate::types::Repository;

/// Keeps every feature branch informed of new trunk commits.
pub struct TrunkController<A> {
    base: BaseControl<A>,
}

impl<A: Activities> TrunkController<A> {
    pub fn new(runtime: Runtime<A>, repo: Repository) -> Self {
        let branch = repo.default_branch.clone();
        TrunkController {
            base: BaseControl::new(runtime, ControlKind::Trunk, repo, branch),
        }
    }

    pub fn base(&self) -> &BaseControl<A> {
        &self.base
    }

    fn args(&self) -> ControlArgs {
        ControlArgs::Trunk {
            repo: self.base.repo().clone(),
        }
    }

    pub async fn run(
        self,
        rx: &mut mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
    ) -> Result<Exit> {
        match self.base.refresh_branches().await {
            Ok(()) => {}
            Err(ControlError::Registry(e)) => return Err(e.into()),
            Err(e) => self.base.log().warn("get_all_branches", e),
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

    pub(crate) async fn handle(&self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Push(event) => {
                let source = event.payload.branch().to_string();
                let targets: Vec<_> = self
                    .base
                    .branches()
                    .into_iter()
                    .filter(|b| *b != source)
                    .collect();
                self.base.log().info(
                    "push",
                    format_args!("fanning out rebase of {} to {} branches", event.payload.after.short(), targets.len()),
                );
                for branch in targets {
                    // Failures are logged by signal_branch.
                    let _ = self
                        .base
                        .signal_branch(&branch, Signal::Rebase(event.clone()))
                        .await;
                }
            }
            Signal::CreateOrDelete(event) if event.payload.is_branch() => {
                let branch = event.payload.name();
                match event.action() {
                    EventAction::Created => {
                        self.base.add_branch(branch);
                    }
                    EventAction::Deleted => {
                        self.base.remove_branch(branch);
                    }
                    _ => {}
                }
            }
            other => {
                self.base.log().debug(other.name(), "ignored by trunk controller");
            }
        }
        Ok(())
    }
}
