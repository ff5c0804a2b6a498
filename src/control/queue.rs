//! Queue controller: the merge queue of one base branch.
//!
//! Two concerns share the process. Inbox signals mutate the [`QueueSet`]
//! as they arrive, while a processing loop takes one pull request at a time,
//! priority queue first, and runs it to completion. Both run on the same
//! task and interleave only at await points.
//!
//! A pull request whose processing fails goes to the tail of the primary
//! queue, so a poison item never blocks the ones behind it.

use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use super::base::BaseControl;
use super::{ControlArgs, ControlKind, Exit, Result, SHUTDOWN_REASON, Signal, THRESHOLD_REASON};
use crate::activities::{Activities, PrProcessor};
use crate::queue::{QueueError, QueueSet, SerializedQueues};
use crate::runtime::{ControlMessage, Runtime};
use crate::types::{PullRequestRef, Repository};

pub struct QueueController<A> {
    base: BaseControl<A>,
    queues: Arc<Mutex<QueueSet>>,
    ready: Arc<Notify>,
}

impl<A: Activities> QueueController<A> {
    pub fn new(
        runtime: Runtime<A>,
        repo: Repository,
        branch: impl Into<String>,
        serialized: SerializedQueues,
    ) -> Self {
        let base = BaseControl::new(runtime, ControlKind::Queue, repo, branch);
        let queues = match QueueSet::deserialize(serialized.clone()) {
            Ok(queues) => queues,
            Err(e) => {
                base.log()
                    .warn("deserialize", format_args!("rebuilding queues: {e}"));
                rebuild(serialized)
            }
        };
        QueueController {
            base,
            queues: Arc::new(Mutex::new(queues)),
            ready: Arc::new(Notify::new()),
        }
    }

    pub fn base(&self) -> &BaseControl<A> {
        &self.base
    }

    fn queues(&self) -> MutexGuard<'_, QueueSet> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current contents in checkpoint form.
    pub fn snapshot(&self) -> SerializedQueues {
        self.queues().serialize()
    }

    fn args(&self) -> ControlArgs {
        ControlArgs::Queue {
            repo: self.base.repo().clone(),
            branch: self.base.branch().to_string(),
            queues: self.snapshot(),
        }
    }

    pub async fn run(
        self,
        rx: &mut mpsc::Receiver<ControlMessage>,
        cancel: CancellationToken,
    ) -> Result<Exit> {
        if !self.queues().is_empty() {
            self.ready.notify_one();
        }

        let mut processing = pin!(self.process_loop(cancel.clone()));
        loop {
            tokio::select! {
                reason = &mut processing => {
                    return Ok(self.base.checkpoint(reason, self.args()));
                }
                message = rx.recv() => match message {
                    Some(ControlMessage::Signal(signal)) => self.handle(signal),
                    Some(ControlMessage::Shutdown) => {
                        self.base.terminate("shutdown requested");
                        return Ok(Exit::Done);
                    }
                    None => {
                        self.base.terminate("inbox closed");
                        return Ok(Exit::Done);
                    }
                },
            }
        }
    }

    /// Applies a queue mutation.
    pub(crate) fn handle(&self, signal: Signal) {
        let action = signal.name();
        let result = match signal {
            Signal::QueueAdd(pr) => self.add(pr, false),
            Signal::QueueAddPriority(pr) => self.add(pr, true),
            Signal::QueueRemove(number) => {
                if self.queues().remove(number).is_none() {
                    self.base.log().debug(action, format_args!("{number} not queued"));
                }
                Ok(())
            }
            Signal::QueuePromote(number) => {
                if !self.queues().promote(number) {
                    self.base.log().debug(action, format_args!("{number} not promoted"));
                }
                Ok(())
            }
            Signal::QueueDemote(number) => {
                if !self.queues().demote(number) {
                    self.base.log().debug(action, format_args!("{number} not demoted"));
                }
                Ok(())
            }
            other => {
                self.base.log().debug(other.name(), "ignored by queue controller");
                Ok(())
            }
        };
        if let Err(e) = result {
            self.base
                .log()
                .warn(action, format_args!("[{}] {e}", e.code()));
        }
    }

    fn add(&self, pr: PullRequestRef, urgent: bool) -> std::result::Result<(), QueueError> {
        if pr.base_branch != self.base.branch() {
            return Err(QueueError::Unschedulable {
                number: pr.number,
                reason: format!("targets {}, not {}", pr.base_branch, self.base.branch()),
            });
        }
        let number = pr.number;
        self.queues().push(pr, urgent)?;
        self.base.log().info(
            if urgent { "queue_add_priority" } else { "queue_add" },
            format_args!("{number} queued"),
        );
        self.ready.notify_one();
        Ok(())
    }

    /// Processes pull requests until a checkpoint is due.
    ///
    /// Returns the checkpoint reason. Only returns between items, except on
    /// cancellation, where the in-flight item goes back to the queue head.
    async fn process_loop(&self, cancel: CancellationToken) -> &'static str {
        loop {
            if self.base.needs_checkpoint() {
                return THRESHOLD_REASON;
            }
            let pr = tokio::select! {
                _ = cancel.cancelled() => return SHUTDOWN_REASON,
                pr = self.next_ready() => pr,
            };
            if !self.can_process(&pr) {
                self.base
                    .log()
                    .info("process", format_args!("{} not admissible, dropped", pr.number));
                continue;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = self.queues().requeue_front(pr) {
                        self.base.log().warn("process", format_args!("[{}] {e}", e.code()));
                    }
                    return SHUTDOWN_REASON;
                }
                () = self.process(pr.clone()) => {}
            }
        }
    }

    async fn next_ready(&self) -> PullRequestRef {
        loop {
            let next = self.queues().pop();
            if let Some(pr) = next {
                return pr;
            }
            self.ready.notified().await;
        }
    }

    /// Admission check before processing. Admits everything.
    fn can_process(&self, _pr: &PullRequestRef) -> bool {
        true
    }

    /// Runs one pull request as a child process.
    ///
    /// On failure the pull request is appended to the primary queue.
    pub(crate) async fn process(&self, pr: PullRequestRef) {
        let runtime = self.base.runtime().clone();
        let repo = self.base.repo().clone();
        let child_pr = pr.clone();
        let child = async move { runtime.activities().processor().process(&repo, &child_pr).await };

        let id = format!("{}.pr.{}", self.base.branch(), pr.number.0);
        match self.base.invoke_child("process", &id, child).await {
            Ok(()) => {
                self.base
                    .log()
                    .info("process", format_args!("{} processed", pr.number));
            }
            Err(e) => {
                self.base.log().warn(
                    "process",
                    format_args!("{} failed, moving to the back of the queue: {e}", pr.number),
                );
                let number = pr.number;
                if let Err(e) = self.queues().push(pr, false) {
                    self.base
                        .log()
                        .debug("process", format_args!("{number} not requeued: {e}"));
                }
                self.ready.notify_one();
            }
        }
    }
}

/// Best-effort reconstruction of queues that fail validation.
///
/// Priority wins for a pull request present in both.
fn rebuild(serialized: SerializedQueues) -> QueueSet {
    let mut queues = QueueSet::new();
    let mut primary = serialized.primary;
    let mut priority = serialized.priority;
    primary.sort_by_key(|m| m.position);
    priority.sort_by_key(|m| m.position);
    for member in primary {
        let _ = queues.push(member.pr, false);
    }
    for member in priority {
        let _ = queues.push(member.pr, true);
    }
    queues
}
