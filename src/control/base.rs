//! State and helpers shared by every controller.
//!
//! A [`BaseControl`] is cloned into every sub-task a controller spawns (the
//! stale loop, the queue processor). The clones share one [`Shared`] block
//! behind a mutex, so a mutation is never observed half done by another
//! task. The lock is never held across an await.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::log::ControlLog;
use super::{ControlArgs, ControlError, ControlKind, Exit, Signal};
use crate::activities::{Activities, ActivityError, EventStore, MessagePayload, RepoIo};
use crate::events::{Event, Payload};
use crate::runtime::{ControlMessage, Runtime, RuntimeError, retry_with_backoff};
use crate::types::{ProviderInfo, Repository};

/// Mutation weight of a successful activity.
pub const ACTIVITY_WEIGHT: u64 = 10;

/// Mutation weight of a nested process run.
pub const CHILD_WEIGHT: u64 = 3;

/// The next thing a controller loop has to deal with.
#[derive(Debug)]
pub enum Step {
    Signal(Signal),
    /// An explicit shutdown; the controller is already marked done.
    Done,
    /// The runtime is shutting down.
    Cancelled,
}

#[derive(Debug)]
struct Shared {
    info: Option<ProviderInfo>,
    branches: BTreeSet<String>,
    counter: u64,
    active: bool,
}

pub struct BaseControl<A> {
    runtime: Runtime<A>,
    repo: Arc<Repository>,
    kind: ControlKind,
    /// Branch this handle acts on; tags logs and targets signals.
    branch: String,
    log: ControlLog,
    shared: Arc<Mutex<Shared>>,
}

impl<A> Clone for BaseControl<A> {
    fn clone(&self) -> Self {
        BaseControl {
            runtime: self.runtime.clone(),
            repo: Arc::clone(&self.repo),
            kind: self.kind,
            branch: self.branch.clone(),
            log: self.log.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Activities> BaseControl<A> {
    pub fn new(
        runtime: Runtime<A>,
        kind: ControlKind,
        repo: Repository,
        branch: impl Into<String>,
    ) -> Self {
        let branch = branch.into();
        let log = ControlLog::new(kind.as_str(), &repo, branch.clone());
        BaseControl {
            runtime,
            repo: Arc::new(repo),
            kind,
            branch,
            log,
            shared: Arc::new(Mutex::new(Shared {
                info: None,
                branches: BTreeSet::new(),
                counter: 0,
                active: true,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn runtime(&self) -> &Runtime<A> {
        &self.runtime
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn kind(&self) -> ControlKind {
        self.kind
    }

    pub fn log(&self) -> &ControlLog {
        &self.log
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// A handle on the same state that acts on `branch`.
    pub fn with_branch(&self, branch: impl Into<String>) -> Self {
        let branch = branch.into();
        BaseControl {
            log: self.log.with_branch(branch.clone()),
            branch,
            ..self.clone()
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn counter(&self) -> u64 {
        self.lock().counter
    }

    /// True once the weighted mutation count reaches the configured threshold.
    pub fn needs_checkpoint(&self) -> bool {
        self.lock().counter >= self.runtime.config().checkpoint_threshold
    }

    pub(crate) fn increment(&self, weight: u64) {
        let mut shared = self.lock();
        shared.counter = shared.counter.saturating_add(weight);
    }

    pub fn set_info(&self, info: ProviderInfo) {
        self.lock().info = Some(info);
    }

    pub fn info(&self) -> Option<ProviderInfo> {
        self.lock().info.clone()
    }

    /// Replaces the branch set. The default branch and empty names are skipped.
    pub fn set_branches(&self, branches: impl IntoIterator<Item = String>) {
        let default = &self.repo.default_branch;
        let branches = branches
            .into_iter()
            .filter(|b| !b.is_empty() && b != default)
            .collect();
        self.lock().branches = branches;
    }

    /// Adds a branch. Returns false if it was already known or not eligible.
    pub fn add_branch(&self, branch: &str) -> bool {
        if branch.is_empty() || self.repo.is_default(branch) {
            return false;
        }
        self.lock().branches.insert(branch.to_string())
    }

    pub fn remove_branch(&self, branch: &str) -> bool {
        self.lock().branches.remove(branch)
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        self.lock().branches.contains(branch)
    }

    /// Known branches in name order.
    pub fn branches(&self) -> Vec<String> {
        self.lock().branches.iter().cloned().collect()
    }

    pub fn set_done(&self) {
        self.lock().active = false;
    }

    pub fn terminate(&self, reason: &str) {
        self.set_done();
        self.log.info("terminate", format_args!("terminating: {reason}"));
    }

    /// Waits for the next inbox message or cancellation.
    pub async fn next_step(
        &self,
        rx: &mut mpsc::Receiver<ControlMessage>,
        cancel: &CancellationToken,
    ) -> Step {
        tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            message = rx.recv() => match message {
                Some(ControlMessage::Signal(signal)) => Step::Signal(signal),
                Some(ControlMessage::Shutdown) => {
                    self.terminate("shutdown requested");
                    Step::Done
                }
                None => {
                    self.terminate("inbox closed");
                    Step::Done
                }
            },
        }
    }

    /// Logs a failed signal handler and keeps going.
    ///
    /// Registry errors are misconfiguration and end the controller.
    pub fn absorb(&self, action: &str, result: Result<(), ControlError>) -> Result<(), ControlError> {
        match result {
            Ok(()) => Ok(()),
            Err(ControlError::Registry(e)) => {
                self.log.error(action, format_args!("{e}"));
                Err(ControlError::Registry(e))
            }
            Err(e) => {
                self.log.warn(action, format_args!("handler failed: {e}"));
                Ok(())
            }
        }
    }

    pub fn checkpoint(&self, reason: &str, args: ControlArgs) -> Exit {
        self.log.info(
            "checkpoint",
            format_args!("checkpointing after {} mutations ({reason})", self.counter()),
        );
        Exit::Checkpoint {
            reason: reason.to_string(),
            args,
        }
    }

    /// Runs an activity with the configured timeout and retry policy.
    ///
    /// Each attempt is bounded by the activity timeout. Adds
    /// [`ACTIVITY_WEIGHT`] to the mutation counter on success; the error of
    /// the last attempt is returned unchanged.
    pub async fn invoke_activity<T, F, Fut>(&self, action: &str, mut op: F) -> Result<T, ActivityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let config = self.runtime.config();
        let timeout = config.activity_timeout;
        self.log.debug(action, "invoking activity");

        let result = retry_with_backoff(config.retry, || {
            let attempt = op();
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(ActivityError::Timeout(timeout)),
                }
            }
        })
        .await
        .into_result();

        match &result {
            Ok(_) => {
                self.increment(ACTIVITY_WEIGHT);
                self.log.debug(action, "activity succeeded");
            }
            Err(e) => self.log.error(action, format_args!("activity failed: {e}")),
        }
        result
    }

    /// Runs a nested process to completion on its own task.
    ///
    /// Bounded by the child timeout. A panic or timeout is reported as an
    /// [`ActivityError`]. Adds [`CHILD_WEIGHT`] to the counter once the child
    /// has finished, successfully or not.
    pub async fn invoke_child<T, F>(&self, action: &str, id: &str, child: F) -> Result<T, ActivityError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ActivityError>> + Send + 'static,
    {
        let timeout = self.runtime.config().child_timeout;
        self.log.debug(action, format_args!("starting child {id}"));

        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, child).await {
                Ok(result) => result,
                Err(_) => Err(ActivityError::Timeout(timeout)),
            }
        });
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(e.into()),
        };

        self.increment(CHILD_WEIGHT);
        match &result {
            Ok(_) => self.log.debug(action, format_args!("child {id} completed")),
            Err(e) => self.log.error(action, format_args!("child {id} failed: {e}")),
        }
        result
    }

    /// Starts a concurrent sub-task and returns its handle.
    pub fn invoke_async<F>(&self, action: &str, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.log.debug(action, "starting async task");
        tokio::spawn(task)
    }

    /// Signals the controller of `branch`, starting it if needed.
    ///
    /// The default branch goes to the trunk controller.
    pub async fn signal_branch(&self, branch: &str, signal: Signal) -> Result<(), RuntimeError> {
        let args = if self.repo.is_default(branch) {
            ControlArgs::Trunk {
                repo: (*self.repo).clone(),
            }
        } else {
            ControlArgs::Branch {
                repo: (*self.repo).clone(),
                branch: branch.to_string(),
                snapshot: None,
            }
        };
        self.signal_control("signal_branch_ctrl", branch, args, signal)
            .await
    }

    /// Signals the merge queue of `branch`, starting it if needed.
    pub async fn signal_queue(&self, branch: &str, signal: Signal) -> Result<(), RuntimeError> {
        let args = ControlArgs::Queue {
            repo: (*self.repo).clone(),
            branch: branch.to_string(),
            queues: Default::default(),
        };
        self.signal_control("signal_queue_ctrl", branch, args, signal)
            .await
    }

    async fn signal_control(
        &self,
        action: &str,
        target: &str,
        args: ControlArgs,
        signal: Signal,
    ) -> Result<(), RuntimeError> {
        let name = signal.name();
        match self.runtime.signal_with_start(args, signal).await {
            Ok(()) => {
                self.increment(ACTIVITY_WEIGHT);
                self.log.debug(action, format_args!("sent {name} to {target}"));
                Ok(())
            }
            Err(e) => {
                self.log.error(action, format_args!("failed to send {name} to {target}: {e}"));
                Err(e)
            }
        }
    }

    /// Fetches provider metadata and caches it.
    pub async fn refresh_info(&self) -> Result<ProviderInfo, ControlError> {
        let io = self.runtime.activities().repo_io(self.repo.provider)?;
        let repo = &*self.repo;
        let info = self
            .invoke_activity("get_provider_info", || io.provider_info(repo))
            .await?;
        self.set_info(info.clone());
        Ok(info)
    }

    /// The cached provider metadata, fetching it on first use.
    pub async fn ensure_info(&self) -> Result<ProviderInfo, ControlError> {
        match self.info() {
            Some(info) => Ok(info),
            None => self.refresh_info().await,
        }
    }

    /// Reloads the branch set from the provider.
    pub async fn refresh_branches(&self) -> Result<(), ControlError> {
        let info = self.ensure_info().await?;
        let io = self.runtime.activities().repo_io(self.repo.provider)?;
        let branches = self
            .invoke_activity("get_all_branches", || io.all_branches(&info))
            .await?;
        self.set_branches(branches);
        self.log
            .debug("get_all_branches", format_args!("{} branches known", self.lock().branches.len()));
        Ok(())
    }

    /// Notification fields for this branch, addressed to `author`.
    pub fn message_payload(&self, author: &str) -> MessagePayload {
        let repo_name = self
            .info()
            .map(|info| info.repo_name)
            .unwrap_or_else(|| self.repo.provider_id.clone());
        MessagePayload::for_repo(&self.repo, &repo_name, &self.branch, author)
    }

    /// Saves the flattened form of `event` to the event store.
    pub async fn persist<P: Payload>(&self, event: &Event<P>) -> Result<(), ActivityError> {
        let flat = event
            .flatten()
            .map_err(|e| ActivityError::Permanent(e.to_string()))?;
        let store = self.runtime.activities().events();
        self.invoke_activity("save_event", || store.save_event(&flat))
            .await
    }
}
