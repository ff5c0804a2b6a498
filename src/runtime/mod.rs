//! In-process execution substrate for control processes.
//!
//! Every repository, trunk, branch and merge queue is driven by one control
//! process: a tokio task with its own inbox, identified by a deterministic
//! [`ControlId`]. Signals addressed to an id that is not running start it
//! first (signal-with-start), so callers never need to know whether the
//! target exists.
//!
//! # Lifecycle
//!
//! ```text
//!   signal_with_start ──► get_or_start ──► spawn_control ──► drive
//!                                                             │
//!            ┌────────────────────────────────────────────────┤
//!            │                                                ▼
//!   Exit::Checkpoint: save args, restart             Exit::Done: delete
//!   on the same inbox (unless shutting down)         checkpoint, deregister
//! ```
//!
//! Signals still queued in the inbox of a process that finished as done are
//! redelivered, in order, to a fresh process for the same id.
//!
//! Checkpoints bound the in-memory history a controller accumulates. When a
//! state directory is configured, the restart arguments are also written to
//! disk and a later start of the same id resumes from them.

pub mod checkpoint;
pub mod retry;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::activities::Activities;
use crate::config::Config;
use crate::control::{self, ControlArgs, Exit, Signal};
use crate::types::ControlId;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use retry::{RetryConfig, RetryResult, retry_with_backoff};
pub use session::{Session, SessionPool};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to send message to control process: channel closed")]
    ChannelClosed,

    #[error("no control process running for {0}")]
    NotRunning(ControlId),

    #[error("runtime is shutting down")]
    ShuttingDown,

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Messages delivered to a control process inbox.
#[derive(Debug)]
pub enum ControlMessage {
    Signal(Signal),

    /// Explicit request to finish. The process exits as done.
    Shutdown,
}

struct ControlHandle {
    tx: mpsc::Sender<ControlMessage>,
    task: JoinHandle<()>,
    cancel: CancellationToken,
    /// Distinguishes a restarted process from the one it replaced.
    generation: u64,
}

struct Inner<A> {
    activities: A,
    config: Config,
    controls: RwLock<HashMap<ControlId, ControlHandle>>,
    checkpoints: Option<CheckpointStore>,
    sessions: SessionPool,
    shutdown: CancellationToken,
    generation: AtomicU64,
}

/// Registry and driver of running control processes.
///
/// Cheap to clone; every controller holds a clone to signal its peers.
pub struct Runtime<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for Runtime<A> {
    fn clone(&self) -> Self {
        Runtime {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Activities> Runtime<A> {
    pub fn new(activities: A, config: Config) -> Result<Self> {
        let checkpoints = config
            .state_dir
            .as_ref()
            .map(CheckpointStore::open)
            .transpose()?;
        let sessions = SessionPool::new(&config.clone_root, config.session_slots);

        info!(
            state_dir = ?config.state_dir,
            clone_root = %config.clone_root.display(),
            checkpoint_threshold = config.checkpoint_threshold,
            "Creating runtime"
        );

        Ok(Runtime {
            inner: Arc::new(Inner {
                activities,
                config,
                controls: RwLock::new(HashMap::new()),
                checkpoints,
                sessions,
                shutdown: CancellationToken::new(),
                generation: AtomicU64::new(0),
            }),
        })
    }

    pub fn activities(&self) -> &A {
        &self.inner.activities
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn sessions(&self) -> &SessionPool {
        &self.inner.sessions
    }

    pub fn checkpoints(&self) -> Option<&CheckpointStore> {
        self.inner.checkpoints.as_ref()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Starts the process described by `args` if it is not running, then
    /// delivers `signal` to it.
    ///
    /// Safe to call concurrently. Signals to one process are handled in the
    /// order they were delivered.
    #[instrument(skip(self, args, signal), fields(control = %args.control_id(), signal = signal.name()))]
    pub async fn signal_with_start(&self, args: ControlArgs, signal: Signal) -> Result<()> {
        let mut message = ControlMessage::Signal(signal);

        // A process that exits between lookup and send drops its inbox; the
        // second attempt starts a fresh one.
        for _ in 0..2 {
            let (tx, generation) = self.get_or_start(&args).await?;
            match tx.send(message).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    debug!("Inbox closed, restarting control process");
                    self.deregister(&args.control_id(), generation).await;
                    message = returned;
                }
            }
        }
        Err(RuntimeError::ChannelClosed)
    }

    /// Starts the process described by `args` without signalling it.
    pub async fn start(&self, args: ControlArgs) -> Result<()> {
        self.get_or_start(&args).await.map(|_| ())
    }

    /// Asks a running process to finish as done.
    #[instrument(skip(self), fields(control = %id))]
    pub async fn stop(&self, id: &ControlId) -> Result<()> {
        let tx = self.sender(id).await?;
        tx.send(ControlMessage::Shutdown)
            .await
            .map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn is_running(&self, id: &ControlId) -> bool {
        self.inner.controls.read().await.contains_key(id)
    }

    pub async fn control_count(&self) -> usize {
        self.inner.controls.read().await.len()
    }

    pub async fn running(&self) -> Vec<ControlId> {
        let mut ids: Vec<_> = self.inner.controls.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Starts every process that has a checkpoint on disk.
    pub async fn resume_all(&self) -> Result<usize> {
        let Some(store) = &self.inner.checkpoints else {
            return Ok(0);
        };
        let saved = store.list()?;
        let count = saved.len();
        for args in saved {
            self.get_or_start(&args).await?;
        }
        info!(count, "Resumed control processes from checkpoints");
        Ok(count)
    }

    /// Cancels every process and waits for them to exit.
    ///
    /// Controllers answer cancellation with a `"shutdown"` checkpoint, which
    /// is saved but not restarted.
    pub async fn shutdown_all(&self) {
        info!("Shutting down all control processes");
        self.inner.shutdown.cancel();

        let handles: Vec<_> = {
            let mut controls = self.inner.controls.write().await;
            controls.drain().collect()
        };
        for (id, handle) in handles {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                warn!(control = %id, error = %e, "Control task ended abnormally");
            }
        }
    }

    async fn sender(&self, id: &ControlId) -> Result<mpsc::Sender<ControlMessage>> {
        self.inner
            .controls
            .read()
            .await
            .get(id)
            .map(|handle| handle.tx.clone())
            .ok_or_else(|| RuntimeError::NotRunning(id.clone()))
    }

    async fn get_or_start(&self, args: &ControlArgs) -> Result<(mpsc::Sender<ControlMessage>, u64)> {
        let id = args.control_id();

        {
            let controls = self.inner.controls.read().await;
            if let Some(handle) = controls.get(&id) {
                return Ok((handle.tx.clone(), handle.generation));
            }
        }

        let mut controls = self.inner.controls.write().await;

        // Double-check after acquiring write lock
        if let Some(handle) = controls.get(&id) {
            return Ok((handle.tx.clone(), handle.generation));
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(RuntimeError::ShuttingDown);
        }

        let start_args = match self.inner.checkpoints.as_ref().map(|s| s.load(&id)) {
            Some(Ok(Some(saved))) => {
                info!(control = %id, "Resuming control process from checkpoint");
                saved
            }
            Some(Err(e)) => {
                warn!(control = %id, error = %e, "Ignoring unreadable checkpoint");
                args.clone()
            }
            Some(Ok(None)) | None => args.clone(),
        };

        let (tx, rx) = mpsc::channel(self.inner.config.channel_buffer);
        let cancel = self.inner.shutdown.child_token();
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);

        debug!(control = %id, generation, "Spawning control process");
        let task = spawn_control(self.clone(), start_args, rx, cancel.clone(), generation);

        controls.insert(
            id,
            ControlHandle {
                tx: tx.clone(),
                task,
                cancel,
                generation,
            },
        );
        Ok((tx, generation))
    }

    /// Removes `id` from the registry if it is still the given generation.
    async fn deregister(&self, id: &ControlId, generation: u64) {
        let mut controls = self.inner.controls.write().await;
        if controls.get(id).is_some_and(|h| h.generation == generation) {
            controls.remove(id);
        }
    }

    /// Hands messages left in a finished process's inbox to a fresh process,
    /// in the order they arrived.
    async fn redeliver(&self, args: &ControlArgs, rx: &mut mpsc::Receiver<ControlMessage>) {
        let id = args.control_id();
        let fresh = args.fresh();
        while let Ok(message) = rx.try_recv() {
            match message {
                ControlMessage::Signal(signal) => {
                    let name = signal.name();
                    debug!(control = %id, signal = name, "Redelivering signal to a fresh process");
                    if let Err(e) = self.signal_with_start(fresh.clone(), signal).await {
                        warn!(control = %id, signal = name, error = %e, "Dropping signal left in finished inbox");
                    }
                }
                ControlMessage::Shutdown => {
                    if self.is_running(&id).await {
                        if let Err(e) = self.stop(&id).await {
                            debug!(control = %id, error = %e, "Fresh process already gone");
                        }
                    }
                }
            }
        }
    }

    fn save_checkpoint(&self, reason: &str, args: &ControlArgs) {
        if let Some(store) = &self.inner.checkpoints {
            if let Err(e) = store.save(reason, args) {
                error!(control = %args.control_id(), error = %e, "Failed to save checkpoint");
            }
        }
    }

    fn remove_checkpoint(&self, id: &ControlId) {
        if let Some(store) = &self.inner.checkpoints {
            if let Err(e) = store.remove(id) {
                error!(control = %id, error = %e, "Failed to remove checkpoint");
            }
        }
    }
}

/// Spawns the task driving one control process.
///
/// Kept as a plain function so the spawned future's type does not appear in
/// the futures of the async methods that start processes.
fn spawn_control<A: Activities>(
    runtime: Runtime<A>,
    args: ControlArgs,
    rx: mpsc::Receiver<ControlMessage>,
    cancel: CancellationToken,
    generation: u64,
) -> JoinHandle<()> {
    tokio::spawn(drive(runtime, args, rx, cancel, generation))
}

/// Runs controllers for one id until one finishes, fails, or is cancelled.
async fn drive<A: Activities>(
    runtime: Runtime<A>,
    mut args: ControlArgs,
    mut rx: mpsc::Receiver<ControlMessage>,
    cancel: CancellationToken,
    generation: u64,
) {
    let id = args.control_id();
    loop {
        match control::run(runtime.clone(), args.clone(), &mut rx, cancel.clone()).await {
            Ok(Exit::Done) => {
                debug!(control = %id, "Control process done");
                runtime.remove_checkpoint(&id);
                rx.close();
                runtime.deregister(&id, generation).await;
                runtime.redeliver(&args, &mut rx).await;
                return;
            }
            Ok(Exit::Checkpoint { reason, args: next }) => {
                runtime.save_checkpoint(&reason, &next);
                if cancel.is_cancelled() {
                    debug!(control = %id, reason, "Checkpointed for shutdown");
                    break;
                }
                info!(control = %id, reason, "Restarting control process from checkpoint");
                args = next;
            }
            Err(e) => {
                error!(control = %id, error = %e, "Control process failed");
                break;
            }
        }
    }
    runtime.deregister(&id, generation).await;
}
