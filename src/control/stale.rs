//! Restartable stale-branch interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// An interval that fires after `duration` of quiet.
///
/// [`StaleInterval::restart`] pushes the next expiry out by a full duration.
/// Clones share the same timer.
#[derive(Debug, Clone)]
pub struct StaleInterval {
    duration: Duration,
    reset: Arc<Notify>,
    cancel: CancellationToken,
}

impl StaleInterval {
    pub fn new(duration: Duration, cancel: CancellationToken) -> Self {
        StaleInterval {
            duration,
            reset: Arc::new(Notify::new()),
            cancel,
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Waits for the next expiry. Returns false once cancelled.
    pub async fn next(&self) -> bool {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = self.reset.notified() => continue,
                _ = tokio::time::sleep(self.duration) => return true,
            }
        }
    }

    pub fn restart(&self) {
        self.reset.notify_one();
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}
