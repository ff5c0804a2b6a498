//! Sessions pinning a group of git activities to one checkout.
//!
//! A rebase clones, fetches, rebases and pushes in the same directory. The
//! pool hands out at most `session_slots` sessions at a time and gives each
//! one its own clone path under the clone root.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use uuid::Uuid;

use super::RuntimeError;

#[derive(Debug, Clone)]
pub struct SessionPool {
    slots: Arc<Semaphore>,
    root: PathBuf,
}

impl SessionPool {
    pub fn new(root: impl Into<PathBuf>, slots: usize) -> Self {
        SessionPool {
            slots: Arc::new(Semaphore::new(slots.max(1))),
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Waits for a free slot and opens a session in it.
    pub async fn open(&self, label: &str) -> Result<Session, RuntimeError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::ShuttingDown)?;
        let id = Uuid::new_v4();
        let path = self.root.join(id.to_string());
        debug!(session = %id, label, path = %path.display(), "Session opened");
        Ok(Session {
            id,
            label: label.to_string(),
            path,
            _permit: permit,
        })
    }
}

/// An open session. The slot is released when this is dropped.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    label: String,
    path: PathBuf,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ephemeral checkout path owned by this session.
    pub fn clone_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!(session = %self.id, label = %self.label, "Session closed");
    }
}
