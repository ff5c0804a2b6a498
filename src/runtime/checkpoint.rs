//! On-disk checkpoints of control process arguments.
//!
//! When a control process checkpoints, the arguments it restarts with are
//! written to `<state_dir>/<control-id>.json`. A process that is started while
//! such a file exists resumes from it instead of from the arguments it was
//! started with.
//!
//! # Atomic Writes
//!
//! 1. Write to `<file>.tmp`
//! 2. fsync the file
//! 3. Rename over `<file>`
//! 4. fsync the directory
//!
//! Readers see either the previous checkpoint or the new one.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::control::ControlArgs;
use crate::types::ControlId;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredCheckpoint {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    reason: String,
    args: ControlArgs,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(CheckpointStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: &ControlId) -> PathBuf {
        self.dir.join(id.file_name())
    }

    pub fn save(&self, reason: &str, args: &ControlArgs) -> Result<()> {
        let stored = StoredCheckpoint {
            schema_version: SCHEMA_VERSION,
            saved_at: Utc::now(),
            reason: reason.to_string(),
            args: args.clone(),
        };
        let path = self.path_for(&args.control_id());
        let tmp = path.with_extension("json.tmp");

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp)?;
            serde_json::to_writer_pretty(&mut file, &stored)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp, &path)?;
        fsync_dir(&self.dir)?;
        Ok(())
    }

    /// Loads the checkpoint for `id`, or `None` if there is none.
    pub fn load(&self, id: &ControlId) -> Result<Option<ControlArgs>> {
        let content = match std::fs::read_to_string(self.path_for(id)) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredCheckpoint = serde_json::from_str(&content)?;
        if stored.schema_version != SCHEMA_VERSION {
            return Err(CheckpointError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                got: stored.schema_version,
            });
        }
        Ok(Some(stored.args))
    }

    /// Deletes the checkpoint for `id`. A missing file is not an error.
    pub fn remove(&self, id: &ControlId) -> Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => {
                fsync_dir(&self.dir)?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored checkpoint, in file name order.
    pub fn list(&self) -> Result<Vec<ControlArgs>> {
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                ids.push(path);
            }
        }
        ids.sort();

        let mut all = Vec::with_capacity(ids.len());
        for path in ids {
            let stored: StoredCheckpoint = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
            if stored.schema_version == SCHEMA_VERSION {
                all.push(stored.args);
            }
        }
        Ok(all)
    }
}

/// Syncs a directory so renames and deletions in it are durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
