//! Append-only JSON-lines store for flattened events.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{ActivityError, EventStore, Result};
use crate::events::FlatEvent;

/// Appends each saved event as one JSON line and fsyncs it.
#[derive(Debug, Clone)]
pub struct FileEventStore {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl FileEventStore {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(FileEventStore {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every complete event back.
    ///
    /// A torn final line from a crash mid-write is skipped.
    pub fn read_all(path: &Path) -> io::Result<Vec<FlatEvent>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
        }
        Ok(events)
    }
}

impl EventStore for FileEventStore {
    async fn save_event(&self, event: &FlatEvent) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut file = file
                .lock()
                .map_err(|_| ActivityError::Permanent("event store lock poisoned".to_string()))?;
            writeln!(file, "{line}")?;
            file.sync_all()?;
            Ok(())
        })
        .await?
    }
}
