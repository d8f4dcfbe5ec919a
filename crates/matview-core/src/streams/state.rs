//! Local state directory for view checkpoints.
//!
//! Layout: `{state_dir}/{application_id}/{store}.checkpoint.json`. Writes go
//! to a temporary file that is synced and renamed into place, so a reader
//! sees either the previous checkpoint or the new one.

use super::view::ViewCheckpoint;
use crate::{Error, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

const CHECKPOINT_SUFFIX: &str = ".checkpoint.json";

/// State directory of one application.
#[derive(Debug, Clone)]
pub struct StateDirectory {
    root: PathBuf,
}

impl StateDirectory {
    /// State directory for `application_id` under `state_dir`.
    pub fn new(state_dir: &Path, application_id: &str) -> Self {
        Self {
            root: state_dir.join(application_id),
        }
    }

    /// Directory path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Checkpoint file of `store`.
    pub fn checkpoint_path(&self, store: &str) -> PathBuf {
        self.root.join(format!("{}{}", store, CHECKPOINT_SUFFIX))
    }

    /// Remove all local state. Returns whether anything was removed.
    pub fn clean_up(&self) -> Result<bool> {
        if !self.root.exists() {
            debug!(path = %self.root.display(), "No local state to clean up");
            return Ok(false);
        }

        fs::remove_dir_all(&self.root).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to remove state directory {}: {}", self.root.display(), e),
            ))
        })?;
        info!(path = %self.root.display(), "Local state cleaned up");
        Ok(true)
    }

    /// Atomically write a checkpoint.
    pub fn write_checkpoint(&self, checkpoint: &ViewCheckpoint) -> Result<PathBuf> {
        fs::create_dir_all(&self.root)?;

        let target = self.checkpoint_path(&checkpoint.store);
        let temp = self
            .root
            .join(format!(".{}.{}.tmp", checkpoint.store, Uuid::new_v4()));

        let json = serde_json::to_vec(checkpoint)?;
        {
            let mut file = File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }

        if let Err(e) = fs::rename(&temp, &target) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(
            store = %checkpoint.store,
            entries = checkpoint.entries.len(),
            path = %target.display(),
            "Checkpoint written"
        );
        Ok(target)
    }

    /// Read the checkpoint of `store`, if one exists.
    pub fn read_checkpoint(&self, store: &str) -> Result<Option<ViewCheckpoint>> {
        let path = self.checkpoint_path(store);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: ViewCheckpoint = serde_json::from_slice(&bytes)?;
        debug!(store = %store, path = %path.display(), "Checkpoint read");
        Ok(Some(checkpoint))
    }
}
