//! Workspace management: the run's isolated filesystem footprint.

use crate::errors::SimflowError;
use crate::settings::RunSettings;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Subdirectory names under the workspace root.
const RUN_DIR: &str = "run";
const REPLAY_DIR: &str = "replay";
const TMP_DIR: &str = "tmp";
const LOGS_DIR: &str = "logs";

/// One run's directory tree.
///
/// Everything the core creates or deletes lives under `root`. The output
/// store is only ever created and appended to, never cleaned, and deletion
/// outside the root is refused outright so a failed run cannot take
/// pre-existing user data with it.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    outputs: PathBuf,
}

impl Workspace {
    /// Creates a workspace over the given root and output store.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, outputs: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            outputs: outputs.into(),
        }
    }

    /// Creates the workspace described by the run settings.
    #[must_use]
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self::new(settings.run.workspace.clone(), settings.outputs_dir())
    }

    /// The workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where stages execute.
    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.root.join(RUN_DIR)
    }

    /// Where replayed archives materialize their payloads.
    #[must_use]
    pub fn replay_dir(&self) -> PathBuf {
        self.root.join(REPLAY_DIR)
    }

    /// Scratch space, including the journal's payload staging area.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    /// Where external-program logs are written.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// The persistent output store.
    #[must_use]
    pub fn outputs_dir(&self) -> &Path {
        &self.outputs
    }

    /// Creates a clean run tree.
    ///
    /// `run/`, `replay/`, `tmp/` and `logs/` are removed and recreated; the
    /// output store is created if missing but never cleaned.
    pub fn prepare(&self) -> Result<(), SimflowError> {
        debug!(root = %self.root.display(), "preparing workspace");
        std::fs::create_dir_all(&self.root)?;
        for dir in [
            self.run_dir(),
            self.replay_dir(),
            self.tmp_dir(),
            self.logs_dir(),
        ] {
            self.remove_tree(&dir)?;
            std::fs::create_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&self.outputs)?;
        Ok(())
    }

    /// Removes a directory tree, refusing anything outside the root.
    fn remove_tree(&self, path: &Path) -> Result<(), SimflowError> {
        if !path.starts_with(&self.root) {
            return Err(SimflowError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!(
                    "refusing to remove '{}': outside workspace '{}'",
                    path.display(),
                    self.root.display()
                ),
            )));
        }
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }

    /// Places an input file at its destination, replacing anything stale.
    ///
    /// On unix the file is symlinked; elsewhere it is copied.
    pub fn place_input(&self, source: &Path, dest: &Path) -> Result<(), SimflowError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if dest.symlink_metadata().is_ok() {
            debug!(dest = %dest.display(), "replacing stale input placement");
            std::fs::remove_file(dest)?;
        }
        link_or_copy(source, dest)?;
        debug!(source = %source.display(), dest = %dest.display(), "placed input file");
        Ok(())
    }

    /// Moves a produced file to its persistent destination.
    ///
    /// Overwrites (with a warning) and falls back to copy-and-delete when the
    /// destination is on another filesystem.
    pub fn collect_output(&self, source: &Path, dest: &Path) -> Result<(), SimflowError> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if dest.exists() {
            warn!(dest = %dest.display(), "overwriting existing output file");
            std::fs::remove_file(dest)?;
        }
        if std::fs::rename(source, dest).is_err() {
            // Cross-device move.
            std::fs::copy(source, dest)?;
            std::fs::remove_file(source)?;
        }
        debug!(source = %source.display(), dest = %dest.display(), "collected output file");
        Ok(())
    }
}

#[cfg(unix)]
fn link_or_copy(source: &Path, dest: &Path) -> Result<(), SimflowError> {
    std::os::unix::fs::symlink(source, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_or_copy(source: &Path, dest: &Path) -> Result<(), SimflowError> {
    std::fs::copy(source, dest)?;
    Ok(())
}
