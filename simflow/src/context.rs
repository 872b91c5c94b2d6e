//! The run context: one run's settings, workspace, registry, and journal.
//!
//! Every stage operation takes a `&RunContext` instead of reaching for
//! process-wide state, so independent runs (and tests) can coexist in one
//! process. A context is built once, optionally gets a journal attached,
//! and is then shared by reference for the life of the run.

use crate::errors::SimflowError;
use crate::journal::{ArchiveMode, ReplayJournal};
use crate::registry::ConfigRegistry;
use crate::resources::ResourceRoots;
use crate::settings::RunSettings;
use crate::workspace::Workspace;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared state for one orchestration run.
#[derive(Debug)]
pub struct RunContext {
    settings: RunSettings,
    run_id: Uuid,
    roots: ResourceRoots,
    workspace: Workspace,
    registry: ConfigRegistry,
    journal: RwLock<Option<Arc<ReplayJournal>>>,
    dry_run: bool,
    recording: bool,
    replaying: bool,
}

impl RunContext {
    /// Creates a context from run settings.
    #[must_use]
    pub fn new(settings: RunSettings) -> Self {
        let workspace = Workspace::from_settings(&settings);
        let mut roots = ResourceRoots::new(workspace.root(), workspace.outputs_dir());
        for (alias, root) in &settings.resources {
            roots.register_framework_root(alias, root);
        }
        Self {
            settings,
            run_id: Uuid::new_v4(),
            roots,
            workspace,
            registry: ConfigRegistry::new(),
            journal: RwLock::new(None),
            dry_run: false,
            recording: true,
            replaying: false,
        }
    }

    /// Creates a context for replaying an archive: nothing is re-recorded.
    #[must_use]
    pub fn for_replay(settings: RunSettings) -> Self {
        let mut ctx = Self::new(settings);
        ctx.recording = false;
        ctx.replaying = true;
        ctx
    }

    /// Skips external invocations and file transfers, logging instead.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enables or disables registration of executed stages.
    #[must_use]
    pub fn with_recording(mut self, recording: bool) -> Self {
        self.recording = recording;
        self
    }

    /// Creates the workspace tree on disk.
    pub fn prepare(&self) -> Result<(), SimflowError> {
        self.workspace.prepare()
    }

    /// The run settings.
    #[must_use]
    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// The run identity.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The alias-root table.
    #[must_use]
    pub fn roots(&self) -> &ResourceRoots {
        &self.roots
    }

    /// The run's workspace.
    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The configuration registry.
    #[must_use]
    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    /// Whether external invocations are skipped.
    #[must_use]
    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Whether executed stages register their configuration.
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether this context was built to replay an archive.
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Resolves a path or alias URI through the root table.
    pub fn resolve(&self, spec: &str) -> Result<PathBuf, SimflowError> {
        self.roots.resolve(spec)
    }

    /// Attaches a replay journal, subscribing it to the registry.
    ///
    /// Attaching twice returns the journal already in place.
    pub fn attach_journal(&self, mode: ArchiveMode) -> Result<Arc<ReplayJournal>, SimflowError> {
        let mut slot = self.journal.write();
        if let Some(existing) = slot.as_ref() {
            debug!("journal already attached");
            return Ok(existing.clone());
        }
        let staging = self.workspace.tmp_dir().join("journal");
        let journal = Arc::new(ReplayJournal::new(
            staging,
            mode,
            self.run_id,
            self.roots.clone(),
        )?);
        self.registry.subscribe(journal.clone());
        info!(mode = ?mode, "attached replay journal");
        *slot = Some(journal.clone());
        Ok(journal)
    }

    /// The attached journal, if any.
    #[must_use]
    pub fn journal(&self) -> Option<Arc<ReplayJournal>> {
        self.journal.read().clone()
    }

    /// Freezes the registry and writes the replay archive.
    ///
    /// Returns `None` when no journal is attached or nothing was recorded.
    pub fn export_replay(&self, archive_path: &Path) -> Result<Option<PathBuf>, SimflowError> {
        let Some(journal) = self.journal() else {
            warn!("no journal attached; nothing to export");
            return Ok(None);
        };
        if journal.snapshot_count() == 0 {
            warn!("journal holds no stage snapshots; nothing to export");
            return Ok(None);
        }
        self.registry.freeze();
        journal.finalize_to(archive_path)
    }
}
