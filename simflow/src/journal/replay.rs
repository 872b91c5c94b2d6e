//! Replaying archives: rehydrating the registry and rebuilding stages.

use crate::context::RunContext;
use crate::errors::{ArchiveCorruptError, DuplicateStageError, SimflowError, UnknownStageError};
use crate::journal::archive::{self, ArchiveManifest, PAYLOAD_PREFIX};
use crate::journal::StageSnapshot;
use crate::stages::{Executable, StageConfig};
use indexmap::IndexMap;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Builds a stage instance from a recorded configuration.
pub type StageFactory =
    Box<dyn Fn(&StageConfig) -> Result<Box<dyn Executable>, SimflowError> + Send + Sync>;

/// Registry of stage factories, keyed by stage name.
///
/// Replay looks up each recorded stage here to rebuild a live instance.
#[derive(Default)]
pub struct StageFactories {
    factories: IndexMap<String, StageFactory>,
}

impl StageFactories {
    /// Creates an empty factory registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a stage name.
    ///
    /// Fails with [`DuplicateStageError`] when the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), SimflowError>
    where
        F: Fn(&StageConfig) -> Result<Box<dyn Executable>, SimflowError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(DuplicateStageError::new(&name).into());
        }
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Whether a factory is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Number of registered factories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Whether no factories are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Builds one stage from its recorded configuration.
    pub fn build(&self, config: &StageConfig) -> Result<Box<dyn Executable>, SimflowError> {
        let factory = self
            .factories
            .get(&config.name)
            .ok_or_else(|| UnknownStageError::new(&config.name))?;
        factory(config)
    }

    /// Rebuilds every stage in the context's registry, in recorded order.
    ///
    /// Each instance has `load_config` applied, so the caller can re-run or
    /// inspect the stages directly.
    pub fn instantiate(
        &self,
        ctx: &RunContext,
    ) -> Result<Vec<(String, Box<dyn Executable>)>, SimflowError> {
        let mut stages = Vec::new();
        for (name, config) in ctx.registry().snapshot() {
            let mut stage = self.build(&config)?;
            stage.load_config(&config)?;
            debug!(stage = %name, "rebuilt stage from snapshot");
            stages.push((name, stage));
        }
        Ok(stages)
    }
}

impl std::fmt::Debug for StageFactories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageFactories")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Reads a replay archive and reconstructs run state from it.
///
/// Opening validates the format version before anything is extracted, so an
/// unsupported archive is rejected with the workspace untouched. The archive
/// itself is never written to; restoring twice from the same file yields
/// identical results.
#[derive(Debug)]
pub struct ReplayLoader {
    archive_path: PathBuf,
    manifest: ArchiveManifest,
}

impl ReplayLoader {
    /// Opens an archive and validates its manifest.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SimflowError> {
        let path = path.as_ref();
        let mut zip = archive::open_archive(path)?;
        let manifest = archive::read_manifest(&mut zip, path)?;
        info!(
            path = %path.display(),
            stages = manifest.stages.len(),
            payloads = manifest.payloads.len(),
            "opened replay archive"
        );
        Ok(Self {
            archive_path: path.to_path_buf(),
            manifest,
        })
    }

    /// The validated manifest.
    #[must_use]
    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// The recorded run's identity.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.manifest.run_id
    }

    /// Recorded stage names, in invocation order.
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.manifest.stages.iter().map(|s| s.name.as_str())
    }

    /// Materializes payloads and rehydrates the context's registry.
    ///
    /// Bundled payloads land under `<workspace>/replay/<seq>/<name>` with
    /// their checksums verified; every affected record's `source_path` is
    /// rewritten to the materialized location (or the recorded reference)
    /// before the snapshot is registered. All payloads are materialized
    /// before the first registration, so a corrupt archive leaves the
    /// registry empty. Member names that would escape the replay directory
    /// are rejected as corrupt.
    pub fn restore(&self, ctx: &RunContext) -> Result<Vec<StageSnapshot>, SimflowError> {
        let mut zip = archive::open_archive(&self.archive_path)?;
        let replay_root = ctx.workspace().replay_dir();
        let mut materialized: IndexMap<(String, String), String> = IndexMap::new();

        for entry in &self.manifest.payloads {
            let key = (entry.save_path.clone(), entry.save_name.clone());
            if let Some(member) = entry.archive_entry.as_deref() {
                let relative = member
                    .strip_prefix(PAYLOAD_PREFIX)
                    .map_or(member, |rest| rest.trim_start_matches('/'));
                if relative.is_empty()
                    || Path::new(relative)
                        .components()
                        .any(|component| !matches!(component, Component::Normal(_)))
                {
                    return Err(ArchiveCorruptError::new(
                        self.archive_path.display().to_string(),
                        format!("payload member '{member}' escapes the replay directory"),
                    )
                    .into());
                }
                let dest = replay_root.join(relative);
                archive::extract_member(
                    &mut zip,
                    &self.archive_path,
                    member,
                    entry.sha256.as_deref(),
                    &dest,
                )?;
                debug!(member = %member, dest = %dest.display(), "materialized payload");
                materialized.insert(key, dest.display().to_string());
            } else if let Some(reference) = &entry.reference {
                materialized.insert(key, reference.clone());
            }
        }

        let mut snapshots = Vec::with_capacity(self.manifest.stages.len());
        for snapshot in &self.manifest.stages {
            let mut config = snapshot.config.clone();
            for record in config
                .inputs
                .iter_mut()
                .chain(config.outputs.iter_mut())
                .filter(|record| record.needs_payload())
            {
                let key = (record.save_path.clone(), record.save_name.clone());
                if let Some(source) = materialized.get(&key) {
                    record.source_path = source.clone();
                }
            }
            ctx.registry().register(config.clone())?;
            let mut restored = snapshot.clone();
            restored.config = config;
            snapshots.push(restored);
        }

        info!(
            stages = snapshots.len(),
            payloads = materialized.len(),
            "restored run state from archive"
        );
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{CommandSpec, ProgramStage};

    fn probe_factory() -> StageFactories {
        let mut factories = StageFactories::new();
        factories
            .register("ungrib", |config: &StageConfig| {
                Ok(Box::new(ProgramStage::new(&config.name, config.command.clone()))
                    as Box<dyn Executable>)
            })
            .unwrap();
        factories
    }

    #[test]
    fn test_duplicate_factory_rejected() {
        let mut factories = probe_factory();
        let err = factories
            .register("ungrib", |config: &StageConfig| {
                Ok(Box::new(ProgramStage::new(&config.name, config.command.clone()))
                    as Box<dyn Executable>)
            })
            .unwrap_err();
        assert!(matches!(err, SimflowError::DuplicateStage(_)));
    }

    #[test]
    fn test_unknown_factory_rejected() {
        let factories = probe_factory();
        let err = factories.build(&StageConfig::new("metgrid")).err().unwrap();
        assert!(matches!(err, SimflowError::UnknownStage(_)));
    }

    #[test]
    fn test_build_applies_recorded_command() {
        let factories = probe_factory();
        let mut config = StageConfig::new("ungrib");
        config.command = CommandSpec::new("./ungrib.exe").with_work_dir("workspace://run/ungrib");
        let stage = factories.build(&config).unwrap();
        assert_eq!(stage.name(), "ungrib");
        assert_eq!(stage.core().command().program, "./ungrib.exe");
    }

    #[test]
    fn test_open_missing_archive_is_corrupt() {
        let err = ReplayLoader::open("/nowhere/run.replay").unwrap_err();
        assert!(matches!(err, SimflowError::ArchiveCorrupt(_)));
    }
}
