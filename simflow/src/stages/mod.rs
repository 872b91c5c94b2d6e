//! The stage protocol: the lifecycle contract every pipeline stage implements.
//!
//! A stage wraps one external program. Its trait methods declare input and
//! output files, export and import configuration snapshots, and bracket the
//! program invocation with `before_exec`/`after_exec` hooks that are
//! guaranteed to pair. Concrete stages embed a [`StageCore`] and get working
//! default behavior for every operation; overriding a hook replaces only
//! that hook.

pub mod command;
pub mod config;
mod files;
#[cfg(test)]
mod stage_tests;

pub use command::{CommandSpec, MpiLaunch};
pub use config::{ConstructorSpec, CustomConfig, StageConfig};
pub use files::{FileSpec, FileSpecs, InputOptions, OutputScan};

use crate::context::RunContext;
use crate::errors::{SimflowError, StageStateError};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Lifecycle states of one stage instance.
///
/// `Failed` is terminal: retrying requires a fresh instance with re-applied
/// configuration. A `Completed` stage may run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Nothing declared yet.
    Unconfigured,
    /// Files declared or a snapshot applied; ready to run.
    Configured,
    /// Inside `exec`, between `before_exec` and `after_exec`.
    Running,
    /// The last `exec` succeeded.
    Completed,
    /// The last `exec` failed; terminal.
    Failed,
}

impl std::fmt::Display for StageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{label}")
    }
}

/// The state every stage composes: configuration plus lifecycle position.
#[derive(Debug, Clone)]
pub struct StageCore {
    config: StageConfig,
    state: StageState,
}

impl StageCore {
    /// Creates a core for the named stage running the given command.
    ///
    /// An empty `work_dir` defaults to `workspace://run/<name>`.
    #[must_use]
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        let mut config = StageConfig::new(name);
        config.command = command;
        if config.command.work_dir.is_empty() {
            config.command.work_dir = format!("workspace://run/{}", config.name);
        }
        Self {
            config,
            state: StageState::Unconfigured,
        }
    }

    /// Sets the construction values recorded for replay.
    #[must_use]
    pub fn with_constructor(mut self, constructor: ConstructorSpec) -> Self {
        self.config.constructor = constructor;
        self
    }

    /// The stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> StageState {
        self.state
    }

    /// The command the stage runs.
    #[must_use]
    pub fn command(&self) -> &CommandSpec {
        &self.config.command
    }

    /// The stage's logical working directory.
    #[must_use]
    pub fn work_dir(&self) -> &str {
        &self.config.command.work_dir
    }

    /// The live configuration.
    #[must_use]
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Declared input records.
    #[must_use]
    pub fn inputs(&self) -> &[crate::resources::FileRecord] {
        &self.config.inputs
    }

    /// Declared output records.
    #[must_use]
    pub fn outputs(&self) -> &[crate::resources::FileRecord] {
        &self.config.outputs
    }

    pub(crate) fn config_mut(&mut self) -> &mut StageConfig {
        &mut self.config
    }

    pub(crate) fn set_state(&mut self, state: StageState) {
        self.state = state;
    }

    pub(crate) fn mark_configured(&mut self) {
        if self.state == StageState::Unconfigured {
            self.state = StageState::Configured;
        }
    }

    /// An owned snapshot of the live configuration.
    #[must_use]
    pub fn export_snapshot(&self) -> StageConfig {
        self.config.clone()
    }

    pub(crate) fn apply_snapshot(&mut self, config: &StageConfig) -> Result<(), SimflowError> {
        if config.name != self.config.name {
            return Err(crate::errors::ConfigMismatchError::new(
                &self.config.name,
                &config.name,
            )
            .into());
        }
        if matches!(self.state, StageState::Running | StageState::Failed) {
            return Err(StageStateError::new(
                &self.config.name,
                self.state.to_string(),
                "load a configuration",
            )
            .into());
        }
        self.config = config.clone();
        self.state = StageState::Configured;
        Ok(())
    }
}

/// The lifecycle contract for one pipeline stage.
///
/// Implementors supply the composed [`StageCore`]; every operation has a
/// working default. `exec` runs `before_exec`, the external program, then
/// `after_exec` in that fixed order. `after_exec` runs even when the
/// program fails, and the program's error propagates afterwards.
#[async_trait]
pub trait Executable: Send + Sync {
    /// The composed stage state.
    fn core(&self) -> &StageCore;

    /// Mutable access to the composed stage state.
    fn core_mut(&mut self) -> &mut StageCore;

    /// The stage name.
    fn name(&self) -> &str {
        self.core().name()
    }

    /// The current lifecycle state.
    fn state(&self) -> StageState {
        self.core().state()
    }

    /// Computes the stage's own derived settings.
    ///
    /// The default produces nothing, with a diagnostic rather than an error;
    /// many stages need no custom configuration.
    fn generate_custom_config(&self) -> CustomConfig {
        debug!(stage = self.core().name(), "no custom configuration to generate");
        CustomConfig::new()
    }

    /// Applies previously recorded custom settings.
    ///
    /// Called during replay before the stage runs again. Implementations
    /// must be idempotent: applying the same mapping twice leaves state
    /// unchanged.
    fn load_custom_config(&mut self, custom: &CustomConfig) -> Result<(), SimflowError> {
        let _ = custom;
        debug!(stage = self.core().name(), "no custom configuration to apply");
        Ok(())
    }

    /// Snapshots construction values, custom config, and declared records.
    fn export_config(&mut self) -> Result<StageConfig, SimflowError> {
        let generated = self.generate_custom_config();
        if !generated.is_empty() {
            self.core_mut().config_mut().custom = generated;
        }
        self.core_mut().mark_configured();
        Ok(self.core().export_snapshot())
    }

    /// Reconstructs declared records and custom config from a snapshot.
    ///
    /// Fails with a config-mismatch error when the snapshot names another
    /// stage.
    fn load_config(&mut self, config: &StageConfig) -> Result<(), SimflowError> {
        self.core_mut().apply_snapshot(config)?;
        let custom = config.custom.clone();
        self.load_custom_config(&custom)
    }

    /// Declares input files with the default classification (user data).
    fn add_input_files(
        &mut self,
        ctx: &RunContext,
        files: FileSpecs,
    ) -> Result<(), SimflowError> {
        files::declare_inputs(self.core_mut(), ctx, files, InputOptions::default())
    }

    /// Declares input files with explicit classification.
    fn add_input_files_with(
        &mut self,
        ctx: &RunContext,
        files: FileSpecs,
        options: InputOptions,
    ) -> Result<(), SimflowError> {
        files::declare_inputs(self.core_mut(), ctx, files, options)
    }

    /// Scans for produced files and declares them as outputs.
    fn add_output_files(
        &mut self,
        ctx: &RunContext,
        scan: OutputScan,
    ) -> Result<(), SimflowError> {
        files::declare_outputs(self.core_mut(), ctx, scan)
    }

    /// Prepares the working directory; the default places declared inputs.
    ///
    /// Safe to call even when the external program later fails.
    async fn before_exec(&mut self, ctx: &RunContext) -> Result<(), SimflowError> {
        files::place_inputs(self.core(), ctx)
    }

    /// Collects results; the default moves declared outputs to their
    /// destinations.
    ///
    /// Runs on every exit path of `exec`, including program failure.
    async fn after_exec(&mut self, ctx: &RunContext) -> Result<(), SimflowError> {
        files::collect_outputs(self.core(), ctx)
    }

    /// Runs the stage: `before_exec`, the external program, `after_exec`.
    ///
    /// The hooks always pair. A program failure propagates after
    /// `after_exec` has run; an `after_exec` failure is subordinated to the
    /// program's own error. On success the invocation-time configuration is
    /// committed to the context's registry (unless recording is off).
    async fn exec(&mut self, ctx: &RunContext) -> Result<(), SimflowError> {
        let state = self.core().state();
        if !matches!(state, StageState::Configured | StageState::Completed) {
            return Err(StageStateError::new(
                self.core().name(),
                state.to_string(),
                "exec",
            )
            .into());
        }

        info!(stage = self.core().name(), "starting stage");
        self.core_mut().set_state(StageState::Running);

        if let Err(err) = self.before_exec(ctx).await {
            self.core_mut().set_state(StageState::Failed);
            return Err(err);
        }

        let program_result = if ctx.dry_run() {
            let line = self
                .core()
                .command()
                .display_line(&ctx.settings().launcher);
            info!(stage = self.core().name(), command = %line, "dry run: skipping external program");
            Ok(None)
        } else {
            let name = self.core().name().to_string();
            let command = self.core().command().clone();
            command::run_external(ctx, &name, &command).await.map(Some)
        };

        let after_result = self.after_exec(ctx).await;

        match (program_result, after_result) {
            (Ok(outcome), Ok(())) => {
                if let Some(outcome) = outcome {
                    debug!(
                        stage = self.core().name(),
                        status = outcome.status,
                        "external program finished"
                    );
                }
                self.core_mut().set_state(StageState::Completed);
                if ctx.is_recording() && !ctx.is_replaying() {
                    let config = self.export_config()?;
                    ctx.registry().register(config)?;
                }
                info!(stage = self.core().name(), "stage completed");
                Ok(())
            }
            (Err(program_err), after_result) => {
                if let Err(after_err) = after_result {
                    warn!(
                        stage = self.core().name(),
                        error = %after_err,
                        "after_exec failed following program failure"
                    );
                }
                self.core_mut().set_state(StageState::Failed);
                Err(program_err)
            }
            (Ok(_), Err(after_err)) => {
                self.core_mut().set_state(StageState::Failed);
                Err(after_err)
            }
        }
    }
}

/// A ready-made stage wrapping one external program.
///
/// Output collection is declarative: scans added with
/// [`with_output_scan`](Self::with_output_scan) run after the program
/// finishes, then the collected records move to their destinations.
#[derive(Debug)]
pub struct ProgramStage {
    core: StageCore,
    scans: Vec<OutputScan>,
}

impl ProgramStage {
    /// Creates a stage running the given command.
    #[must_use]
    pub fn new(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            core: StageCore::new(name, command),
            scans: Vec::new(),
        }
    }

    /// Adds an output scan to run after the program finishes.
    #[must_use]
    pub fn with_output_scan(mut self, scan: OutputScan) -> Self {
        self.scans.push(scan);
        self
    }

    /// Rebuilds a stage from a recorded snapshot.
    pub fn from_config(config: &StageConfig) -> Result<Self, SimflowError> {
        let mut stage = Self::new(&config.name, config.command.clone());
        stage.load_config(config)?;
        Ok(stage)
    }
}

#[async_trait]
impl Executable for ProgramStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    async fn after_exec(&mut self, ctx: &RunContext) -> Result<(), SimflowError> {
        if ctx.dry_run() {
            debug!(stage = self.core.name(), "dry run: skipping output scans");
        } else {
            for scan in self.scans.clone() {
                files::declare_outputs(&mut self.core, ctx, scan)?;
            }
        }
        files::collect_outputs(&self.core, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_core_defaults_work_dir() {
        let core = StageCore::new("geogrid", CommandSpec::new("./geogrid.exe"));
        assert_eq!(core.work_dir(), "workspace://run/geogrid");
        assert_eq!(core.state(), StageState::Unconfigured);
    }

    #[test]
    fn test_explicit_work_dir_kept() {
        let command = CommandSpec::new("./wrf.exe").with_work_dir("workspace://run/wrf-d02");
        let core = StageCore::new("wrf", command);
        assert_eq!(core.work_dir(), "workspace://run/wrf-d02");
    }

    #[test]
    fn test_snapshot_name_mismatch_rejected() {
        let mut stage = ProgramStage::new("ungrib", CommandSpec::new("./ungrib.exe"));
        let other = StageConfig::new("metgrid");
        let err = stage.load_config(&other).unwrap_err();
        assert!(matches!(err, SimflowError::ConfigMismatch(_)));
    }

    #[test]
    fn test_export_then_load_round_trip() {
        let mut stage = ProgramStage::new("real", CommandSpec::new("./real.exe").with_mpi(4));
        stage.core_mut().config_mut().constructor =
            ConstructorSpec::new().with_kwarg("domains", json!(2));
        stage
            .core_mut()
            .config_mut()
            .custom
            .insert("run_hours".to_string(), json!(24));
        let exported = stage.export_config().unwrap();
        assert_eq!(stage.state(), StageState::Configured);

        let mut fresh = ProgramStage::new("real", CommandSpec::new("./real.exe"));
        fresh.load_config(&exported).unwrap();
        assert_eq!(fresh.export_config().unwrap(), exported);
        assert_eq!(fresh.state(), StageState::Configured);
    }

    #[test]
    fn test_default_custom_config_is_empty() {
        let stage = ProgramStage::new("ungrib", CommandSpec::new("./ungrib.exe"));
        assert!(stage.generate_custom_config().is_empty());
    }

    #[test]
    fn test_load_config_is_idempotent() {
        let mut stage = ProgramStage::new("wrf", CommandSpec::new("./wrf.exe"));
        let mut snapshot = StageConfig::new("wrf");
        snapshot.custom.insert("restart".to_string(), json!(false));
        stage.load_config(&snapshot).unwrap();
        stage.load_config(&snapshot).unwrap();
        assert_eq!(stage.core().config().custom["restart"], json!(false));
    }
}
