//! Mock stages for exercising the stage lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::RunContext;
use crate::errors::{NoOutputFileError, SimflowError, UnresolvableFileError};
use crate::stages::{CommandSpec, CustomConfig, Executable, StageCore};

/// Builds a command that runs `script` through `sh -c`.
#[must_use]
pub fn shell(script: &str) -> CommandSpec {
    CommandSpec::new("sh").with_args(["-c", script])
}

/// A shared, clonable record of lifecycle hook invocations.
///
/// Clones observe the same underlying log, so a handle taken before `exec`
/// stays readable afterwards.
#[derive(Debug, Clone, Default)]
pub struct HookLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl HookLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one entry.
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    /// Returns all recorded entries in order.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Counts entries equal to `name`.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.as_str() == name)
            .count()
    }

    /// Clears the log.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

/// A stage that records every lifecycle hook it passes through.
///
/// The default command is `true`, so `exec` succeeds without touching the
/// filesystem; [`failing`](Self::failing) swaps in a command that exits
/// with status 3. The hooks only log, they do not place or collect files.
pub struct ProbeStage {
    core: StageCore,
    log: HookLog,
    custom: CustomConfig,
    fail_before: bool,
    fail_after: bool,
}

impl ProbeStage {
    /// Creates a probe whose program succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_command(name, CommandSpec::new("true"))
    }

    /// Creates a probe whose program exits with status 3.
    #[must_use]
    pub fn failing(name: impl Into<String>) -> Self {
        Self::with_command(name, shell("echo boom >&2; exit 3"))
    }

    /// Creates a probe running an explicit command.
    #[must_use]
    pub fn with_command(name: impl Into<String>, command: CommandSpec) -> Self {
        Self {
            core: StageCore::new(name, command),
            log: HookLog::new(),
            custom: CustomConfig::new(),
            fail_before: false,
            fail_after: false,
        }
    }

    /// Makes `before_exec` fail after logging its invocation.
    #[must_use]
    pub fn fail_before_exec(mut self) -> Self {
        self.fail_before = true;
        self
    }

    /// Makes `after_exec` fail after logging its invocation.
    #[must_use]
    pub fn fail_after_exec(mut self) -> Self {
        self.fail_after = true;
        self
    }

    /// Seeds a custom-config entry returned by `generate_custom_config`.
    #[must_use]
    pub fn with_custom(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.custom.insert(key.into(), value);
        self
    }

    /// A handle onto the shared hook log.
    #[must_use]
    pub fn log(&self) -> HookLog {
        self.log.clone()
    }
}

#[async_trait]
impl Executable for ProbeStage {
    fn core(&self) -> &StageCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut StageCore {
        &mut self.core
    }

    fn generate_custom_config(&self) -> CustomConfig {
        self.log.push("generate_custom_config");
        self.custom.clone()
    }

    fn load_custom_config(&mut self, custom: &CustomConfig) -> Result<(), SimflowError> {
        self.log.push("load_custom_config");
        self.custom = custom.clone();
        Ok(())
    }

    async fn before_exec(&mut self, _ctx: &RunContext) -> Result<(), SimflowError> {
        self.log.push("before_exec");
        if self.fail_before {
            return Err(UnresolvableFileError::new(self.core.name(), "fixture://missing").into());
        }
        Ok(())
    }

    async fn after_exec(&mut self, _ctx: &RunContext) -> Result<(), SimflowError> {
        self.log.push("after_exec");
        if self.fail_after {
            return Err(NoOutputFileError::new(self.core.name(), "fixture", "none").into());
        }
        Ok(())
    }
}
