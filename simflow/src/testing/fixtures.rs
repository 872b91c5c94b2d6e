//! Test fixtures backed by a temporary workspace.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::context::RunContext;
use crate::errors::SimflowError;
use crate::settings::RunSettings;

/// Installs a compact tracing subscriber for the current test binary.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A prepared run rooted in a temporary directory.
///
/// The workspace lives under the fixture root, so dropping the fixture
/// removes everything the run wrote.
pub struct TestRun {
    dir: TempDir,
    ctx: RunContext,
}

impl TestRun {
    /// Creates a prepared run with default settings.
    pub fn new() -> Result<Self, SimflowError> {
        Self::with_settings(|_, settings| settings)
    }

    /// Creates a prepared run after customizing the settings.
    ///
    /// The closure receives the fixture root so it can register resource
    /// roots or an outputs directory under it.
    pub fn with_settings<F>(customize: F) -> Result<Self, SimflowError>
    where
        F: FnOnce(&Path, RunSettings) -> RunSettings,
    {
        let dir = TempDir::new()?;
        let settings = RunSettings::new().with_workspace(dir.path().join("workspace"));
        let settings = customize(dir.path(), settings);
        let ctx = RunContext::new(settings);
        ctx.prepare()?;
        Ok(Self { dir, ctx })
    }

    /// The run context.
    #[must_use]
    pub fn ctx(&self) -> &RunContext {
        &self.ctx
    }

    /// The fixture root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// A path under the fixture root.
    #[must_use]
    pub fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(rel)
    }

    /// Writes a file under the fixture root, creating parent directories.
    pub fn write_file(
        &self,
        rel: impl AsRef<Path>,
        contents: impl AsRef<[u8]>,
    ) -> Result<PathBuf, SimflowError> {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Reads a file under the fixture root as UTF-8.
    pub fn read_file(&self, rel: impl AsRef<Path>) -> Result<String, SimflowError> {
        Ok(fs::read_to_string(self.path(rel))?)
    }

    /// Creates a prepared replay context over this fixture's workspace.
    ///
    /// Preparing cleans the transient run directories; files already moved
    /// to the outputs directory survive.
    pub fn replay_ctx(&self) -> Result<RunContext, SimflowError> {
        let ctx = RunContext::for_replay(self.ctx.settings().clone());
        ctx.prepare()?;
        Ok(ctx)
    }
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("root", &self.dir.path())
            .field("run_id", &self.ctx.run_id())
            .finish()
    }
}
