//! Error types for the simflow execution/replay core.
//!
//! Every failure names the stage and the failing operation, and file errors
//! carry the offending path, so callers never have to guess which part of a
//! multi-stage run went wrong.

use thiserror::Error;

/// The main error type for simflow operations.
#[derive(Debug, Error)]
pub enum SimflowError {
    /// A declared input file could not be resolved.
    #[error("{0}")]
    UnresolvableFile(#[from] UnresolvableFileError),

    /// An output scan matched nothing and the caller demanded strictness.
    #[error("{0}")]
    NoOutputFile(#[from] NoOutputFileError),

    /// A stage name was registered twice within one run.
    #[error("{0}")]
    DuplicateStage(#[from] DuplicateStageError),

    /// A stage name was not found in the registry.
    #[error("{0}")]
    UnknownStage(#[from] UnknownStageError),

    /// A replay archive is corrupt or truncated.
    #[error("{0}")]
    ArchiveCorrupt(#[from] ArchiveCorruptError),

    /// A replay archive declares an unsupported format version.
    #[error("{0}")]
    UnsupportedArchiveVersion(#[from] UnsupportedArchiveVersionError),

    /// The wrapped external program exited non-zero or crashed.
    #[error("{0}")]
    ExternalProgram(#[from] ExternalProgramError),

    /// Two payload entries claim the same destination with different sources.
    #[error("{0}")]
    DuplicateFile(#[from] DuplicateFileError),

    /// A path used an alias that is not registered.
    #[error("{0}")]
    UnknownAlias(#[from] UnknownAliasError),

    /// A registration arrived after the registry was frozen.
    #[error("{0}")]
    RegistryFrozen(#[from] RegistryFrozenError),

    /// The journal was used after finalization.
    #[error("{0}")]
    JournalFinalized(#[from] JournalFinalizedError),

    /// A stage operation was invoked in the wrong lifecycle state.
    #[error("{0}")]
    StageState(#[from] StageStateError),

    /// A configuration snapshot was loaded into the wrong stage.
    #[error("{0}")]
    ConfigMismatch(#[from] ConfigMismatchError),

    /// The run settings file could not be read or parsed.
    #[error("{0}")]
    Settings(#[from] SettingsError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for SimflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Error raised when a declared input cannot be resolved to a real file.
///
/// Resolution happens at declaration time, not at exec time, so a missing
/// file surfaces before any external program runs.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}': input file not found: '{path}'")]
pub struct UnresolvableFileError {
    /// The stage declaring the file.
    pub stage: String,
    /// The path or alias URI that failed to resolve.
    pub path: String,
}

impl UnresolvableFileError {
    /// Creates a new unresolvable-file error.
    #[must_use]
    pub fn new(stage: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            path: path.into(),
        }
    }
}

/// Error raised when an output scan finds no files under strict matching.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}': no output files in '{dir}' match {filters}")]
pub struct NoOutputFileError {
    /// The stage collecting outputs.
    pub stage: String,
    /// The directory that was scanned.
    pub dir: String,
    /// Human-readable description of the filters that matched nothing.
    pub filters: String,
}

impl NoOutputFileError {
    /// Creates a new no-output-file error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        dir: impl Into<String>,
        filters: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            dir: dir.into(),
            filters: filters.into(),
        }
    }
}

/// Error raised when a stage name is registered twice within one run.
///
/// Registration never overwrites: losing a prior stage's provenance
/// silently would make the recorded run unreplayable.
#[derive(Debug, Clone, Error)]
#[error("Stage '{name}' is already registered")]
pub struct DuplicateStageError {
    /// The conflicting stage name.
    pub name: String,
}

impl DuplicateStageError {
    /// Creates a new duplicate-stage error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Error raised when looking up a stage name that was never registered.
#[derive(Debug, Clone, Error)]
#[error("Stage '{name}' is not registered")]
pub struct UnknownStageError {
    /// The missing stage name.
    pub name: String,
}

impl UnknownStageError {
    /// Creates a new unknown-stage error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Error raised when a replay archive is corrupt or truncated.
#[derive(Debug, Clone, Error)]
#[error("Replay archive '{path}' is corrupt: {detail}")]
pub struct ArchiveCorruptError {
    /// The archive path.
    pub path: String,
    /// What exactly failed while reading it.
    pub detail: String,
}

impl ArchiveCorruptError {
    /// Creates a new archive-corrupt error.
    #[must_use]
    pub fn new(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }
}

/// Error raised when an archive's format version is not supported.
#[derive(Debug, Clone, Error)]
#[error(
    "Replay archive '{path}' has format version {found}, \
     but this build supports version {supported}"
)]
pub struct UnsupportedArchiveVersionError {
    /// The archive path.
    pub path: String,
    /// The version tag found in the archive.
    pub found: u32,
    /// The version this implementation supports.
    pub supported: u32,
}

impl UnsupportedArchiveVersionError {
    /// Creates a new unsupported-version error.
    #[must_use]
    pub fn new(path: impl Into<String>, found: u32, supported: u32) -> Self {
        Self {
            path: path.into(),
            found,
            supported,
        }
    }
}

/// Error raised when the wrapped external program fails.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}': external program '{program}' failed ({})", status_label(.status))]
pub struct ExternalProgramError {
    /// The stage whose program failed.
    pub stage: String,
    /// The program (with launcher prefix, if any) that was invoked.
    pub program: String,
    /// The exit status code, if the process exited at all.
    pub status: Option<i32>,
    /// The tail of the captured standard error stream.
    pub stderr_tail: String,
}

fn status_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl ExternalProgramError {
    /// Creates a new external-program error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        program: impl Into<String>,
        status: Option<i32>,
        stderr_tail: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            program: program.into(),
            status,
            stderr_tail: stderr_tail.into(),
        }
    }
}

/// Error raised when two payload entries collide on `(save_path, save_name)`
/// while naming different source files.
#[derive(Debug, Clone, Error)]
#[error(
    "Payload conflict at '{save_path}/{save_name}': \
     recorded from '{first_source}', then from '{second_source}'"
)]
pub struct DuplicateFileError {
    /// The colliding destination directory.
    pub save_path: String,
    /// The colliding destination name.
    pub save_name: String,
    /// The source path recorded first.
    pub first_source: String,
    /// The conflicting source path recorded later.
    pub second_source: String,
}

impl DuplicateFileError {
    /// Creates a new duplicate-file error.
    #[must_use]
    pub fn new(
        save_path: impl Into<String>,
        save_name: impl Into<String>,
        first_source: impl Into<String>,
        second_source: impl Into<String>,
    ) -> Self {
        Self {
            save_path: save_path.into(),
            save_name: save_name.into(),
            first_source: first_source.into(),
            second_source: second_source.into(),
        }
    }
}

/// Error raised when resolving a path that uses an unregistered alias.
#[derive(Debug, Clone, Error)]
#[error("Unknown resource alias '{alias}'")]
pub struct UnknownAliasError {
    /// The alias that is not in the resource-root table.
    pub alias: String,
}

impl UnknownAliasError {
    /// Creates a new unknown-alias error.
    #[must_use]
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
        }
    }
}

/// Error raised when registering into a frozen registry.
///
/// The registry freezes once the journal begins serialization, so a
/// late-registering stage cannot silently miss the archive.
#[derive(Debug, Clone, Error)]
#[error("Registry is frozen; cannot register stage '{name}'")]
pub struct RegistryFrozenError {
    /// The stage whose registration was rejected.
    pub name: String,
}

impl RegistryFrozenError {
    /// Creates a new registry-frozen error.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Error raised when the journal is used after `finalize`.
#[derive(Debug, Clone, Error)]
#[error("Journal already finalized; cannot {operation}")]
pub struct JournalFinalizedError {
    /// The rejected operation.
    pub operation: String,
}

impl JournalFinalizedError {
    /// Creates a new journal-finalized error.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

/// Error raised when a stage operation runs in the wrong lifecycle state.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' is {state}; cannot {operation}")]
pub struct StageStateError {
    /// The stage name.
    pub stage: String,
    /// The state the stage was in.
    pub state: String,
    /// The rejected operation.
    pub operation: String,
}

impl StageStateError {
    /// Creates a new stage-state error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        state: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            state: state.into(),
            operation: operation.into(),
        }
    }
}

/// Error raised when loading a snapshot that belongs to another stage.
#[derive(Debug, Clone, Error)]
#[error("Configuration belongs to stage '{found}', not '{expected}'")]
pub struct ConfigMismatchError {
    /// The stage the caller tried to load into.
    pub expected: String,
    /// The stage named by the snapshot.
    pub found: String,
}

impl ConfigMismatchError {
    /// Creates a new config-mismatch error.
    #[must_use]
    pub fn new(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Error raised when the run settings file cannot be read or parsed.
#[derive(Debug, Clone, Error)]
#[error("Settings file '{path}': {detail}")]
pub struct SettingsError {
    /// The settings file path.
    pub path: String,
    /// What failed while loading it.
    pub detail: String,
}

impl SettingsError {
    /// Creates a new settings error.
    #[must_use]
    pub fn new(path: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            detail: detail.into(),
        }
    }
}
