//! File records: identity, classification, and disposition of one file.

use serde::{Deserialize, Serialize};

/// Who owns a file, for archive-inclusion purposes.
///
/// Framework resources are reproducible from the orchestrator or the wrapped
/// model installation and are never bundled into a replay archive. User
/// resources exist only because the operator supplied them, so they are
/// always preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOrigin {
    /// Owned by the orchestrator or the wrapped model.
    FrameworkResource,
    /// Supplied by the operator.
    UserResource,
}

impl FileOrigin {
    /// Returns true for framework-owned files.
    #[must_use]
    pub fn is_framework(self) -> bool {
        matches!(self, Self::FrameworkResource)
    }
}

impl std::fmt::Display for FileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrameworkResource => write!(f, "framework_resource"),
            Self::UserResource => write!(f, "user_resource"),
        }
    }
}

/// Immutable description of one file's identity and disposition.
///
/// `source_path` is where the file lives when declared (a filesystem path or
/// an alias URI such as `geo://landuse/index`); `save_path`/`save_name` are
/// where it lands when materialized into a run directory or the output store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path or alias URI the file is read from.
    pub source_path: String,
    /// Destination directory, as a path or alias URI.
    pub save_path: String,
    /// Destination file name.
    pub save_name: String,
    /// Ownership classification.
    pub origin: FileOrigin,
    /// Payload data rather than a configuration/text file.
    pub is_data: bool,
    /// Produced by a stage rather than consumed by one.
    pub is_output: bool,
}

impl FileRecord {
    /// Creates an input record with the default classification: user-supplied
    /// data that is not a stage output.
    #[must_use]
    pub fn new(
        source_path: impl Into<String>,
        save_path: impl Into<String>,
        save_name: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            save_path: save_path.into(),
            save_name: save_name.into(),
            origin: FileOrigin::UserResource,
            is_data: true,
            is_output: false,
        }
    }

    /// Sets the ownership classification.
    #[must_use]
    pub fn with_origin(mut self, origin: FileOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Marks the record as payload data (`true`) or a config file (`false`).
    #[must_use]
    pub fn with_data(mut self, is_data: bool) -> Self {
        self.is_data = is_data;
        self
    }

    /// Marks the record as a stage output.
    #[must_use]
    pub fn with_output(mut self, is_output: bool) -> Self {
        self.is_output = is_output;
        self
    }

    /// The identity key records are deduplicated by.
    #[must_use]
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.source_path, &self.save_path, &self.save_name)
    }

    /// The destination key the archive payload store is addressed by.
    #[must_use]
    pub fn destination(&self) -> (&str, &str) {
        (&self.save_path, &self.save_name)
    }

    /// Whether this record's bytes belong in a replay archive.
    ///
    /// Outputs are never archived (re-running the stage regenerates them).
    /// Data files are archived only when user-supplied; config files are
    /// archived regardless of origin.
    #[must_use]
    pub fn needs_payload(&self) -> bool {
        !self.is_output && (!self.is_data || self.origin == FileOrigin::UserResource)
    }
}

impl std::fmt::Display for FileRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}/{}",
            self.source_path, self.save_path, self.save_name
        )
    }
}
