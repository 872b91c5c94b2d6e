//! Run settings: workspace layout, launcher defaults, resource roots.
//!
//! Settings load from a small TOML file. Every field has a default, so an
//! empty file (or none at all) yields a usable configuration:
//!
//! ```toml
//! [run]
//! workspace = "/scratch/run-042"
//! outputs = "/archive/run-042"
//!
//! [launcher]
//! program = "mpirun"
//! oversubscribe = true
//!
//! [resources]
//! geo = "/opt/model/geog"
//! ```

use crate::errors::{SettingsError, SimflowError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level run settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Workspace and output locations.
    pub run: RunSection,
    /// Parallel-launcher defaults.
    pub launcher: LauncherSection,
    /// Framework-resource roots, alias to directory.
    pub resources: IndexMap<String, PathBuf>,
}

/// The `[run]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Root of the run's filesystem footprint.
    pub workspace: PathBuf,
    /// Persistent output store; defaults to `<workspace>/outputs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<PathBuf>,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("workspace"),
            outputs: None,
        }
    }
}

/// The `[launcher]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherSection {
    /// The distributed-launch program.
    pub program: String,
    /// Pass the oversubscribe flag to the launcher.
    pub oversubscribe: bool,
}

impl Default for LauncherSection {
    fn default() -> Self {
        Self {
            program: "mpirun".to_string(),
            oversubscribe: true,
        }
    }
}

impl RunSettings {
    /// Creates settings with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads settings from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SimflowError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| SettingsError::new(path.display().to_string(), err.to_string()))?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parses settings from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, SimflowError> {
        Self::parse(text, "<inline>")
    }

    fn parse(text: &str, label: &str) -> Result<Self, SimflowError> {
        let settings =
            toml::from_str(text).map_err(|err| SettingsError::new(label, err.to_string()))?;
        Ok(settings)
    }

    /// Serializes the settings back to TOML.
    pub fn to_toml(&self) -> Result<String, SimflowError> {
        toml::to_string_pretty(self).map_err(|err| SimflowError::Serialization(err.to_string()))
    }

    /// Writes the settings to a TOML file, creating parent directories.
    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<(), SimflowError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// The persistent output store directory.
    #[must_use]
    pub fn outputs_dir(&self) -> PathBuf {
        self.run
            .outputs
            .clone()
            .unwrap_or_else(|| self.run.workspace.join("outputs"))
    }

    /// Sets the workspace root.
    #[must_use]
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.run.workspace = workspace.into();
        self
    }

    /// Sets the output store directory.
    #[must_use]
    pub fn with_outputs(mut self, outputs: impl Into<PathBuf>) -> Self {
        self.run.outputs = Some(outputs.into());
        self
    }

    /// Registers a framework-resource root.
    #[must_use]
    pub fn with_resource(mut self, alias: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.resources.insert(alias.into(), root.into());
        self
    }

    /// Sets the launcher program.
    #[must_use]
    pub fn with_launcher_program(mut self, program: impl Into<String>) -> Self {
        self.launcher.program = program.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let settings = RunSettings::from_toml_str("").unwrap();
        assert_eq!(settings.run.workspace, PathBuf::from("workspace"));
        assert_eq!(settings.launcher.program, "mpirun");
        assert!(settings.launcher.oversubscribe);
        assert!(settings.resources.is_empty());
    }

    #[test]
    fn test_full_toml() {
        let text = r#"
            [run]
            workspace = "/scratch/run-042"
            outputs = "/archive/run-042"

            [launcher]
            program = "mpiexec"
            oversubscribe = false

            [resources]
            geo = "/opt/model/geog"
            tables = "/opt/model/tables"
        "#;
        let settings = RunSettings::from_toml_str(text).unwrap();
        assert_eq!(settings.run.workspace, PathBuf::from("/scratch/run-042"));
        assert_eq!(settings.outputs_dir(), PathBuf::from("/archive/run-042"));
        assert_eq!(settings.launcher.program, "mpiexec");
        assert_eq!(settings.resources.len(), 2);
        assert_eq!(
            settings.resources["geo"],
            PathBuf::from("/opt/model/geog")
        );
    }

    #[test]
    fn test_outputs_default_under_workspace() {
        let settings = RunSettings::new().with_workspace("/ws");
        assert_eq!(settings.outputs_dir(), PathBuf::from("/ws/outputs"));
    }

    #[test]
    fn test_bad_toml_is_a_settings_error() {
        let err = RunSettings::from_toml_str("[run\nworkspace = 1").unwrap_err();
        assert!(matches!(err, SimflowError::Settings(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = RunSettings::new()
            .with_workspace("/ws")
            .with_resource("geo", "/opt/geog");
        let text = settings.to_toml().unwrap();
        let back = RunSettings::from_toml_str(&text).unwrap();
        assert_eq!(settings, back);
    }
}
