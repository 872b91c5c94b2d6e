//! Stage configuration snapshots: everything needed to rebuild a stage.

use crate::resources::FileRecord;
use crate::stages::CommandSpec;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Stage-specific derived settings, an ordered name/value mapping.
pub type CustomConfig = IndexMap<String, Value>;

/// Positional and named values used to reconstruct a stage instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructorSpec {
    /// Positional construction values.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// Named construction values.
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub kwargs: IndexMap<String, Value>,
}

impl ConstructorSpec {
    /// Creates an empty constructor spec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional value.
    #[must_use]
    pub fn with_arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    /// Sets a named value.
    #[must_use]
    pub fn with_kwarg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(name.into(), value);
        self
    }

    /// Reads a named value back into a concrete type.
    #[must_use]
    pub fn kwarg<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.kwargs
            .get(name)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// Invocation-time snapshot of one stage's full configuration.
///
/// Snapshots are owned values; registering one into the configuration
/// registry or the replay journal never aliases live stage state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// The stage name.
    pub name: String,
    /// Construction values for rebuilding the instance.
    #[serde(default)]
    pub constructor: ConstructorSpec,
    /// The external command the stage runs.
    #[serde(default)]
    pub command: CommandSpec,
    /// The stage's own derived settings.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub custom: CustomConfig,
    /// Declared input records, unique by identity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<FileRecord>,
    /// Declared output records, unique by identity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<FileRecord>,
}

impl StageConfig {
    /// Creates an empty configuration for the named stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constructor: ConstructorSpec::default(),
            command: CommandSpec::default(),
            custom: CustomConfig::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Appends an input record, dropping exact duplicates with a diagnostic.
    pub fn push_input(&mut self, record: FileRecord) {
        push_unique(&self.name, &mut self.inputs, record);
    }

    /// Appends an output record, dropping exact duplicates with a diagnostic.
    pub fn push_output(&mut self, record: FileRecord) {
        push_unique(&self.name, &mut self.outputs, record);
    }

    /// All declared records, inputs first.
    pub fn records(&self) -> impl Iterator<Item = &FileRecord> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}

fn push_unique(stage: &str, records: &mut Vec<FileRecord>, record: FileRecord) {
    if records.iter().any(|known| known.identity() == record.identity()) {
        debug!(stage = %stage, record = %record, "dropping duplicate file record");
        return;
    }
    records.push(record);
}
