//! The replay journal: recording runs into portable archives.
//!
//! The journal subscribes to the configuration registry and captures an
//! owned snapshot of every registered stage. Payload bytes are staged for
//! qualifying file records at record time, so a file deleted or rewritten
//! later in the run cannot corrupt what was recorded. `finalize_to` packs
//! the snapshots, the payload table, and the staged bytes into one zip
//! archive.

pub mod archive;
mod replay;

pub use archive::{ArchiveManifest, ARCHIVE_FORMAT_VERSION};
pub use replay::{ReplayLoader, StageFactories, StageFactory};

use crate::errors::{DuplicateFileError, JournalFinalizedError, SimflowError};
use crate::registry::RegistryObserver;
use crate::resources::{FileOrigin, FileRecord, ResourceRoots};
use crate::stages::StageConfig;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How data payloads travel with an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveMode {
    /// Copy user-data bytes into the archive (self-contained).
    #[default]
    Bundled,
    /// Record a path reference for user data; config files are still copied.
    Referenced,
}

/// One recorded stage invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSnapshot {
    /// Zero-based registration index.
    pub seq: u32,
    /// The stage name.
    pub name: String,
    /// When the invocation was recorded.
    pub recorded_at: DateTime<Utc>,
    /// The invocation-time configuration.
    pub config: StageConfig,
}

/// One entry in the de-duplicated payload table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadEntry {
    /// Destination directory of the record.
    pub save_path: String,
    /// Destination name of the record.
    pub save_name: String,
    /// Where the bytes came from when recorded.
    pub source_path: String,
    /// Ownership classification at record time.
    pub origin: FileOrigin,
    /// Data file rather than a config file.
    pub is_data: bool,
    /// Archive member holding the bytes, when bundled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_entry: Option<String>,
    /// Resolved source path, when referenced instead of bundled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Checksum of the bundled bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Size of the bundled bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Default)]
struct JournalInner {
    snapshots: Vec<StageSnapshot>,
    payloads: IndexMap<(String, String), PayloadEntry>,
    next_payload_seq: u32,
    finalized: bool,
}

/// Append-only recorder of stage invocations and their file payloads.
pub struct ReplayJournal {
    staging_dir: PathBuf,
    mode: ArchiveMode,
    run_id: Uuid,
    roots: ResourceRoots,
    inner: Mutex<JournalInner>,
}

impl ReplayJournal {
    /// Creates a journal staging payloads under `staging_dir`.
    pub fn new(
        staging_dir: impl Into<PathBuf>,
        mode: ArchiveMode,
        run_id: Uuid,
        roots: ResourceRoots,
    ) -> Result<Self, SimflowError> {
        let staging_dir = staging_dir.into();
        std::fs::create_dir_all(&staging_dir)?;
        Ok(Self {
            staging_dir,
            mode,
            run_id,
            roots,
            inner: Mutex::new(JournalInner::default()),
        })
    }

    /// The archive mode this journal records with.
    #[must_use]
    pub fn mode(&self) -> ArchiveMode {
        self.mode
    }

    /// The run this journal belongs to.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Number of recorded snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().snapshots.len()
    }

    /// Number of de-duplicated payload entries.
    #[must_use]
    pub fn payload_count(&self) -> usize {
        self.inner.lock().payloads.len()
    }

    /// Whether `finalize_to` has completed.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.inner.lock().finalized
    }

    /// The recorded snapshots, in order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<StageSnapshot> {
        self.inner.lock().snapshots.clone()
    }

    /// Records one stage invocation: the snapshot plus its payloads.
    ///
    /// Payload bytes are staged immediately. Nothing is committed if staging
    /// fails, so a failed record never leaves the journal half-updated.
    pub fn record(&self, seq: u32, config: &StageConfig) -> Result<(), SimflowError> {
        let mut inner = self.inner.lock();
        if inner.finalized {
            return Err(JournalFinalizedError::new("record a stage snapshot").into());
        }

        let mut staged: Vec<((String, String), PayloadEntry)> = Vec::new();
        let mut next_seq = inner.next_payload_seq;
        for record in config.records().filter(|record| record.needs_payload()) {
            let key = (record.save_path.clone(), record.save_name.clone());
            let existing = inner
                .payloads
                .get(&key)
                .or_else(|| staged.iter().find(|(k, _)| *k == key).map(|(_, e)| e));
            if let Some(entry) = existing {
                if entry.source_path == record.source_path {
                    debug!(stage = %config.name, record = %record, "payload already staged");
                    continue;
                }
                return Err(DuplicateFileError::new(
                    &record.save_path,
                    &record.save_name,
                    &entry.source_path,
                    &record.source_path,
                )
                .into());
            }
            let entry = self.stage_payload(record, next_seq)?;
            if entry.archive_entry.is_some() {
                next_seq += 1;
            }
            staged.push((key, entry));
        }

        inner.next_payload_seq = next_seq;
        inner.payloads.extend(staged);
        inner.snapshots.push(StageSnapshot {
            seq,
            name: config.name.clone(),
            recorded_at: Utc::now(),
            config: config.clone(),
        });
        debug!(stage = %config.name, seq, "recorded stage snapshot");
        Ok(())
    }

    /// Copies one record's bytes into staging, or resolves its reference.
    fn stage_payload(&self, record: &FileRecord, seq: u32) -> Result<PayloadEntry, SimflowError> {
        let resolved = self.roots.resolve(&record.source_path)?;
        let mut entry = PayloadEntry {
            save_path: record.save_path.clone(),
            save_name: record.save_name.clone(),
            source_path: record.source_path.clone(),
            origin: record.origin,
            is_data: record.is_data,
            archive_entry: None,
            reference: None,
            sha256: None,
            size: None,
        };

        // Config files are always bundled; data only in Bundled mode.
        let bundle = !record.is_data || self.mode == ArchiveMode::Bundled;
        if bundle {
            let member = archive::payload_member_name(seq, &record.save_name);
            let staged_path = self.staging_dir.join(&member);
            if let Some(parent) = staged_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&resolved, &staged_path)?;
            entry.sha256 = Some(archive::sha256_file(&staged_path)?);
            entry.size = Some(std::fs::metadata(&staged_path)?.len());
            entry.archive_entry = Some(member);
            debug!(record = %record, "staged payload bytes");
        } else {
            entry.reference = Some(resolved.display().to_string());
            debug!(record = %record, "recorded payload reference");
        }
        Ok(entry)
    }

    /// Writes the archive.
    ///
    /// An empty journal writes nothing and returns `None` with a warning.
    /// After a successful write the journal is finalized: further `record`
    /// or `finalize_to` calls fail with [`JournalFinalizedError`].
    pub fn finalize_to(&self, archive_path: &Path) -> Result<Option<PathBuf>, SimflowError> {
        let mut inner = self.inner.lock();
        if inner.finalized {
            return Err(JournalFinalizedError::new("finalize again").into());
        }
        if inner.snapshots.is_empty() {
            warn!("journal holds no stage snapshots; skipping archive export");
            return Ok(None);
        }

        let manifest = ArchiveManifest {
            format_version: ARCHIVE_FORMAT_VERSION,
            created_at: Utc::now(),
            generator: generator(),
            run_id: self.run_id,
            mode: self.mode,
            stages: inner.snapshots.clone(),
            payloads: inner.payloads.values().cloned().collect(),
        };
        archive::write_archive(archive_path, &manifest, &self.staging_dir)?;
        inner.finalized = true;
        info!(
            path = %archive_path.display(),
            stages = manifest.stages.len(),
            payloads = manifest.payloads.len(),
            "wrote replay archive"
        );
        Ok(Some(archive_path.to_path_buf()))
    }
}

impl RegistryObserver for ReplayJournal {
    fn on_register(&self, seq: u32, config: &StageConfig) -> Result<(), SimflowError> {
        self.record(seq, config)
    }
}

impl std::fmt::Debug for ReplayJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReplayJournal")
            .field("mode", &self.mode)
            .field("run_id", &self.run_id)
            .field("snapshots", &inner.snapshots.len())
            .field("payloads", &inner.payloads.len())
            .field("finalized", &inner.finalized)
            .finish()
    }
}

fn generator() -> String {
    format!("simflow {}", env!("CARGO_PKG_VERSION"))
}
