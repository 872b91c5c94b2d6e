//! The replay archive container: one zip holding a manifest plus payloads.

use crate::errors::{ArchiveCorruptError, SimflowError, UnsupportedArchiveVersionError};
use crate::journal::{ArchiveMode, PayloadEntry, StageSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use uuid::Uuid;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// The archive format version this build reads and writes.
pub const ARCHIVE_FORMAT_VERSION: u32 = 1;

/// Name of the manifest member at the archive root.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Prefix of all payload members.
pub const PAYLOAD_PREFIX: &str = "payload";

/// Everything in the archive except the payload bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    /// Format version tag, checked before anything else is read.
    pub format_version: u32,
    /// When the archive was written.
    pub created_at: DateTime<Utc>,
    /// The producing implementation and its version.
    pub generator: String,
    /// Identity of the recorded run.
    pub run_id: Uuid,
    /// Whether data payloads were bundled or referenced.
    pub mode: ArchiveMode,
    /// Ordered stage snapshots, one per recorded invocation.
    pub stages: Vec<StageSnapshot>,
    /// The de-duplicated payload table.
    pub payloads: Vec<PayloadEntry>,
}

#[derive(Deserialize)]
struct VersionProbe {
    format_version: u32,
}

/// The member name a payload is stored under.
#[must_use]
pub fn payload_member_name(seq: u32, save_name: &str) -> String {
    format!("{PAYLOAD_PREFIX}/{seq:04}/{save_name}")
}

/// Hex-encoded sha-256 of a file's contents.
pub fn sha256_file(path: &Path) -> Result<String, io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Hex-encoded sha-256 of a byte slice.
#[must_use]
pub fn sha256_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn corrupt(path: &Path, detail: impl Into<String>) -> SimflowError {
    ArchiveCorruptError::new(path.display().to_string(), detail).into()
}

/// Writes the archive: manifest first, then every bundled payload member.
pub fn write_archive(
    archive_path: &Path,
    manifest: &ArchiveManifest,
    staging_dir: &Path,
) -> Result<(), SimflowError> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(archive_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let write_err =
        |err: zip::result::ZipError| SimflowError::Io(io::Error::new(io::ErrorKind::Other, err));

    zip.start_file(MANIFEST_NAME, options).map_err(write_err)?;
    zip.write_all(&serde_json::to_vec_pretty(manifest)?)?;

    for entry in &manifest.payloads {
        let Some(member) = entry.archive_entry.as_deref() else {
            continue;
        };
        zip.start_file(member, options).map_err(write_err)?;
        let mut staged = File::open(staging_dir.join(member))?;
        io::copy(&mut staged, &mut zip)?;
    }

    zip.finish().map_err(write_err)?;
    Ok(())
}

/// Opens an archive for reading.
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>, SimflowError> {
    let file = File::open(path).map_err(|err| corrupt(path, err.to_string()))?;
    ZipArchive::new(file).map_err(|err| corrupt(path, err.to_string()))
}

/// Reads and validates the manifest.
///
/// The version tag is probed before the manifest is fully parsed, so a
/// future-format archive fails with [`UnsupportedArchiveVersionError`]
/// rather than a parse error.
pub fn read_manifest(
    zip: &mut ZipArchive<File>,
    path: &Path,
) -> Result<ArchiveManifest, SimflowError> {
    let mut text = String::new();
    zip.by_name(MANIFEST_NAME)
        .map_err(|err| corrupt(path, format!("{MANIFEST_NAME}: {err}")))?
        .read_to_string(&mut text)
        .map_err(|err| corrupt(path, format!("{MANIFEST_NAME}: {err}")))?;

    let probe: VersionProbe = serde_json::from_str(&text)
        .map_err(|err| corrupt(path, format!("unreadable manifest: {err}")))?;
    if probe.format_version != ARCHIVE_FORMAT_VERSION {
        return Err(UnsupportedArchiveVersionError::new(
            path.display().to_string(),
            probe.format_version,
            ARCHIVE_FORMAT_VERSION,
        )
        .into());
    }

    serde_json::from_str(&text).map_err(|err| corrupt(path, format!("unreadable manifest: {err}")))
}

/// Extracts one payload member to `dest`, verifying its checksum.
pub fn extract_member(
    zip: &mut ZipArchive<File>,
    path: &Path,
    member: &str,
    expected_sha256: Option<&str>,
    dest: &Path,
) -> Result<(), SimflowError> {
    let mut bytes = Vec::new();
    zip.by_name(member)
        .map_err(|err| corrupt(path, format!("{member}: {err}")))?
        .read_to_end(&mut bytes)
        .map_err(|err| corrupt(path, format!("{member}: {err}")))?;

    if let Some(expected) = expected_sha256 {
        let actual = sha256_bytes(&bytes);
        if actual != expected {
            return Err(corrupt(
                path,
                format!("{member}: checksum mismatch (expected {expected}, found {actual})"),
            ));
        }
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, bytes)?;
    Ok(())
}
