//! Input declaration, output scanning, and stage file transfer.

use crate::context::RunContext;
use crate::errors::{NoOutputFileError, SimflowError, UnresolvableFileError};
use crate::resources::FileRecord;
use crate::stages::StageCore;
use tracing::{debug, info};

/// One file handed to `add_input_files`: a bare path/alias or a full record.
#[derive(Debug, Clone)]
pub enum FileSpec {
    /// A path or alias URI; destination and classification are derived.
    Path(String),
    /// A fully specified record; empty destination fields are filled in.
    Record(FileRecord),
}

/// A batch of file specs, built from a path, a list, or records.
#[derive(Debug, Clone, Default)]
pub struct FileSpecs(Vec<FileSpec>);

impl FileSpecs {
    /// The contained specs.
    #[must_use]
    pub fn into_inner(self) -> Vec<FileSpec> {
        self.0
    }
}

impl From<&str> for FileSpecs {
    fn from(path: &str) -> Self {
        Self(vec![FileSpec::Path(path.to_string())])
    }
}

impl From<String> for FileSpecs {
    fn from(path: String) -> Self {
        Self(vec![FileSpec::Path(path)])
    }
}

impl From<Vec<String>> for FileSpecs {
    fn from(paths: Vec<String>) -> Self {
        Self(paths.into_iter().map(FileSpec::Path).collect())
    }
}

impl From<&[&str]> for FileSpecs {
    fn from(paths: &[&str]) -> Self {
        Self(
            paths
                .iter()
                .map(|path| FileSpec::Path((*path).to_string()))
                .collect(),
        )
    }
}

impl<const N: usize> From<[&str; N]> for FileSpecs {
    fn from(paths: [&str; N]) -> Self {
        Self::from(&paths[..])
    }
}

impl From<FileRecord> for FileSpecs {
    fn from(record: FileRecord) -> Self {
        Self(vec![FileSpec::Record(record)])
    }
}

impl From<Vec<FileRecord>> for FileSpecs {
    fn from(records: Vec<FileRecord>) -> Self {
        Self(records.into_iter().map(FileSpec::Record).collect())
    }
}

/// Classification applied to declared input files.
#[derive(Debug, Clone, Copy)]
pub struct InputOptions {
    /// Payload data rather than a config file.
    pub is_data: bool,
    /// Declared through the input path but produced by the stage.
    pub is_output: bool,
}

impl Default for InputOptions {
    fn default() -> Self {
        Self {
            is_data: true,
            is_output: false,
        }
    }
}

/// Declarative output collection: which files count as stage outputs.
#[derive(Debug, Clone, Default)]
pub struct OutputScan {
    dir: Option<String>,
    save_path: Option<String>,
    prefixes: Vec<String>,
    suffixes: Vec<String>,
    names: Vec<String>,
    allow_empty: bool,
}

impl OutputScan {
    /// Scans the stage work directory with no name filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans this directory (path or alias URI) instead of the work dir.
    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Stores collected outputs here instead of the per-stage output store.
    #[must_use]
    pub fn save_to(mut self, save_path: impl Into<String>) -> Self {
        self.save_path = Some(save_path.into());
        self
    }

    /// Accepts names starting with this prefix (any of the given prefixes).
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefixes.push(prefix.into());
        self
    }

    /// Accepts names ending with this suffix (any of the given suffixes).
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffixes.push(suffix.into());
        self
    }

    /// Adds an explicit output name, exempt from the prefix and suffix
    /// filters. Names absent from the scanned directory are not collected.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into());
        self
    }

    /// Succeeds with zero records when nothing matches.
    #[must_use]
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    fn matches(&self, name: &str) -> bool {
        let prefix_ok =
            self.prefixes.is_empty() || self.prefixes.iter().any(|p| name.starts_with(p.as_str()));
        let suffix_ok =
            self.suffixes.is_empty() || self.suffixes.iter().any(|s| name.ends_with(s.as_str()));
        prefix_ok && suffix_ok
    }

    fn describe_filters(&self) -> String {
        let mut parts = Vec::new();
        if !self.prefixes.is_empty() {
            parts.push(format!("prefix in {:?}", self.prefixes));
        }
        if !self.suffixes.is_empty() {
            parts.push(format!("suffix in {:?}", self.suffixes));
        }
        if !self.names.is_empty() {
            parts.push(format!("names {:?}", self.names));
        }
        if parts.is_empty() {
            "any file".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Joins a directory spec (path or alias URI) with a file name.
fn join_spec(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

/// Normalizes and declares input files on a stage core.
///
/// Every path is resolved at call time: a missing file fails immediately
/// with [`UnresolvableFileError`] instead of surfacing mid-run.
pub(crate) fn declare_inputs(
    core: &mut StageCore,
    ctx: &RunContext,
    files: FileSpecs,
    options: InputOptions,
) -> Result<(), SimflowError> {
    let work_dir = core.work_dir().to_string();
    for spec in files.into_inner() {
        let record = match spec {
            FileSpec::Path(path) => {
                let resolved = ctx.roots().resolve(&path)?;
                if !options.is_output && !resolved.is_file() {
                    return Err(UnresolvableFileError::new(core.name(), &path).into());
                }
                let save_name = resolved
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .ok_or_else(|| UnresolvableFileError::new(core.name(), &path))?;
                FileRecord {
                    source_path: path,
                    save_path: work_dir.clone(),
                    save_name,
                    origin: ctx.roots().classify(&resolved),
                    is_data: options.is_data,
                    is_output: options.is_output,
                }
            }
            FileSpec::Record(mut record) => {
                let resolved = ctx.roots().resolve(&record.source_path)?;
                if !record.is_output && !resolved.is_file() {
                    return Err(
                        UnresolvableFileError::new(core.name(), &record.source_path).into(),
                    );
                }
                if record.save_name.is_empty() {
                    record.save_name = resolved
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .ok_or_else(|| {
                            UnresolvableFileError::new(core.name(), &record.source_path)
                        })?;
                }
                if record.save_path.is_empty() {
                    record.save_path = work_dir.clone();
                }
                record
            }
        };
        debug!(stage = core.name(), record = %record, "declared input file");
        core.config_mut().push_input(record);
    }
    core.mark_configured();
    Ok(())
}

/// Scans for produced files and declares them as output records.
pub(crate) fn declare_outputs(
    core: &mut StageCore,
    ctx: &RunContext,
    scan: OutputScan,
) -> Result<(), SimflowError> {
    let dir_spec = scan
        .dir
        .clone()
        .unwrap_or_else(|| core.work_dir().to_string());
    let save_path = scan
        .save_path
        .clone()
        .unwrap_or_else(|| format!("outputs://{}", core.name()));
    let resolved_dir = ctx.roots().resolve(&dir_spec)?;

    let mut listing: Vec<String> = Vec::new();
    if resolved_dir.is_dir() {
        for entry in std::fs::read_dir(&resolved_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            listing.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    // Explicit names bypass the filters but must still be present on disk.
    let names_only = scan.prefixes.is_empty() && scan.suffixes.is_empty() && !scan.names.is_empty();
    let mut names: Vec<String> = if names_only {
        Vec::new()
    } else {
        listing
            .iter()
            .filter(|name| scan.matches(name))
            .cloned()
            .collect()
    };
    for name in &scan.names {
        if listing.contains(name) && !names.contains(name) {
            names.push(name.clone());
        }
    }
    names.sort();

    if names.is_empty() {
        if scan.allow_empty {
            debug!(stage = core.name(), dir = %dir_spec, "no output files matched");
            core.mark_configured();
            return Ok(());
        }
        return Err(NoOutputFileError::new(
            core.name(),
            &dir_spec,
            scan.describe_filters(),
        )
        .into());
    }

    for name in names {
        let source_path = join_spec(&dir_spec, &name);
        let resolved = ctx.roots().resolve(&source_path)?;
        let record = FileRecord {
            source_path,
            save_path: save_path.clone(),
            save_name: name,
            origin: ctx.roots().classify(&resolved),
            is_data: true,
            is_output: true,
        };
        debug!(stage = core.name(), record = %record, "declared output file");
        core.config_mut().push_output(record);
    }
    core.mark_configured();
    Ok(())
}

/// Places declared inputs into the run tree (the default `before_exec`).
///
/// Every declared record is placed, including output-flagged inputs fed in
/// from an upstream stage; a source still missing at this point fails with
/// [`UnresolvableFileError`].
pub(crate) fn place_inputs(core: &StageCore, ctx: &RunContext) -> Result<(), SimflowError> {
    let work_dir = ctx.roots().resolve(core.work_dir())?;
    if ctx.dry_run() {
        info!(stage = core.name(), "dry run: skipping input placement");
        return Ok(());
    }
    std::fs::create_dir_all(&work_dir)?;
    for record in core.inputs() {
        let source = ctx.roots().resolve(&record.source_path)?;
        if !source.is_file() {
            return Err(UnresolvableFileError::new(core.name(), &record.source_path).into());
        }
        let dest = ctx.roots().resolve(&record.save_path)?.join(&record.save_name);
        ctx.workspace().place_input(&source, &dest)?;
    }
    Ok(())
}

/// Moves declared outputs to their save destinations (the default
/// `after_exec`).
pub(crate) fn collect_outputs(core: &StageCore, ctx: &RunContext) -> Result<(), SimflowError> {
    if ctx.dry_run() {
        info!(stage = core.name(), "dry run: skipping output collection");
        return Ok(());
    }
    for record in core.outputs() {
        let source = ctx.roots().resolve(&record.source_path)?;
        let dest = ctx.roots().resolve(&record.save_path)?.join(&record.save_name);
        ctx.workspace().collect_output(&source, &dest)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::FileOrigin;
    use crate::settings::RunSettings;
    use crate::stages::CommandSpec;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, RunContext, StageCore) {
        let dir = TempDir::new().unwrap();
        let settings = RunSettings::new()
            .with_workspace(dir.path().join("ws"))
            .with_resource("geo", dir.path().join("geog"));
        let ctx = RunContext::new(settings);
        ctx.prepare().unwrap();
        std::fs::create_dir_all(dir.path().join("geog")).unwrap();
        let core = StageCore::new("stage_a", CommandSpec::new("true"));
        (dir, ctx, core)
    }

    #[test]
    fn test_declare_single_path_defaults() {
        let (dir, ctx, mut core) = fixture();
        let input = dir.path().join("obs.nc");
        std::fs::write(&input, "data").unwrap();

        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from(input.display().to_string()),
            InputOptions::default(),
        )
        .unwrap();

        let record = &core.inputs()[0];
        assert_eq!(record.save_name, "obs.nc");
        assert_eq!(record.save_path, core.work_dir());
        assert_eq!(record.origin, FileOrigin::UserResource);
        assert!(record.is_data);
        assert!(!record.is_output);
    }

    #[test]
    fn test_missing_input_fails_at_declaration() {
        let (_dir, ctx, mut core) = fixture();
        let err = declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from("/nowhere/missing.nc"),
            InputOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SimflowError::UnresolvableFile(_)));
    }

    #[test]
    fn test_upstream_product_input_is_placed() {
        let (dir, ctx, mut core) = fixture();
        let product = dir.path().join("met_em.d01.nc");
        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from(product.display().to_string()),
            InputOptions {
                is_data: true,
                is_output: true,
            },
        )
        .unwrap();
        // The upstream stage writes the file after it was declared here.
        std::fs::write(&product, "met fields").unwrap();

        place_inputs(&core, &ctx).unwrap();

        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        assert_eq!(
            std::fs::read_to_string(work.join("met_em.d01.nc")).unwrap(),
            "met fields"
        );
    }

    #[test]
    fn test_missing_input_fails_at_placement() {
        let (dir, ctx, mut core) = fixture();
        let product = dir.path().join("met_em.d01.nc");
        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from(product.display().to_string()),
            InputOptions {
                is_data: true,
                is_output: true,
            },
        )
        .unwrap();

        let err = place_inputs(&core, &ctx).unwrap_err();
        assert!(matches!(err, SimflowError::UnresolvableFile(_)));
        // Not even a dangling link may appear in the work dir.
        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        assert!(work.join("met_em.d01.nc").symlink_metadata().is_err());
    }

    #[test]
    fn test_framework_root_classification() {
        let (dir, ctx, mut core) = fixture();
        std::fs::write(dir.path().join("geog/index"), "table").unwrap();

        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from("geo://index"),
            InputOptions::default(),
        )
        .unwrap();
        assert_eq!(core.inputs()[0].origin, FileOrigin::FrameworkResource);
    }

    #[test]
    fn test_record_spec_fills_empty_fields() {
        let (dir, ctx, mut core) = fixture();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "x").unwrap();
        let record = FileRecord::new(input.display().to_string(), "", "").with_data(false);

        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from(record),
            InputOptions::default(),
        )
        .unwrap();
        let declared = &core.inputs()[0];
        assert_eq!(declared.save_name, "in.txt");
        assert_eq!(declared.save_path, core.work_dir());
        assert!(!declared.is_data);
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let (_dir, ctx, mut core) = fixture();
        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        for name in ["met_em.d02.nc", "met_em.d01.nc", "metgrid.log", "other.txt"] {
            std::fs::write(work.join(name), "x").unwrap();
        }

        declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_prefix("met_em.").with_suffix(".nc"),
        )
        .unwrap();

        let names: Vec<_> = core
            .outputs()
            .iter()
            .map(|record| record.save_name.clone())
            .collect();
        assert_eq!(names, vec!["met_em.d01.nc", "met_em.d02.nc"]);
        assert!(core.outputs().iter().all(|record| record.is_output));
    }

    #[test]
    fn test_scan_strict_empty_fails() {
        let (_dir, ctx, mut core) = fixture();
        let err = declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_prefix("wrfout_"),
        )
        .unwrap_err();
        assert!(matches!(err, SimflowError::NoOutputFile(_)));
    }

    #[test]
    fn test_scan_allow_empty_succeeds() {
        let (_dir, ctx, mut core) = fixture();
        declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_prefix("wrfout_").allow_empty(),
        )
        .unwrap();
        assert!(core.outputs().is_empty());
    }

    #[test]
    fn test_explicit_names_bypass_filters_when_present() {
        let (_dir, ctx, mut core) = fixture();
        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        for name in ["rsl.out.0000", "wrfout_d01", "metgrid.log"] {
            std::fs::write(work.join(name), "x").unwrap();
        }

        declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_prefix("wrfout_").with_name("rsl.out.0000"),
        )
        .unwrap();

        let names: Vec<_> = core
            .outputs()
            .iter()
            .map(|record| record.save_name.clone())
            .collect();
        assert_eq!(names, vec!["rsl.out.0000", "wrfout_d01"]);
    }

    #[test]
    fn test_names_only_scan_collects_just_the_named_files() {
        let (_dir, ctx, mut core) = fixture();
        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        std::fs::create_dir_all(&work).unwrap();
        std::fs::write(work.join("rsl.out.0000"), "log").unwrap();
        std::fs::write(work.join("rsl.error.0000"), "log").unwrap();

        declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_name("rsl.out.0000"),
        )
        .unwrap();

        assert_eq!(core.outputs().len(), 1);
        assert_eq!(core.outputs()[0].save_name, "rsl.out.0000");
        assert_eq!(core.outputs()[0].save_path, "outputs://stage_a");
    }

    #[test]
    fn test_missing_explicit_name_fails() {
        let (_dir, ctx, mut core) = fixture();
        let err = declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_name("wrfinput_d01"),
        )
        .unwrap_err();
        assert!(matches!(err, SimflowError::NoOutputFile(_)));
        assert!(core.outputs().is_empty());
    }

    #[test]
    fn test_place_and_collect_round_trip() {
        let (dir, ctx, mut core) = fixture();
        let input = dir.path().join("in.txt");
        std::fs::write(&input, "payload").unwrap();
        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from(input.display().to_string()),
            InputOptions::default(),
        )
        .unwrap();
        place_inputs(&core, &ctx).unwrap();

        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        assert_eq!(
            std::fs::read_to_string(work.join("in.txt")).unwrap(),
            "payload"
        );

        std::fs::write(work.join("result.out"), "answer").unwrap();
        declare_outputs(
            &mut core,
            &ctx,
            OutputScan::new().with_suffix(".out"),
        )
        .unwrap();
        collect_outputs(&core, &ctx).unwrap();

        let collected = ctx
            .roots()
            .resolve("outputs://stage_a")
            .unwrap()
            .join("result.out");
        assert_eq!(std::fs::read_to_string(collected).unwrap(), "answer");
        assert!(!work.join("result.out").exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let settings = RunSettings::new().with_workspace(dir.path().join("ws"));
        let ctx = RunContext::new(settings).with_dry_run(true);
        ctx.prepare().unwrap();
        let mut core = StageCore::new("stage_a", CommandSpec::new("true"));

        let input = dir.path().join("in.txt");
        std::fs::write(&input, "payload").unwrap();
        declare_inputs(
            &mut core,
            &ctx,
            FileSpecs::from(input.display().to_string()),
            InputOptions::default(),
        )
        .unwrap();
        place_inputs(&core, &ctx).unwrap();

        let work = ctx.roots().resolve(core.work_dir()).unwrap();
        assert!(!work.join("in.txt").exists());
    }
}
