//! # Simflow
//!
//! An execution and replay core for multi-stage external numerical-model
//! pipelines.
//!
//! Simflow wraps command-line model executables (preprocessors, solvers,
//! postprocessors) behind a uniform stage protocol with support for:
//!
//! - **Stage-based execution**: Declare inputs and outputs, then run the
//!   external program with paired `before_exec`/`after_exec` hooks
//! - **Configuration snapshots**: Every invocation exports a replayable
//!   record of its construction values, custom settings, and file records
//! - **Replay journals**: Recorded runs pack into a single portable archive,
//!   with user data bundled and checksummed
//! - **Resource aliases**: Framework and user file trees addressed through
//!   `alias://` URIs that survive machine moves
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use simflow::prelude::*;
//!
//! // Set up a recorded run
//! let settings = RunSettings::from_file("simflow.toml")?;
//! let ctx = RunContext::new(settings);
//! ctx.prepare()?;
//! ctx.attach_journal(ArchiveMode::Bundled)?;
//!
//! // Declare and run one stage
//! let mut geogrid = ProgramStage::new("geogrid", CommandSpec::new("./geogrid.exe"))
//!     .with_output_scan(OutputScan::new().with_prefix("geo_em"));
//! geogrid.add_input_files(&ctx, "data/namelist.wps".into())?;
//! geogrid.exec(&ctx).await?;
//!
//! // Pack the run into a replay archive
//! ctx.export_replay(Path::new("run.replay"))?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod context;
pub mod errors;
pub mod journal;
pub mod registry;
pub mod resources;
pub mod settings;
pub mod stages;
pub mod testing;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::RunContext;
    pub use crate::errors::{
        DuplicateFileError, DuplicateStageError, ExternalProgramError, NoOutputFileError,
        SimflowError, UnresolvableFileError,
    };
    pub use crate::journal::{
        ArchiveManifest, ArchiveMode, ReplayJournal, ReplayLoader, StageFactories, StageSnapshot,
    };
    pub use crate::registry::{ConfigRegistry, RegistryObserver};
    pub use crate::resources::{FileOrigin, FileRecord, ResourceRoots};
    pub use crate::settings::RunSettings;
    pub use crate::stages::{
        CommandSpec, ConstructorSpec, CustomConfig, Executable, FileSpecs, InputOptions,
        MpiLaunch, OutputScan, ProgramStage, StageConfig, StageCore, StageState,
    };
    pub use crate::workspace::Workspace;
}
