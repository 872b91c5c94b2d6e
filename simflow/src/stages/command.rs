//! External-program command lines and the subprocess runner.

use crate::context::RunContext;
use crate::errors::{ExternalProgramError, SimflowError};
use crate::settings::LauncherSection;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// How many stderr bytes an [`ExternalProgramError`] carries.
const STDERR_TAIL_BYTES: usize = 2048;

/// Distributed-launch parameters for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MpiLaunch {
    /// Number of ranks to request from the launcher.
    pub ranks: u32,
}

impl MpiLaunch {
    /// Creates a launch request for the given rank count.
    #[must_use]
    pub fn new(ranks: u32) -> Self {
        Self { ranks }
    }
}

/// The command line a stage runs, with its logical working directory.
///
/// `work_dir` may be an alias URI (typically `workspace://run/<stage>`), kept
/// unresolved so recorded configurations replay on other machines.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    /// The program to invoke.
    pub program: String,
    /// Arguments passed to the program.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Logical working directory, as a path or alias URI.
    pub work_dir: String,
    /// Distributed-launch request; `None` runs the program directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpi: Option<MpiLaunch>,
}

impl CommandSpec {
    /// Creates a command for the given program.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            work_dir: String::new(),
            mpi: None,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory (path or alias URI).
    #[must_use]
    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    /// Requests a distributed launch with the given rank count.
    #[must_use]
    pub fn with_mpi(mut self, ranks: u32) -> Self {
        self.mpi = Some(MpiLaunch::new(ranks));
        self
    }

    /// The full argument vector, with the launcher prefix when MPI is
    /// requested.
    #[must_use]
    pub fn resolved_argv(&self, launcher: &LauncherSection) -> Vec<String> {
        let mut argv = Vec::new();
        if let Some(mpi) = self.mpi {
            argv.push(launcher.program.clone());
            if launcher.oversubscribe {
                argv.push("--oversubscribe".to_string());
            }
            argv.push("-np".to_string());
            argv.push(mpi.ranks.to_string());
        }
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }

    /// The command line as one display string.
    #[must_use]
    pub fn display_line(&self, launcher: &LauncherSection) -> String {
        self.resolved_argv(launcher).join(" ")
    }
}

/// What a finished external invocation left behind.
#[derive(Debug)]
pub(crate) struct CommandOutcome {
    /// The process exit code.
    pub status: i32,
    /// Combined stdout/stderr log, when writing it succeeded.
    pub log_path: Option<PathBuf>,
}

/// Runs a stage's external program to completion, capturing its output.
///
/// The captured streams are written to `<logs>/<stage>.log` on every exit
/// path. A non-zero exit (or a spawn failure) becomes an
/// [`ExternalProgramError`] carrying the stderr tail.
pub(crate) async fn run_external(
    ctx: &RunContext,
    stage: &str,
    spec: &CommandSpec,
) -> Result<CommandOutcome, SimflowError> {
    let launcher = &ctx.settings().launcher;
    let argv = spec.resolved_argv(launcher);
    let command_line = argv.join(" ");
    let work_dir = ctx.roots().resolve(&spec.work_dir)?;
    std::fs::create_dir_all(&work_dir)?;

    let Some((program, args)) = argv.split_first() else {
        return Err(ExternalProgramError::new(stage, "", None, "empty command line").into());
    };

    info!(stage = %stage, command = %command_line, work_dir = %work_dir.display(), "launching external program");

    let output = tokio::process::Command::new(program)
        .args(args)
        .current_dir(&work_dir)
        .output()
        .await
        .map_err(|err| ExternalProgramError::new(stage, &command_line, None, err.to_string()))?;

    let log_path = write_log(ctx, stage, &command_line, &output);

    if output.status.success() {
        Ok(CommandOutcome {
            status: 0,
            log_path,
        })
    } else {
        Err(ExternalProgramError::new(
            stage,
            &command_line,
            output.status.code(),
            tail(&output.stderr),
        )
        .into())
    }
}

fn write_log(
    ctx: &RunContext,
    stage: &str,
    command_line: &str,
    output: &std::process::Output,
) -> Option<PathBuf> {
    let logs_dir = ctx.workspace().logs_dir();
    let log_path = logs_dir.join(format!("{stage}.log"));
    let mut text = format!("$ {command_line}\nstatus: {}\n", output.status);
    text.push_str("--- stdout ---\n");
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    text.push_str("--- stderr ---\n");
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    let write = std::fs::create_dir_all(&logs_dir).and_then(|()| std::fs::write(&log_path, text));
    match write {
        Ok(()) => Some(log_path),
        Err(err) => {
            warn!(stage = %stage, error = %err, "could not write program log");
            None
        }
    }
}

fn tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).into_owned()
}
