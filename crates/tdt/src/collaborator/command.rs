use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Output};

use serde::Serialize;
use tracing::debug;

use crate::collaborator::{
    KineticsRequest, KineticsSolver, LesionGenerator, LesionRequest, PreprocessingRequest,
    Preprocessor, ReconstructionRequest, Reconstructor,
};
use crate::config::CommandConfig;
use crate::error::ToolError;
use crate::storage::filesystem::write_json_atomic;

/// Longest stderr/stdout excerpt kept in an error message.
const MAX_DETAIL_CHARS: usize = 2000;

/// A program plus fixed arguments and environment, run to completion.
#[derive(Debug, Clone)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, OsString)>,
}

impl ExternalCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn from_config(config: &CommandConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Runs in `cwd` with `extra_args` appended. A non-zero exit becomes
    /// `ToolError::NonZeroExit` carrying the tail of stderr (or stdout).
    pub fn run(&self, cwd: &Path, extra_args: &[OsString]) -> Result<Output, ToolError> {
        debug!(program = %self.program, cwd = %cwd.display(), "launching external command");

        let output = Command::new(&self.program)
            .args(&self.args)
            .args(extra_args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .current_dir(cwd)
            .output()
            .map_err(|e| ToolError::Launch {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ToolError::NonZeroExit {
                program: self.program.clone(),
                status: output.status.to_string(),
                detail: failure_detail(&output),
            });
        }

        Ok(output)
    }
}

fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let detail = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        format!("exit status {}", output.status)
    };
    tail(&detail, MAX_DETAIL_CHARS)
}

fn tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    let skipped: String = text.chars().skip(count - max_chars).collect();
    format!("...{}", skipped)
}

/// Writes `<dir>/<stage>_request.json` and runs `<program> <args..> <request.json>` in `dir`.
fn run_with_request<T: Serialize>(
    command: &ExternalCommand,
    stage: &str,
    dir: &Path,
    request: &T,
) -> Result<(), ToolError> {
    let request_path = dir.join(format!("{}_request.json", stage));
    write_json_atomic(&request_path, request)?;
    command.run(dir, &[request_path.into_os_string()])?;
    Ok(())
}

pub struct CommandPreprocessor {
    command: ExternalCommand,
}

impl CommandPreprocessor {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Preprocessor for CommandPreprocessor {
    fn preprocess(&self, request: &PreprocessingRequest) -> Result<(), ToolError> {
        run_with_request(&self.command, "preprocessing", &request.output_dir, request)
    }
}

pub struct CommandLesionGenerator {
    command: ExternalCommand,
}

impl CommandLesionGenerator {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl LesionGenerator for CommandLesionGenerator {
    fn insert(&self, request: &LesionRequest) -> Result<(), ToolError> {
        run_with_request(&self.command, "synthetic_lesions", &request.output_dir, request)
    }
}

pub struct CommandKineticsSolver {
    command: ExternalCommand,
}

impl CommandKineticsSolver {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl KineticsSolver for CommandKineticsSolver {
    fn solve(&self, request: &KineticsRequest) -> Result<(), ToolError> {
        run_with_request(&self.command, "pbpk", &request.output_dir, request)
    }
}

pub struct CommandReconstructor {
    command: ExternalCommand,
}

impl CommandReconstructor {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

impl Reconstructor for CommandReconstructor {
    fn reconstruct(&self, request: &ReconstructionRequest) -> Result<(), ToolError> {
        run_with_request(&self.command, "reconstruction", &request.output_dir, request)
    }
}
