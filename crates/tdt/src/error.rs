use std::path::PathBuf;
use thiserror::Error;

use crate::stage::Stage;

#[derive(Error, Debug)]
pub enum TdtError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("External tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Aggregation error: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Case error: {0}")]
    Case(#[from] CaseError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Run aborted: {0}")]
    Run(#[from] RunError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Missing required field '{field}'")]
    MissingField { field: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move file from '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Malformed file '{path}': {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

impl StorageError {
    /// Underlying I/O error, if this storage error wraps one.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            StorageError::CreateDirectory { source, .. }
            | StorageError::ReadFile { source, .. }
            | StorageError::WriteFile { source, .. }
            | StorageError::MoveFile { source, .. }
            | StorageError::CopyFile { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True when the failure was caused by the device running out of space.
    pub fn is_disk_full(&self) -> bool {
        self.io_error().map(is_disk_full).unwrap_or(false)
    }
}

/// ENOSPC on unix, ERROR_DISK_FULL on windows.
pub fn is_disk_full(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    const DISK_FULL: i32 = 28;
    #[cfg(windows)]
    const DISK_FULL: i32 = 112;
    #[cfg(not(any(unix, windows)))]
    const DISK_FULL: i32 = -1;

    err.raw_os_error() == Some(DISK_FULL)
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is shutting down")]
    ShuttingDown,

    #[error("Job channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {detail}")]
    NonZeroExit {
        program: String,
        status: String,
        detail: String,
    },

    #[error("Expected output missing: {0}")]
    MissingOutput(PathBuf),

    #[error("Malformed output '{path}': {reason}")]
    MalformedOutput { path: PathBuf, reason: String },

    #[error("Failed to prepare tool inputs: {0}")]
    Prepare(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("Frame {frame} is incomplete: missing {missing:?}")]
    IncompleteFrame { frame: String, missing: Vec<String> },

    #[error("Frame {frame}: window length mismatch for ROI '{roi}' (expected {expected}, got {actual})")]
    LengthMismatch {
        frame: String,
        roi: String,
        expected: usize,
        actual: usize,
    },

    #[error("Frame {frame} has no contributing ROIs")]
    NoContributions { frame: String },

    #[error("Calibration job did not complete")]
    CalibrationMissing,

    #[error("Calibration is undefined: {0}")]
    Calibration(String),

    #[error("Projection IO failed: {0}")]
    Io(#[from] StorageError),
}

/// Case-scoped failure. Isolated to the owning case; the batch continues.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("Invalid CT input '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error("Case folder '{folder}' holds outputs of '{found}', not '{expected}'")]
    ForeignCaseFolder {
        folder: String,
        expected: String,
        found: String,
    },

    #[error("{stage} stage failed: {source}")]
    Tool {
        stage: Stage,
        #[source]
        source: ToolError,
    },

    #[error("{stage} stage produced invalid outputs: {reason}")]
    InvalidOutputs { stage: Stage, reason: String },

    #[error("Stage contract violated: {0}")]
    Contract(String),

    #[error("{failed} simulation job(s) failed after retries: {detail}")]
    JobsFailed { failed: usize, detail: String },

    #[error("{0} simulation job(s) were cancelled before launch")]
    JobsCancelled(usize),

    #[error("Aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),

    #[error("Storage failed: {0}")]
    Storage(#[from] StorageError),

    #[error("State regressed from {from} to {to}: stage outputs disappeared")]
    StateRegression { from: String, to: String },

    #[error("Run interrupted before the {0} stage")]
    Interrupted(Stage),
}

impl CaseError {
    /// The case folder belongs to another input and must not be written to.
    pub fn is_foreign_folder(&self) -> bool {
        matches!(self, CaseError::ForeignCaseFolder { .. })
    }

    /// Disk exhaustion is a run-level condition even when a case hits it first.
    pub fn is_disk_full(&self) -> bool {
        match self {
            CaseError::Storage(e) => e.is_disk_full(),
            CaseError::Aggregation(AggregationError::Io(e)) => e.is_disk_full(),
            CaseError::Tool {
                source: ToolError::Prepare(e),
                ..
            } => e.is_disk_full(),
            _ => false,
        }
    }
}

/// Run-level failure. Aborts the whole invocation.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Configured core count {requested} exceeds the {available} available")]
    CoreCount { requested: usize, available: usize },

    #[error("Disk exhausted: {0}")]
    DiskFull(String),

    #[error("CT input directory '{0}' is not a directory")]
    InputNotDirectory(PathBuf),

    #[error("Failed to discover cases: {0}")]
    Discovery(#[source] StorageError),

    #[error("Failed to write manifest: {0}")]
    Manifest(#[source] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, TdtError>;
