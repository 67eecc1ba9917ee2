//! Resumable batch orchestrator for theranostic digital twins: CT
//! segmentation, PBPK kinetics, Monte-Carlo SPECT simulation and
//! reconstruction, chained per case with results aggregated and calibrated
//! between simulation and reconstruction.

pub mod aggregation;
pub mod case;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sanitize;
pub mod stage;
pub mod storage;
pub mod worker;

pub use case::{Case, CaseScanner, CaseState};
pub use collaborator::Collaborators;
pub use config::{load_config, Config, RunMode};
pub use error::{
    AggregationError, CaseError, ConfigError, Result, RunError, StorageError, TdtError, ToolError,
    WorkerError,
};
pub use pipeline::{BatchReport, BatchRunner, Orchestrator, PipelineConfig, RunOptions};
pub use stage::{Stage, ValidityPolicy};
