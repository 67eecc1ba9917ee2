pub mod batch;
pub mod case_log;
pub mod config;
pub mod context;
pub mod progress;
pub mod runner;

pub use batch::{BatchReport, BatchRunner};
pub use case_log::CaseLog;
pub use config::{resolve_worker_count, PipelineConfig, RunOptions, LESION_ROI};
pub use context::CaseContext;
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter, TracingProgress};
pub use runner::{AggregationReport, CaseOutcome, FailureRecord, Orchestrator, Provenance};
