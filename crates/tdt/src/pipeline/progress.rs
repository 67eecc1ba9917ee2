use tracing::{info, warn};

use crate::case::CaseState;
use crate::stage::Stage;
use crate::worker::job::JobOutcome;

/// Events emitted while cases move through the pipeline.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    CaseStarted {
        index: usize,
        id: String,
    },
    StageStarted {
        index: usize,
        stage: Stage,
    },
    StageFinished {
        index: usize,
        stage: Stage,
        skipped: bool,
        elapsed_secs: f64,
    },
    JobFinished {
        job: String,
        outcome: JobOutcome,
        attempts: u32,
    },
    CaseFinished {
        index: usize,
        state: CaseState,
    },
    CaseFailed {
        index: usize,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Forwards progress to the tracing subscriber. Used by the CLI.
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::CaseStarted { index, id } => {
                info!(case = index, id = %id, "case started");
            }
            ProgressEvent::StageStarted { index, stage } => {
                info!(case = index, stage = %stage, "stage started");
            }
            ProgressEvent::StageFinished {
                index,
                stage,
                skipped,
                elapsed_secs,
            } => {
                info!(case = index, stage = %stage, skipped, elapsed = elapsed_secs, "stage finished");
            }
            ProgressEvent::JobFinished {
                job,
                outcome,
                attempts,
            } => match outcome {
                JobOutcome::Failed(reason) => {
                    warn!(job = %job, attempts, reason = %reason, "simulation job failed")
                }
                other => info!(job = %job, attempts, outcome = ?other, "simulation job finished"),
            },
            ProgressEvent::CaseFinished { index, state } => {
                info!(case = index, state = %state, "case finished");
            }
            ProgressEvent::CaseFailed { index, error } => {
                warn!(case = index, error = %error, "case failed");
            }
        }
    }
}
