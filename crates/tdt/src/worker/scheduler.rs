use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, info_span, warn};

use crate::aggregation::window_files;
use crate::collaborator::{EngineSetup, MonteCarloEngine, ResultSummary};
use crate::error::{AggregationError, CaseError, ToolError};
use crate::pipeline::progress::{ProgressEvent, ProgressReporter};
use crate::stage::{Roi, Stage, TimeFrame, ValidityPolicy};
use crate::storage::filesystem::{ensure_directory, move_file, write_json_atomic};
use crate::worker::job::{
    CalibrationJob, Geometry, JobKey, JobOutcome, JobResult, SimulationJob, SimulationParams,
    WorkId, WorkItem,
};
use crate::worker::pool::{JobHandler, SlotGate, WorkerPool};

/// Photons handed to the engine for one ROI at one frame. Zero when the frame
/// carries no activity at all.
pub fn photon_scale(num_photons: f64, roi_activity: f64, total_activity: f64) -> f64 {
    if total_activity == 0.0 {
        return 0.0;
    }
    num_photons * (roi_activity / total_activity) / total_activity
}

/// The full (ROI x frame) job set of a case plus its calibration run.
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub jobs: Vec<SimulationJob>,
    pub calibration: CalibrationJob,
    pub rois: Vec<String>,
    pub frames: Vec<TimeFrame>,
}

impl JobPlan {
    pub fn build(
        rois: &[Roi],
        frames: &[TimeFrame],
        total_activity_mbq: &[f64],
        attenuation_map: &Path,
        geometry: Geometry,
        params: Arc<SimulationParams>,
    ) -> Self {
        let mut jobs = Vec::with_capacity(rois.len() * frames.len());

        for roi in rois {
            for frame in frames {
                let roi_activity = roi.activity_mbq.get(frame.index).copied().unwrap_or(0.0);
                let total = total_activity_mbq.get(frame.index).copied().unwrap_or(0.0);
                let activity_map = roi
                    .activity_maps
                    .get(frame.index)
                    .cloned()
                    .unwrap_or_default();

                jobs.push(SimulationJob {
                    key: JobKey::new(&roi.name, frame),
                    frame: frame.clone(),
                    activity_map,
                    attenuation_map: attenuation_map.to_path_buf(),
                    geometry: geometry.clone(),
                    params: Arc::clone(&params),
                    photon_scale: photon_scale(params.num_photons, roi_activity, total),
                    seed: jobs.len() as u64,
                });
            }
        }

        Self {
            jobs,
            calibration: CalibrationJob { params },
            rois: rois.iter().map(|r| r.name.clone()).collect(),
            frames: frames.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// QA record of one job, written to `<prefix>_job_summaries.json`.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub outcome: JobOutcome,
    pub attempts: u32,
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultSummary>,
}

/// Which jobs finished, were reused, failed, or were cancelled.
#[derive(Debug, Clone, Default)]
pub struct CompletionSet {
    pub outputs: BTreeMap<JobKey, [PathBuf; 3]>,
    pub completed: BTreeSet<JobKey>,
    pub reused: BTreeSet<JobKey>,
    pub failed: BTreeMap<JobKey, String>,
    pub cancelled: BTreeSet<JobKey>,
    pub calibration: Option<[PathBuf; 3]>,
    pub calibration_failure: Option<String>,
    pub summaries: BTreeMap<String, JobSummary>,
}

impl CompletionSet {
    fn record(&mut self, result: JobResult) {
        self.summaries.insert(
            result.id.to_string(),
            JobSummary {
                outcome: result.outcome.clone(),
                attempts: result.attempts,
                elapsed_secs: result.elapsed_secs,
                result: result.summary.clone(),
            },
        );

        match result.id {
            WorkId::Calibration => match (result.outcome, result.outputs) {
                (JobOutcome::Completed | JobOutcome::Reused, Some(outputs)) => {
                    self.calibration = Some(outputs);
                }
                (JobOutcome::Failed(reason), _) => self.calibration_failure = Some(reason),
                (JobOutcome::Cancelled, _) => {}
                (_, None) => self.calibration_failure = Some("no outputs recorded".to_string()),
            },
            WorkId::Job(key) => match (result.outcome, result.outputs) {
                (JobOutcome::Completed, Some(outputs)) => {
                    self.completed.insert(key.clone());
                    self.outputs.insert(key, outputs);
                }
                (JobOutcome::Reused, Some(outputs)) => {
                    self.reused.insert(key.clone());
                    self.outputs.insert(key, outputs);
                }
                (JobOutcome::Failed(reason), _) => {
                    self.failed.insert(key, reason);
                }
                (JobOutcome::Cancelled, _) => {
                    self.cancelled.insert(key);
                }
                (_, None) => {
                    self.failed.insert(key, "no outputs recorded".to_string());
                }
            },
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && self.calibration.is_some()
    }

    /// Inputs for aggregating `frame`. Fails closed unless every ROI has validated outputs.
    pub fn frame_inputs(
        &self,
        frame: &TimeFrame,
        rois: &[String],
    ) -> Result<BTreeMap<String, [PathBuf; 3]>, AggregationError> {
        let mut inputs = BTreeMap::new();
        let mut missing = Vec::new();

        for roi in rois {
            match self.outputs.get(&JobKey::new(roi, frame)) {
                Some(paths) => {
                    inputs.insert(roi.clone(), paths.clone());
                }
                None => missing.push(roi.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(AggregationError::IncompleteFrame {
                frame: frame.label(),
                missing,
            });
        }
        Ok(inputs)
    }

    pub fn failure_detail(&self) -> String {
        let mut parts: Vec<String> = self
            .failed
            .iter()
            .map(|(key, reason)| format!("{}: {}", key, reason))
            .collect();
        if let Some(reason) = &self.calibration_failure {
            parts.push(format!("calibration: {}", reason));
        }
        parts.join("; ")
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub worker_count: usize,
    pub max_retries: u32,
    pub validity: ValidityPolicy,
    /// Keep jobs whose final outputs already validate.
    pub reuse_outputs: bool,
}

/// Runs one engine job with retries inside a pool worker, holding an engine
/// slot for all of its attempts.
struct EngineJobHandler {
    engine: Arc<dyn MonteCarloEngine>,
    slots: SlotGate,
    shutdown: Arc<AtomicBool>,
    work_dir: PathBuf,
    output_dir: PathBuf,
    validity: ValidityPolicy,
    max_retries: u32,
}

impl EngineJobHandler {
    fn run_once(&self, item: &WorkItem) -> Result<([PathBuf; 3], Option<ResultSummary>), ToolError> {
        self.engine.run(item, &self.work_dir)?;

        let stem = item.output_stem();
        let produced = window_files(&self.work_dir, &stem);
        for path in &produced {
            if !path.exists() {
                return Err(ToolError::MissingOutput(path.clone()));
            }
            self.validity
                .check(path)
                .map_err(|reason| ToolError::MalformedOutput {
                    path: path.clone(),
                    reason,
                })?;
        }

        let finals = window_files(&self.output_dir, &stem);
        for (from, to) in produced.iter().zip(finals.iter()) {
            move_file(from, to)?;
        }

        let res_name = format!("{}.res", stem);
        let work_res = self.work_dir.join(&res_name);
        let summary = if work_res.exists() {
            let final_res = self.output_dir.join(&res_name);
            move_file(&work_res, &final_res)?;
            ResultSummary::read(&final_res).ok()
        } else {
            None
        };

        Ok((finals, summary))
    }
}

impl JobHandler<WorkItem> for EngineJobHandler {
    type Output = JobResult;

    fn handle(&self, worker_id: usize, item: WorkItem) -> JobResult {
        let id = item.id();
        let _slot = match self.slots.acquire(&self.shutdown) {
            Some(permit) => permit,
            None => {
                debug!(worker_id, job = %id, "shutdown while waiting for an engine slot");
                return JobResult::cancelled(id);
            }
        };
        let started = Instant::now();
        let attempts = self.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(worker_id, job = %id, attempt, "running engine job");
            match self.run_once(&item) {
                Ok((outputs, summary)) => {
                    return JobResult::success(
                        id,
                        outputs,
                        summary,
                        attempt,
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    warn!(job = %id, attempt, max_attempts = attempts, error = %e, "engine job failed");
                    last_error = e.to_string();
                }
            }
        }

        JobResult::failure(id, last_error, attempts, started.elapsed().as_secs_f64())
    }

    fn decline(&self, item: WorkItem) -> JobResult {
        JobResult::cancelled(item.id())
    }
}

/// Fans a case's job plan out over a bounded worker pool and collects the results.
///
/// Engine runs are gated by a [`SlotGate`]. Schedulers of concurrent cases share
/// one gate so the batch never runs more than `worker_count` engines at once.
pub struct SimulationScheduler {
    engine: Arc<dyn MonteCarloEngine>,
    settings: SchedulerSettings,
    shutdown: Arc<AtomicBool>,
    slots: SlotGate,
}

impl SimulationScheduler {
    pub fn new(
        engine: Arc<dyn MonteCarloEngine>,
        settings: SchedulerSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let slots = SlotGate::new(settings.worker_count);
        Self {
            engine,
            settings,
            shutdown,
            slots,
        }
    }

    /// Shares engine slots with other schedulers.
    pub fn with_slots(mut self, slots: SlotGate) -> Self {
        self.slots = slots;
        self
    }

    pub fn execute(
        &self,
        plan: &JobPlan,
        setup: &EngineSetup,
        output_dir: &Path,
        summaries_path: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<CompletionSet, CaseError> {
        let _span = info_span!("scheduler", jobs = plan.len(), workers = self.settings.worker_count)
            .entered();

        ensure_directory(output_dir)?;

        let mut completion = CompletionSet::default();
        let mut pending = Vec::new();

        let items = std::iter::once(WorkItem::Calibration(plan.calibration.clone()))
            .chain(plan.jobs.iter().cloned().map(WorkItem::Simulation));

        for item in items {
            let finals = window_files(output_dir, &item.output_stem());
            if self.settings.reuse_outputs && self.settings.validity.check_all(&finals).is_ok() {
                let res = output_dir.join(format!("{}.res", item.output_stem()));
                let summary = ResultSummary::read(&res).ok();
                completion.record(JobResult::reused(item.id(), finals, summary));
            } else {
                pending.push(item);
            }
        }

        info!(
            reused = completion.reused.len() + usize::from(completion.calibration.is_some()),
            pending = pending.len(),
            "simulation jobs planned"
        );

        if !pending.is_empty() {
            if self.shutdown.load(Ordering::Relaxed) {
                for item in pending {
                    completion.record(JobResult::cancelled(item.id()));
                }
            } else {
                self.engine
                    .prepare(setup)
                    .map_err(|source| CaseError::Tool {
                        stage: Stage::Simulation,
                        source,
                    })?;
                self.dispatch(pending, setup, output_dir, &mut completion, progress);
            }
        }

        write_json_atomic(summaries_path, &completion.summaries)?;

        Ok(completion)
    }

    fn dispatch(
        &self,
        pending: Vec<WorkItem>,
        setup: &EngineSetup,
        output_dir: &Path,
        completion: &mut CompletionSet,
        progress: &dyn ProgressReporter,
    ) {
        let handler = Arc::new(EngineJobHandler {
            engine: Arc::clone(&self.engine),
            slots: self.slots.clone(),
            shutdown: Arc::clone(&self.shutdown),
            work_dir: setup.work_dir.clone(),
            output_dir: output_dir.to_path_buf(),
            validity: self.settings.validity,
            max_retries: self.settings.max_retries,
        });
        let pool: WorkerPool<WorkItem, JobResult> = WorkerPool::new(
            handler,
            self.settings.worker_count,
            Arc::clone(&self.shutdown),
        );

        let mut submitted = 0;
        for item in pending {
            let id = item.id();
            match pool.submit(item) {
                Ok(()) => submitted += 1,
                Err(e) => {
                    debug!(job = %id, error = %e, "job not submitted");
                    completion.record(JobResult::cancelled(id));
                }
            }
        }

        for _ in 0..submitted {
            match pool.recv_result() {
                Some(result) => {
                    progress.report(ProgressEvent::JobFinished {
                        job: result.id.to_string(),
                        outcome: result.outcome.clone(),
                        attempts: result.attempts,
                    });
                    completion.record(result);
                }
                None => break,
            }
        }

        pool.wait();
    }
}
