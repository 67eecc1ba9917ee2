use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::aggregation::{
    write_projection, Aggregator, CalibrationFactor, EnergyWindowSet, FrameReport,
};
use crate::case::{Case, CaseIdentity, CaseLayout, CaseState, CtInputKind};
use crate::collaborator::{
    Collaborators, EngineSetup, KineticsRequest, LesionRequest, PreprocessingRequest,
    ReconstructionFrame, ReconstructionRequest,
};
use crate::config::RunMode;
use crate::error::{AggregationError, CaseError};
use crate::sanitize;
use crate::stage::{
    derive_state, FrameRecord, KineticsOutput, PreprocessingMetadata, Roi, Stage,
    StageContracts, StageResult,
};
use crate::storage::filesystem::{ensure_directory, write_json_atomic};
use crate::worker::job::{Geometry, SimulationParams};
use crate::worker::pool::SlotGate;
use crate::worker::scheduler::{CompletionSet, JobPlan, SchedulerSettings, SimulationScheduler};

use super::case_log::CaseLog;
use super::config::{PipelineConfig, LESION_ROI};
use super::context::CaseContext;
use super::progress::{ProgressEvent, ProgressReporter};

/// `provenance.json`, the terminal marker of a finalized case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    pub case_id: String,
    pub index: usize,
    pub source: String,
    pub mode: RunMode,
    pub state: CaseState,
    pub finalized_at: DateTime<Utc>,
    pub stages: Vec<StageResult>,
}

/// `failure.json`. Audit only: never read back when deriving state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub case_id: String,
    pub index: usize,
    pub stage: Option<Stage>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// `<prefix>_aggregation.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationReport {
    pub calibration: CalibrationFactor,
    pub frames: Vec<FrameReport>,
}

/// Final record of one case after `run_case`.
#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub case: Case,
    pub output_dir: PathBuf,
    pub results: Vec<StageResult>,
    /// The case failed because the disk filled up.
    pub disk_full: bool,
}

/// Drives cases through Preprocessing, PBPK, Simulation and Reconstruction.
///
/// Engine runs of every case share one pool of `worker_count` slots.
pub struct Orchestrator {
    config: Arc<PipelineConfig>,
    collaborators: Collaborators,
    shutdown: Arc<AtomicBool>,
    engine_slots: SlotGate,
}

impl Orchestrator {
    pub fn new(
        config: Arc<PipelineConfig>,
        collaborators: Collaborators,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let engine_slots = SlotGate::new(config.worker_count);
        Self {
            config,
            collaborators,
            shutdown,
            engine_slots,
        }
    }

    /// Production constructor: subprocess collaborators as configured.
    pub fn from_config(config: Arc<PipelineConfig>, shutdown: Arc<AtomicBool>) -> Self {
        let collaborators = Collaborators::from_config(&config);
        Self::new(config, collaborators, shutdown)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn layout_for(&self, case: &Case) -> CaseLayout {
        CaseLayout::new(
            &self.config.output_root,
            &self.config.title,
            case.index,
            &self.config.subdirs,
        )
    }

    pub fn context(&self, case: Case) -> CaseContext {
        let layout = self.layout_for(&case);
        CaseContext::new(case, layout)
    }

    /// Fails when the case folder was created for a different input.
    pub fn check_identity(&self, ctx: &CaseContext) -> Result<(), CaseError> {
        let Some(recorded) = CaseIdentity::recorded(&ctx.layout)? else {
            return Ok(());
        };
        let expected = CaseIdentity::of(&ctx.case);
        if recorded.same_input(&expected) {
            return Ok(());
        }
        Err(CaseError::ForeignCaseFolder {
            folder: sanitize::redact_path(ctx.layout.root()),
            expected: expected.source,
            found: recorded.source,
        })
    }

    /// Creates the case folders, the identity marker and the optional log
    /// file, CT copy and config snapshot.
    pub fn prepare_case(&self, ctx: &mut CaseContext) -> Result<(), CaseError> {
        self.check_identity(ctx)?;
        ctx.layout.create()?;
        CaseIdentity::of(&ctx.case).record(&ctx.layout)?;

        if self.config.logging_on && !ctx.log.is_enabled() {
            ctx.log = CaseLog::open(&ctx.layout.log_path())?;
        }
        ctx.log.info(&format!(
            "case {} ({}) started in {} mode",
            ctx.case.index,
            sanitize::redact_path(&ctx.case.source_path),
            self.config.mode
        ));

        if self.config.save_ct_scan && ctx.case.source_path.exists() {
            if ctx.layout.copy_ct_input(&ctx.case.source_path)? {
                debug!("copied CT input into case folder");
            }
        }

        if self.config.save_config {
            if let Some(path) = &self.config.config_path {
                ctx.layout.copy_config(path)?;
            }
        }

        Ok(())
    }

    /// Moves the case forward by at most one stage and returns the new state.
    ///
    /// In production the state is derived from the stage outputs on disk, so a
    /// finalized case is left untouched. In debug the in-memory state is used
    /// and every stage runs again.
    pub fn advance(
        &self,
        ctx: &mut CaseContext,
        progress: &dyn ProgressReporter,
    ) -> Result<CaseState, CaseError> {
        if ctx.case.state.is_terminal() {
            return Ok(ctx.case.state);
        }
        self.check_identity(ctx)?;

        let layout = ctx.layout.clone();
        let contracts = StageContracts::new(&layout, &self.config);
        let current = if self.config.mode.reuses_outputs() {
            derive_state(&contracts)
        } else {
            ctx.case.state
        };

        if current < ctx.observed {
            return Err(CaseError::StateRegression {
                from: ctx.observed.to_string(),
                to: current.to_string(),
            });
        }
        ctx.observed = current;
        ctx.case.state = current;

        self.record_reused(ctx, &contracts, current, progress);

        let stage = match current.next_stage() {
            Some(stage) => stage,
            None if current == CaseState::Reconstructed => {
                self.finalize(ctx)?;
                return Ok(ctx.case.state);
            }
            None => return Ok(current),
        };

        if self.shutdown.load(Ordering::Relaxed) {
            return Err(CaseError::Interrupted(stage));
        }

        let _step = info_span!("stage", name = stage.name()).entered();
        progress.report(ProgressEvent::StageStarted {
            index: ctx.case.index,
            stage,
        });
        ctx.log.info(&format!("{} stage started", stage));
        let started = Instant::now();

        self.run_stage(ctx, &contracts, stage, progress)?;

        let outputs = contracts
            .check(stage)
            .map_err(|reason| CaseError::InvalidOutputs { stage, reason })?;
        let elapsed = started.elapsed().as_secs_f64();

        info!(elapsed, "stage complete");
        ctx.log
            .info(&format!("{} stage finished in {:.1}s", stage, elapsed));
        progress.report(ProgressEvent::StageFinished {
            index: ctx.case.index,
            stage,
            skipped: false,
            elapsed_secs: elapsed,
        });

        ctx.record(StageResult::completed(stage, outputs, elapsed));
        ctx.case.state = stage.produces();
        ctx.observed = ctx.case.state;
        Ok(ctx.case.state)
    }

    /// Runs a case until it is finalized or failed. Never panics on a case error;
    /// the failure is recorded on the case and in `failure.json`.
    pub fn run_case(&self, case: Case, progress: &dyn ProgressReporter) -> CaseOutcome {
        let _case_span = info_span!("case",
            index = case.index,
            id = %case.id,
            source_hash = %sanitize::hash_path(&case.source_path),
        )
        .entered();

        progress.report(ProgressEvent::CaseStarted {
            index: case.index,
            id: case.id.clone(),
        });

        let mut ctx = self.context(case);
        let mut disk_full = false;

        match self.drive(&mut ctx, progress) {
            Ok(state) => {
                ctx.log.info(&format!("case finished in state {}", state));
                progress.report(ProgressEvent::CaseFinished {
                    index: ctx.case.index,
                    state,
                });
            }
            Err(e) => {
                disk_full = e.is_disk_full();
                self.fail_case(&mut ctx, &e);
                progress.report(ProgressEvent::CaseFailed {
                    index: ctx.case.index,
                    error: e.to_string(),
                });
            }
        }

        CaseOutcome {
            output_dir: ctx.layout.root().to_path_buf(),
            results: ctx.results,
            case: ctx.case,
            disk_full,
        }
    }

    fn drive(
        &self,
        ctx: &mut CaseContext,
        progress: &dyn ProgressReporter,
    ) -> Result<CaseState, CaseError> {
        self.check_identity(ctx)?;
        // Re-running a finalized case must not modify its folder.
        if !self.is_settled(ctx) {
            self.prepare_case(ctx)?;
        }
        loop {
            let state = self.advance(ctx, progress)?;
            if state.is_terminal() {
                return Ok(state);
            }
        }
    }

    fn is_settled(&self, ctx: &CaseContext) -> bool {
        self.config.mode.reuses_outputs()
            && derive_state(&StageContracts::new(&ctx.layout, &self.config)) == CaseState::Finalized
    }

    fn fail_case(&self, ctx: &mut CaseContext, error: &CaseError) {
        let reason = sanitize::redact_in_text(&error.to_string(), &ctx.case.source_path);
        let stage = ctx.case.state.next_stage();

        warn!(error = %reason, "case failed");
        ctx.log.error(&reason);

        if let Some(stage) = stage {
            ctx.record(StageResult::failed(stage, reason.clone(), 0.0));
        }

        let record = FailureRecord {
            case_id: ctx.case.id.clone(),
            index: ctx.case.index,
            stage,
            reason: reason.clone(),
            failed_at: Utc::now(),
        };
        if ctx.layout.root().exists() && !error.is_foreign_folder() {
            if let Err(e) = write_json_atomic(&ctx.layout.failure_path(), &record) {
                warn!(error = %e, "failed to write failure record");
            }
        }

        ctx.case.mark_failed(reason);
    }

    /// Adds `skipped` results for stages whose outputs were already valid.
    fn record_reused(
        &self,
        ctx: &mut CaseContext,
        contracts: &StageContracts<'_>,
        current: CaseState,
        progress: &dyn ProgressReporter,
    ) {
        for stage in Stage::ALL {
            if stage.produces() > current || ctx.has_result(stage) {
                continue;
            }
            info!(stage = %stage, "valid outputs found, skipping stage");
            ctx.log
                .info(&format!("{} stage skipped: valid outputs found", stage));
            progress.report(ProgressEvent::StageFinished {
                index: ctx.case.index,
                stage,
                skipped: true,
                elapsed_secs: 0.0,
            });
            ctx.record(StageResult::reused(stage, contracts.terminal_outputs(stage)));
        }
    }

    fn finalize(&self, ctx: &mut CaseContext) -> Result<(), CaseError> {
        let provenance = Provenance {
            case_id: ctx.case.id.clone(),
            index: ctx.case.index,
            source: sanitize::redact_path(&ctx.case.source_path),
            mode: self.config.mode,
            state: CaseState::Finalized,
            finalized_at: Utc::now(),
            stages: ctx.results.clone(),
        };
        write_json_atomic(&ctx.layout.provenance_path(), &provenance)?;

        ctx.case.state = CaseState::Finalized;
        ctx.observed = CaseState::Finalized;
        Ok(())
    }

    fn run_stage(
        &self,
        ctx: &mut CaseContext,
        contracts: &StageContracts<'_>,
        stage: Stage,
        progress: &dyn ProgressReporter,
    ) -> Result<(), CaseError> {
        match stage {
            Stage::Preprocessing => self.step_preprocess(ctx, contracts),
            Stage::Pbpk => self.step_kinetics(ctx, contracts),
            Stage::Simulation => self.step_simulate(ctx, contracts, progress),
            Stage::Reconstruction => self.step_reconstruct(ctx, contracts),
        }
    }

    fn step_preprocess(
        &self,
        ctx: &mut CaseContext,
        contracts: &StageContracts<'_>,
    ) -> Result<(), CaseError> {
        let stage = Stage::Preprocessing;
        if let CtInputKind::Unsupported(reason) = &ctx.case.input_kind {
            return Err(CaseError::InvalidInput {
                path: ctx.case.source_path.clone(),
                reason: reason.clone(),
            });
        }
        if !ctx.case.source_path.exists() {
            return Err(CaseError::InvalidInput {
                path: ctx.case.source_path.clone(),
                reason: "input no longer exists".to_string(),
            });
        }

        let request = PreprocessingRequest {
            case_id: ctx.case.id.clone(),
            ct_input: ctx.case.source_path.clone(),
            input_kind: ctx.case.input_kind.clone(),
            output_dir: ctx.layout.stage_dir(stage).to_path_buf(),
            metadata_file: contracts.metadata_path(),
            name: self.config.preprocessing.name.clone(),
            roi_subset: self.config.preprocessing.roi_subset.clone(),
            resize: self.config.preprocessing.resize,
        };
        self.collaborators
            .preprocessor
            .preprocess(&request)
            .map_err(|source| CaseError::Tool { stage, source })?;

        self.validate_metadata(contracts, &self.config.preprocessing.roi_subset)?;

        if self.config.lesions.is_some() {
            self.insert_lesions(ctx, contracts)?;
            self.validate_metadata(contracts, &self.config.roi_subset())?;
        }
        Ok(())
    }

    fn validate_metadata(
        &self,
        contracts: &StageContracts<'_>,
        roi_subset: &[String],
    ) -> Result<(), CaseError> {
        let stage = Stage::Preprocessing;
        let metadata = contracts
            .load_metadata()
            .map_err(|e| CaseError::InvalidOutputs {
                stage,
                reason: e.to_string(),
            })?;
        metadata
            .validate(roi_subset)
            .map_err(|reason| CaseError::InvalidOutputs { stage, reason })
    }

    /// Runs the lesion tool on the segmented case. It rewrites the label map and
    /// metadata record so the lesion becomes one more ROI.
    fn insert_lesions(
        &self,
        ctx: &mut CaseContext,
        contracts: &StageContracts<'_>,
    ) -> Result<(), CaseError> {
        let stage = Stage::Preprocessing;
        let (Some(lesions), Some(output_dir), Some(record_file)) = (
            self.config.lesions.as_ref(),
            contracts.lesion_dir(),
            contracts.lesion_record_path(),
        ) else {
            return Ok(());
        };
        ensure_directory(&output_dir)?;

        let _step = info_span!("synthetic_lesions", name = %lesions.name).entered();
        ctx.log.info("inserting synthetic lesions");

        let request = LesionRequest {
            case_id: ctx.case.id.clone(),
            output_dir,
            metadata_file: contracts.metadata_path(),
            lesion_roi: LESION_ROI.to_string(),
            specs: lesions.specs.clone().unwrap_or_default(),
            record_file,
        };
        self.collaborators
            .lesions
            .insert(&request)
            .map_err(|source| CaseError::Tool { stage, source })?;

        info!(organs = request.specs.len(), "synthetic lesions inserted");
        Ok(())
    }

    fn step_kinetics(
        &self,
        ctx: &CaseContext,
        contracts: &StageContracts<'_>,
    ) -> Result<(), CaseError> {
        let stage = Stage::Pbpk;
        let metadata = self.load_metadata(contracts)?;
        let rois = self.selected_rois(&metadata);

        let request = KineticsRequest {
            case_id: ctx.case.id.clone(),
            output_dir: ctx.layout.stage_dir(stage).to_path_buf(),
            output_file: contracts.kinetics_path(),
            name: self.config.pbpk.name.clone(),
            preprocessing_metadata: contracts.metadata_path(),
            vois: self.config.pbpk.vois.clone(),
            rois: rois.clone(),
            frames: self
                .config
                .frames
                .iter()
                .map(|f| FrameRecord {
                    start_min: f.start_min,
                    duration_min: f.duration_min,
                })
                .collect(),
        };
        self.collaborators
            .kinetics
            .solve(&request)
            .map_err(|source| CaseError::Tool { stage, source })?;

        let kinetics = contracts
            .load_kinetics()
            .map_err(|e| CaseError::InvalidOutputs {
                stage,
                reason: e.to_string(),
            })?;
        kinetics
            .validate(&self.config.frames, &rois)
            .map_err(CaseError::Contract)
    }

    fn step_simulate(
        &self,
        ctx: &mut CaseContext,
        contracts: &StageContracts<'_>,
        progress: &dyn ProgressReporter,
    ) -> Result<(), CaseError> {
        let metadata = self.load_metadata(contracts)?;
        let kinetics = self.load_kinetics(contracts)?;
        let roi_names = self.selected_rois(&metadata);
        kinetics
            .validate(&self.config.frames, &roi_names)
            .map_err(CaseError::Contract)?;

        let rois: Vec<Roi> = kinetics
            .rois_for(&metadata)
            .into_iter()
            .filter(|r| roi_names.contains(&r.name))
            .collect();

        let params = Arc::new(SimulationParams::from_config(&self.config.simulation));
        let plan = JobPlan::build(
            &rois,
            &self.config.frames,
            &kinetics.total_activity_mbq,
            &metadata.attenuation_map,
            Geometry::from_metadata(&metadata),
            Arc::clone(&params),
        );
        info!(
            rois = rois.len(),
            frames = self.config.frames.len(),
            jobs = plan.len(),
            "simulation job set expanded"
        );
        ctx.log.info(&format!(
            "dispatching {} simulation jobs on {} workers",
            plan.len(),
            self.config.worker_count
        ));

        let scheduler = SimulationScheduler::new(
            Arc::clone(&self.collaborators.engine),
            SchedulerSettings {
                worker_count: self.config.worker_count,
                max_retries: self.config.simulation.max_job_retries,
                validity: self.config.validity,
                reuse_outputs: self.config.mode.reuses_outputs(),
            },
            Arc::clone(&self.shutdown),
        )
        .with_slots(self.engine_slots.clone());
        let setup = EngineSetup {
            work_dir: ctx.layout.work_dir(),
            attenuation_map: metadata.attenuation_map.clone(),
            params,
        };
        let completion = scheduler.execute(
            &plan,
            &setup,
            ctx.layout.stage_dir(Stage::Simulation),
            &contracts.job_summaries_path(),
            progress,
        )?;

        // Failed jobs outrank cancelled ones.
        let failed = completion.failed.len() + usize::from(completion.calibration_failure.is_some());
        if failed > 0 {
            return Err(CaseError::JobsFailed {
                failed,
                detail: completion.failure_detail(),
            });
        }
        if !completion.cancelled.is_empty() || completion.calibration.is_none() {
            return Err(CaseError::JobsCancelled(
                completion.cancelled.len() + usize::from(completion.calibration.is_none()),
            ));
        }

        self.aggregate_and_calibrate(contracts, &completion, &roi_names)
    }

    fn aggregate_and_calibrate(
        &self,
        contracts: &StageContracts<'_>,
        completion: &CompletionSet,
        roi_names: &[String],
    ) -> Result<(), CaseError> {
        let calibration_outputs = completion
            .calibration
            .as_ref()
            .ok_or(AggregationError::CalibrationMissing)?;
        let reference = EnergyWindowSet::read(calibration_outputs).map_err(AggregationError::Io)?;
        let factor = CalibrationFactor::from_reference(
            &reference,
            self.config.simulation.calibration_activity_mbq,
        )?;
        write_json_atomic(&contracts.calibration_path(), &factor)?;

        let aggregator = Aggregator::new(roi_names);
        let output_dir = contracts.layout().stage_dir(Stage::Simulation);
        let mut frames = Vec::with_capacity(self.config.frames.len());

        for frame in &self.config.frames {
            let inputs = completion.frame_inputs(frame, roi_names)?;
            let contributions = inputs
                .iter()
                .map(|(roi, paths)| EnergyWindowSet::read(paths).map(|set| (roi.clone(), set)))
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map_err(AggregationError::Io)?;

            let aggregated = aggregator.aggregate(frame, &contributions)?;
            aggregated
                .to_window_set()
                .write(output_dir, &contracts.frame_stem(frame))
                .map_err(AggregationError::Io)?;

            let calibrated = factor.apply(&aggregated)?;
            write_projection(&contracts.calibrated_path(frame), &calibrated)
                .map_err(AggregationError::Io)?;

            debug!(frame = %frame.label(), scatter = ?aggregated.scatter_ratio, "frame aggregated");
            frames.push(aggregated.report());
        }

        write_json_atomic(
            &contracts.aggregation_report_path(),
            &AggregationReport {
                calibration: factor,
                frames,
            },
        )?;
        Ok(())
    }

    fn step_reconstruct(
        &self,
        ctx: &CaseContext,
        contracts: &StageContracts<'_>,
    ) -> Result<(), CaseError> {
        let stage = Stage::Reconstruction;
        let metadata = self.load_metadata(contracts)?;

        let frames = self
            .config
            .frames
            .iter()
            .map(|frame| ReconstructionFrame {
                label: frame.label(),
                start_min: frame.start_min,
                duration_min: frame.duration_min,
                windows: contracts.frame_window_paths(frame),
                calibrated_photopeak: contracts.calibrated_path(frame),
                output: contracts.reconstruction_path(frame),
            })
            .collect();

        let request = ReconstructionRequest {
            case_id: ctx.case.id.clone(),
            output_dir: ctx.layout.stage_dir(stage).to_path_buf(),
            attenuation_map: metadata.attenuation_map,
            attenuation_output: contracts.reconstruction_attenuation_path(),
            frames,
            iterations: self.config.simulation.iterations,
            subsets: self.config.simulation.subsets,
            params: SimulationParams::from_config(&self.config.simulation),
        };
        self.collaborators
            .reconstructor
            .reconstruct(&request)
            .map_err(|source| CaseError::Tool { stage, source })
    }

    fn load_metadata(
        &self,
        contracts: &StageContracts<'_>,
    ) -> Result<PreprocessingMetadata, CaseError> {
        contracts
            .load_metadata()
            .map_err(|e| CaseError::Contract(format!("preprocessing metadata unreadable: {}", e)))
    }

    fn load_kinetics(&self, contracts: &StageContracts<'_>) -> Result<KineticsOutput, CaseError> {
        contracts
            .load_kinetics()
            .map_err(|e| CaseError::Contract(format!("PBPK output unreadable: {}", e)))
    }

    /// ROIs carried through PBPK and simulation: the configured subset, or
    /// every segmented ROI when the subset is empty.
    fn selected_rois(&self, metadata: &PreprocessingMetadata) -> Vec<String> {
        let subset = self.config.roi_subset();
        metadata
            .roi_names()
            .into_iter()
            .filter(|name| subset.is_empty() || subset.contains(name))
            .collect()
    }
}
