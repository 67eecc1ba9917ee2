//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` struct provides a complete isolated environment:
//! - Temporary directories for CT input, case output and config
//! - Fake collaborators that write well-formed stage outputs
//! - Orchestrator and batch runner construction from a `Config`

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use tdt::aggregation::write_projection;
use tdt::case::{Case, CaseScanner};
use tdt::collaborator::{
    Collaborators, EngineSetup, KineticsRequest, KineticsSolver, LesionGenerator, LesionRequest,
    MonteCarloEngine, PreprocessingRequest, Preprocessor, ReconstructionRequest, Reconstructor,
};
use tdt::config::Config;
use tdt::error::{StorageError, ToolError};
use tdt::pipeline::{BatchRunner, NoopProgress, Orchestrator, PipelineConfig, RunOptions};
use tdt::stage::{FrameRecord, KineticsOutput, PreprocessingMetadata, RoiKinetics, RoiLabel};
use tdt::storage::{ensure_directory, read_json, write_json_atomic};
use tdt::worker::WorkItem;

/// Voxels per fake projection.
pub const PIXELS: usize = 8;

fn tool_failure(program: &str, detail: &str) -> ToolError {
    ToolError::NonZeroExit {
        program: program.to_string(),
        status: "exit status: 1".to_string(),
        detail: detail.to_string(),
    }
}

/// Writes a segmentation record with the given ROIs plus an attenuation map
/// and label map.
pub struct FakePreprocessor {
    pub rois: Vec<String>,
    pub calls: AtomicUsize,
    pub fail: bool,
}

impl FakePreprocessor {
    pub fn new(rois: &[&str]) -> Self {
        Self {
            rois: rois.iter().map(|r| r.to_string()).collect(),
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Preprocessor for FakePreprocessor {
    fn preprocess(&self, request: &PreprocessingRequest) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(tool_failure("tdt-preprocess", "segmentation failed"));
        }

        write_projection(&request.output_dir.join("tdt_atn_av.bin"), &[0.15; 16])?;
        write_projection(&request.output_dir.join("tdt_roi_labels.bin"), &[1.0; 16])?;

        let metadata = PreprocessingMetadata {
            rois: self
                .rois
                .iter()
                .enumerate()
                .map(|(i, name)| RoiLabel {
                    name: name.clone(),
                    label: i as u32 + 1,
                })
                .collect(),
            shape: [4, 2, 2],
            spacing_cm: [0.5, 0.4, 0.4],
            attenuation_map: PathBuf::from("tdt_atn_av.bin"),
            roi_label_map: PathBuf::from("tdt_roi_labels.bin"),
        };
        write_json_atomic(&request.metadata_file, &metadata)?;
        Ok(())
    }
}

/// Adds the lesion ROI to the segmentation record and writes the lesion record.
pub struct FakeLesionGenerator {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<LesionRequest>>,
}

impl FakeLesionGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl LesionGenerator for FakeLesionGenerator {
    fn insert(&self, request: &LesionRequest) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut metadata: PreprocessingMetadata = read_json(&request.metadata_file)?;
        let label = metadata.rois.iter().map(|r| r.label).max().unwrap_or(0) + 1;
        metadata.rois.push(RoiLabel {
            name: request.lesion_roi.clone(),
            label,
        });
        write_json_atomic(&request.metadata_file, &metadata)?;
        write_json_atomic(&request.record_file, &request.specs)?;

        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Writes per-ROI activity maps and the kinetics record for the requested frames.
pub struct FakeKineticsSolver {
    pub calls: AtomicUsize,
    /// Activity in MBq per ROI; every frame gets the same value. Missing ROIs get 1.0.
    pub activity: HashMap<String, f64>,
    /// Frames written instead of the requested ones.
    pub frames_override: Option<Vec<FrameRecord>>,
    pub fail: bool,
}

impl FakeKineticsSolver {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            activity: HashMap::new(),
            frames_override: None,
            fail: false,
        }
    }

    pub fn with_activity(mut self, roi: &str, mbq: f64) -> Self {
        self.activity.insert(roi.to_string(), mbq);
        self
    }

    pub fn with_frames(mut self, frames: &[(f64, f64)]) -> Self {
        self.frames_override = Some(
            frames
                .iter()
                .map(|(start, duration)| FrameRecord {
                    start_min: *start,
                    duration_min: *duration,
                })
                .collect(),
        );
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl KineticsSolver for FakeKineticsSolver {
    fn solve(&self, request: &KineticsRequest) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(tool_failure("tdt-pbpk", "solver diverged"));
        }

        let frames = self
            .frames_override
            .clone()
            .unwrap_or_else(|| request.frames.clone());
        let mut rois = Vec::new();
        let mut totals = vec![0.0; frames.len()];

        for roi in &request.rois {
            let mbq = self.activity.get(roi).copied().unwrap_or(1.0);
            let mut maps = Vec::new();
            for (i, frame) in frames.iter().enumerate() {
                let name = format!("{}_{}min.bin", roi, frame.start_min);
                write_projection(&request.output_dir.join(&name), &[mbq as f32; 16])?;
                maps.push(PathBuf::from(name));
                totals[i] += mbq;
            }
            rois.push(RoiKinetics {
                name: roi.clone(),
                activity_mbq: vec![mbq; frames.len()],
                activity_maps: maps,
            });
        }

        let output = KineticsOutput {
            frames,
            rois,
            total_activity_mbq: totals,
        };
        write_json_atomic(&request.output_file, &output)?;
        Ok(())
    }
}

/// Stand-in for SIMIND. Each run writes three `PIXELS`-long windows whose
/// photopeak value is the job's photon scale (1.0 for calibration), with the
/// lower window at a quarter and the upper at half of it.
pub struct FakeEngine {
    pub runs: AtomicUsize,
    pub prepares: AtomicUsize,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub stems: Mutex<Vec<String>>,
    attempts: Mutex<BTreeMap<String, usize>>,
    delay: Duration,
    /// Every run whose work dir or stem contains this marker fails.
    fail_marker: Option<String>,
    /// Each stem fails this many times before succeeding.
    fail_first: usize,
    /// Leave out the upper window.
    drop_upper: bool,
    /// Raised when a marker failure happens, as a Ctrl-C would.
    trip_on_failure: Option<Arc<AtomicBool>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            runs: AtomicUsize::new(0),
            prepares: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            stems: Mutex::new(Vec::new()),
            attempts: Mutex::new(BTreeMap::new()),
            delay: Duration::ZERO,
            fail_marker: None,
            fail_first: 0,
            drop_upper: false,
            trip_on_failure: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_when(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn failing_first(mut self, attempts: usize) -> Self {
        self.fail_first = attempts;
        self
    }

    /// Sets `shutdown` whenever a `failing_when` marker failure happens.
    pub fn tripping_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.trip_on_failure = Some(shutdown);
        self
    }

    pub fn dropping_upper_window(mut self) -> Self {
        self.drop_upper = true;
        self
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn simulation_runs(&self) -> usize {
        self.stems
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.as_str() != "calib")
            .count()
    }

    fn produce(&self, item: &WorkItem, work_dir: &Path) -> Result<(), ToolError> {
        let stem = item.output_stem();

        if let Some(marker) = &self.fail_marker {
            if work_dir.to_string_lossy().contains(marker.as_str()) || stem.contains(marker.as_str())
            {
                if let Some(shutdown) = &self.trip_on_failure {
                    shutdown.store(true, Ordering::SeqCst);
                }
                return Err(tool_failure("simind", "photon transport aborted"));
            }
        }

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(stem.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if attempt <= self.fail_first {
            return Err(tool_failure("simind", "transient failure"));
        }

        let value = match item {
            WorkItem::Simulation(job) => job.photon_scale as f32,
            WorkItem::Calibration(_) => 1.0,
        };

        write_projection(
            &work_dir.join(format!("{}_tot_w1.a00", stem)),
            &[value * 0.25; PIXELS],
        )?;
        write_projection(
            &work_dir.join(format!("{}_tot_w2.a00", stem)),
            &[value; PIXELS],
        )?;
        if !self.drop_upper {
            write_projection(
                &work_dir.join(format!("{}_tot_w3.a00", stem)),
                &[value * 0.5; PIXELS],
            )?;
        }
        let res = work_dir.join(format!("{}.res", stem));
        std::fs::write(
            &res,
            "Sensitivity Cps/MBq : 12.5\nScatter/Total : 0.31\nDetector hits : 4200\n",
        )
        .map_err(|e| StorageError::WriteFile {
            path: res.clone(),
            source: e,
        })?;

        Ok(())
    }
}

impl MonteCarloEngine for FakeEngine {
    fn prepare(&self, setup: &EngineSetup) -> Result<(), ToolError> {
        self.prepares.fetch_add(1, Ordering::SeqCst);
        ensure_directory(&setup.work_dir)?;
        Ok(())
    }

    fn run(&self, item: &WorkItem, work_dir: &Path) -> Result<(), ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.stems.lock().unwrap().push(item.output_stem());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        let result = self.produce(item, work_dir);
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Writes one non-empty volume per frame plus the attenuation image.
pub struct FakeReconstructor {
    pub calls: AtomicUsize,
    pub requests: Mutex<Vec<ReconstructionRequest>>,
}

impl FakeReconstructor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl Reconstructor for FakeReconstructor {
    fn reconstruct(&self, request: &ReconstructionRequest) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for frame in &request.frames {
            if !frame.calibrated_photopeak.exists() {
                return Err(ToolError::MissingOutput(frame.calibrated_photopeak.clone()));
            }
            write_json_atomic(&frame.output, &frame.label)?;
        }
        write_json_atomic(&request.attenuation_output, &"attenuation")?;
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }
}

/// Handles to the fakes behind a `Collaborators` set, for call-count assertions.
pub struct Fakes {
    pub preprocessor: Arc<FakePreprocessor>,
    pub lesions: Arc<FakeLesionGenerator>,
    pub kinetics: Arc<FakeKineticsSolver>,
    pub engine: Arc<FakeEngine>,
    pub reconstructor: Arc<FakeReconstructor>,
}

impl Fakes {
    pub fn new(rois: &[&str]) -> Self {
        Self::with(
            FakePreprocessor::new(rois),
            FakeKineticsSolver::new(),
            FakeEngine::new(),
        )
    }

    pub fn with(
        preprocessor: FakePreprocessor,
        kinetics: FakeKineticsSolver,
        engine: FakeEngine,
    ) -> Self {
        Self {
            preprocessor: Arc::new(preprocessor),
            lesions: Arc::new(FakeLesionGenerator::new()),
            kinetics: Arc::new(kinetics),
            engine: Arc::new(engine),
            reconstructor: Arc::new(FakeReconstructor::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            preprocessor: self.preprocessor.clone(),
            lesions: self.lesions.clone(),
            kinetics: self.kinetics.clone(),
            engine: self.engine.clone(),
            reconstructor: self.reconstructor.clone(),
        }
    }

    pub fn preprocess_calls(&self) -> usize {
        self.preprocessor.calls.load(Ordering::SeqCst)
    }

    pub fn lesion_calls(&self) -> usize {
        self.lesions.calls.load(Ordering::SeqCst)
    }

    pub fn kinetics_calls(&self) -> usize {
        self.kinetics.calls.load(Ordering::SeqCst)
    }

    pub fn reconstruct_calls(&self) -> usize {
        self.reconstructor.calls.load(Ordering::SeqCst)
    }
}

/// Test harness providing an isolated execution environment.
pub struct TestHarness {
    /// Temporary directory containing input/output/config subdirectories.
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config_dir: PathBuf,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let input_dir = base.join("ct");
        let output_dir = base.join("output");
        let config_dir = base.join("config");

        std::fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");
        std::fs::create_dir_all(&config_dir).expect("Failed to create config dir");

        Self {
            temp_dir,
            input_dir,
            output_dir,
            config_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a single-volume CT input.
    pub fn write_volume(&self, filename: &str) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, b"NIFTI-VOLUME").expect("Failed to write CT volume");
        path
    }

    /// Write a DICOM-series directory with a few slices.
    pub fn write_series(&self, dirname: &str) -> PathBuf {
        let path = self.input_dir.join(dirname);
        std::fs::create_dir_all(&path).expect("Failed to create series dir");
        for i in 0..3 {
            std::fs::write(path.join(format!("slice_{:03}.dcm", i)), b"DICM")
                .expect("Failed to write slice");
        }
        path
    }

    pub fn write_config(&self, filename: &str, config: &Config) -> PathBuf {
        let path = self.config_dir.join(filename);
        let json = serde_json::to_string_pretty(config).expect("Failed to serialize config");
        std::fs::write(&path, json).expect("Failed to write config file");
        path
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            output_root: Some(self.output_dir.clone()),
            ..RunOptions::default()
        }
    }

    pub fn pipeline_config(&self, config: &Config, options: RunOptions) -> Arc<PipelineConfig> {
        Arc::new(PipelineConfig::from_config(config, options).expect("pipeline config"))
    }

    pub fn orchestrator(&self, config: &Config, fakes: &Fakes) -> Orchestrator {
        self.orchestrator_with(config, self.options(), fakes, Arc::new(AtomicBool::new(false)))
    }

    pub fn orchestrator_with(
        &self,
        config: &Config,
        options: RunOptions,
        fakes: &Fakes,
        shutdown: Arc<AtomicBool>,
    ) -> Orchestrator {
        Orchestrator::new(
            self.pipeline_config(config, options),
            fakes.collaborators(),
            shutdown,
        )
    }

    pub fn batch_runner(&self, config: &Config, fakes: &Fakes) -> BatchRunner {
        let shutdown = Arc::new(AtomicBool::new(false));
        let orchestrator = self.orchestrator_with(config, self.options(), fakes, shutdown.clone());
        BatchRunner::new(Arc::new(orchestrator), Arc::new(NoopProgress), shutdown)
    }

    pub fn scan(&self) -> Vec<Case> {
        CaseScanner::new(&self.input_dir).scan().expect("scan input")
    }

    /// Case root for case `index` under the default `tdt` title.
    pub fn case_dir(&self, title: &str, index: usize) -> PathBuf {
        self.output_dir.join(format!("{}_CT_{}", title, index))
    }

    /// Every file under `dir` with its modification time, sorted by path.
    pub fn snapshot(&self, dir: &Path) -> Vec<(PathBuf, std::time::SystemTime, u64)> {
        let mut files: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                let meta = e.metadata().expect("metadata");
                (
                    e.path().to_path_buf(),
                    meta.modified().expect("mtime"),
                    meta.len(),
                )
            })
            .collect();
        files.sort();
        files
    }
}
