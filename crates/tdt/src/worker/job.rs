use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collaborator::ResultSummary;
use crate::config::SimulationConfig;
use crate::stage::{PreprocessingMetadata, TimeFrame};

/// Engine parameters shared by every job of a case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationParams {
    /// Output file prefix.
    pub prefix: String,
    pub collimator: String,
    pub isotope: String,
    pub num_photons: f64,
    pub num_projections: u32,
    pub energy_window_width: f64,
    pub detector_distance: f64,
    pub detector_width: f64,
    /// Zero means "use the CT axial length".
    pub detector_length: f64,
    pub output_img_size: u32,
    pub output_pixel_width: f64,
    pub output_slice_width: f64,
}

impl SimulationParams {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            prefix: config.name.clone(),
            collimator: config.collimator.clone(),
            isotope: config.isotope.clone(),
            num_photons: config.num_photons,
            num_projections: config.num_projections,
            energy_window_width: config.energy_window_width,
            detector_distance: config.detector_distance,
            detector_width: config.detector_width,
            detector_length: config.detector_length,
            output_img_size: config.output_img_size,
            output_pixel_width: config.output_pixel_width,
            output_slice_width: config.output_slice_width,
        }
    }
}

/// Phantom geometry from the preprocessing metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Geometry {
    /// `[z, y, x]` voxels.
    pub shape: [usize; 3],
    /// `[z, y, x]` cm.
    pub spacing_cm: [f64; 3],
}

impl Geometry {
    pub fn from_metadata(metadata: &PreprocessingMetadata) -> Self {
        Self {
            shape: metadata.shape,
            spacing_cm: metadata.spacing_cm,
        }
    }

    pub fn slice_width_cm(&self) -> f64 {
        self.spacing_cm[0]
    }

    pub fn pixel_width_cm(&self) -> f64 {
        self.spacing_cm[1]
    }

    pub fn axial_length_cm(&self) -> f64 {
        self.slice_width_cm() * self.shape[0] as f64
    }

    pub fn half_length_cm(&self) -> f64 {
        self.axial_length_cm() / 2.0
    }

    /// Number of output slices covering the phantom.
    pub fn output_length(&self, params: &SimulationParams) -> f64 {
        self.axial_length_cm() / params.output_slice_width
    }

    pub fn detector_length_cm(&self, params: &SimulationParams) -> f64 {
        if params.detector_length == 0.0 {
            self.axial_length_cm()
        } else {
            params.detector_length
        }
    }
}

/// Identity of a simulation job: one ROI at one frame.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub roi: String,
    pub frame: usize,
    pub frame_label: String,
}

impl JobKey {
    pub fn new(roi: &str, frame: &TimeFrame) -> Self {
        Self {
            roi: roi.to_string(),
            frame: frame.index,
            frame_label: frame.label(),
        }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.roi, self.frame_label)
    }
}

#[derive(Debug, Clone)]
pub struct SimulationJob {
    pub key: JobKey,
    pub frame: TimeFrame,
    pub activity_map: PathBuf,
    pub attenuation_map: PathBuf,
    pub geometry: Geometry,
    pub params: Arc<SimulationParams>,
    /// Photon count handed to the engine (`/nn`).
    pub photon_scale: f64,
    pub seed: u64,
}

impl SimulationJob {
    pub fn output_stem(&self) -> String {
        format!(
            "{}_{}_{}",
            self.params.prefix, self.key.roi, self.key.frame_label
        )
    }
}

/// Reference simulation with a known activity; no ROI or frame dimension.
#[derive(Debug, Clone)]
pub struct CalibrationJob {
    pub params: Arc<SimulationParams>,
}

pub const CALIBRATION_STEM: &str = "calib";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkId {
    Job(JobKey),
    Calibration,
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkId::Job(key) => key.fmt(f),
            WorkId::Calibration => f.write_str("calibration"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum WorkItem {
    Simulation(SimulationJob),
    Calibration(CalibrationJob),
}

impl WorkItem {
    pub fn id(&self) -> WorkId {
        match self {
            WorkItem::Simulation(job) => WorkId::Job(job.key.clone()),
            WorkItem::Calibration(_) => WorkId::Calibration,
        }
    }

    /// Stem of the engine's output files, identical in the work and output directories.
    pub fn output_stem(&self) -> String {
        match self {
            WorkItem::Simulation(job) => job.output_stem(),
            WorkItem::Calibration(_) => CALIBRATION_STEM.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    /// Valid outputs from an earlier run were kept.
    Reused,
    Failed(String),
    /// Declined before launch because of a shutdown request.
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobResult {
    pub id: WorkId,
    pub outcome: JobOutcome,
    pub attempts: u32,
    pub outputs: Option<[PathBuf; 3]>,
    pub summary: Option<ResultSummary>,
    pub elapsed_secs: f64,
}

impl JobResult {
    pub fn success(
        id: WorkId,
        outputs: [PathBuf; 3],
        summary: Option<ResultSummary>,
        attempts: u32,
        elapsed_secs: f64,
    ) -> Self {
        Self {
            id,
            outcome: JobOutcome::Completed,
            attempts,
            outputs: Some(outputs),
            summary,
            elapsed_secs,
        }
    }

    pub fn reused(id: WorkId, outputs: [PathBuf; 3], summary: Option<ResultSummary>) -> Self {
        Self {
            id,
            outcome: JobOutcome::Reused,
            attempts: 0,
            outputs: Some(outputs),
            summary,
            elapsed_secs: 0.0,
        }
    }

    pub fn failure(id: WorkId, error: String, attempts: u32, elapsed_secs: f64) -> Self {
        Self {
            id,
            outcome: JobOutcome::Failed(error),
            attempts,
            outputs: None,
            summary: None,
            elapsed_secs,
        }
    }

    pub fn cancelled(id: WorkId) -> Self {
        Self {
            id,
            outcome: JobOutcome::Cancelled,
            attempts: 0,
            outputs: None,
            summary: None,
            elapsed_secs: 0.0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed | JobOutcome::Reused)
    }
}
