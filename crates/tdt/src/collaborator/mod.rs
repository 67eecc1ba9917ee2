//! Interfaces to the external programs the orchestrator drives.

pub mod command;
pub mod result_summary;
pub mod simind;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::case::CtInputKind;
use crate::error::ToolError;
use crate::pipeline::PipelineConfig;
use crate::stage::FrameRecord;
use crate::worker::job::{SimulationParams, WorkItem};

pub use command::{
    CommandKineticsSolver, CommandLesionGenerator, CommandPreprocessor, CommandReconstructor,
    ExternalCommand,
};
pub use result_summary::ResultSummary;
pub use simind::SimindEngine;

/// Segmentation and attenuation-map preparation for one CT input.
#[derive(Debug, Clone, Serialize)]
pub struct PreprocessingRequest {
    pub case_id: String,
    pub ct_input: PathBuf,
    pub input_kind: CtInputKind,
    pub output_dir: PathBuf,
    /// File the collaborator must write its metadata record to.
    pub metadata_file: PathBuf,
    pub name: String,
    pub roi_subset: Vec<String>,
    pub resize: Option<u32>,
}

/// Lesion insertion into an already segmented case. The tool rewrites the label
/// map and metadata record in place, adding `lesion_roi`, then writes
/// `record_file` describing what it inserted.
#[derive(Debug, Clone, Serialize)]
pub struct LesionRequest {
    pub case_id: String,
    pub output_dir: PathBuf,
    pub metadata_file: PathBuf,
    pub lesion_roi: String,
    pub specs: BTreeMap<String, serde_json::Value>,
    pub record_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct KineticsRequest {
    pub case_id: String,
    pub output_dir: PathBuf,
    pub output_file: PathBuf,
    pub name: String,
    pub preprocessing_metadata: PathBuf,
    pub vois: Vec<String>,
    pub rois: Vec<String>,
    pub frames: Vec<FrameRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionFrame {
    pub label: String,
    pub start_min: f64,
    pub duration_min: f64,
    /// Raw window sums, lower / photopeak / upper.
    pub windows: [PathBuf; 3],
    /// Photopeak converted to MBq.
    pub calibrated_photopeak: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconstructionRequest {
    pub case_id: String,
    pub output_dir: PathBuf,
    pub attenuation_map: PathBuf,
    pub attenuation_output: PathBuf,
    pub frames: Vec<ReconstructionFrame>,
    pub iterations: u32,
    pub subsets: u32,
    pub params: SimulationParams,
}

pub trait Preprocessor: Send + Sync {
    fn preprocess(&self, request: &PreprocessingRequest) -> Result<(), ToolError>;
}

pub trait LesionGenerator: Send + Sync {
    fn insert(&self, request: &LesionRequest) -> Result<(), ToolError>;
}

pub trait KineticsSolver: Send + Sync {
    fn solve(&self, request: &KineticsRequest) -> Result<(), ToolError>;
}

pub trait Reconstructor: Send + Sync {
    fn reconstruct(&self, request: &ReconstructionRequest) -> Result<(), ToolError>;
}

/// Per-case inputs shared by every engine run.
#[derive(Debug, Clone)]
pub struct EngineSetup {
    pub work_dir: PathBuf,
    pub attenuation_map: PathBuf,
    pub params: Arc<SimulationParams>,
}

/// Monte-Carlo photon transport. One `run` per work item, executed in `work_dir`;
/// a successful run leaves `<stem>_tot_w{1,2,3}.a00` and `<stem>.res` there.
pub trait MonteCarloEngine: Send + Sync {
    fn prepare(&self, setup: &EngineSetup) -> Result<(), ToolError> {
        let _ = setup;
        Ok(())
    }

    fn run(&self, item: &WorkItem, work_dir: &Path) -> Result<(), ToolError>;
}

/// The set of external programs one run uses.
#[derive(Clone)]
pub struct Collaborators {
    pub preprocessor: Arc<dyn Preprocessor>,
    pub lesions: Arc<dyn LesionGenerator>,
    pub kinetics: Arc<dyn KineticsSolver>,
    pub engine: Arc<dyn MonteCarloEngine>,
    pub reconstructor: Arc<dyn Reconstructor>,
}

impl Collaborators {
    /// Subprocess collaborators as configured.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            preprocessor: Arc::new(CommandPreprocessor::new(ExternalCommand::from_config(
                &config.collaborators.preprocessing,
            ))),
            lesions: Arc::new(CommandLesionGenerator::new(ExternalCommand::from_config(
                &config.collaborators.lesions,
            ))),
            kinetics: Arc::new(CommandKineticsSolver::new(ExternalCommand::from_config(
                &config.collaborators.pbpk,
            ))),
            engine: Arc::new(SimindEngine::from_config(&config.simulation)),
            reconstructor: Arc::new(CommandReconstructor::new(ExternalCommand::from_config(
                &config.collaborators.reconstruction,
            ))),
        }
    }
}
