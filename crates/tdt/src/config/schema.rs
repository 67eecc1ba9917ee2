use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::stage::ValidityPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub mode: RunMode,
    #[serde(default)]
    pub output_folder: OutputFolderConfig,
    #[serde(default)]
    pub subdir_names: SubdirNames,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default = "default_case_parallelism")]
    pub case_parallelism: usize,
    pub spect_preprocessing: PreprocessingConfig,
    pub pbpk: PbpkConfig,
    pub spect_simulation: SimulationConfig,
    #[serde(default)]
    pub synthetic_lesions: SyntheticLesionsConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
}

fn default_case_parallelism() -> usize {
    1
}

/// `PRODUCTION` skips stages whose outputs already validate; `DEBUG` always re-runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunMode {
    #[serde(alias = "debug")]
    Debug,
    #[default]
    #[serde(alias = "production")]
    Production,
}

impl RunMode {
    pub fn reuses_outputs(self) -> bool {
        matches!(self, RunMode::Production)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Debug => write!(f, "DEBUG"),
            RunMode::Production => write!(f, "PRODUCTION"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFolderConfig {
    #[serde(default = "default_title")]
    pub title: String,
    /// Parent directory for case folders. The CLI `--output-root` flag wins over this.
    #[serde(default)]
    pub root: Option<String>,
}

fn default_title() -> String {
    "tdt_output".to_string()
}

impl Default for OutputFolderConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubdirNames {
    #[serde(default = "default_preprocessing_dir")]
    pub preprocessing: String,
    #[serde(default = "default_pbpk_dir")]
    pub pbpk: String,
    #[serde(default = "default_simulation_dir")]
    pub spect_simulation: String,
}

fn default_preprocessing_dir() -> String {
    "preprocessing_outputs".to_string()
}

fn default_pbpk_dir() -> String {
    "pbpk_outputs".to_string()
}

fn default_simulation_dir() -> String {
    "simulation_outputs".to_string()
}

impl Default for SubdirNames {
    fn default() -> Self {
        Self {
            preprocessing: default_preprocessing_dir(),
            pbpk: default_pbpk_dir(),
            spect_simulation: default_simulation_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeConfig {
    #[serde(default)]
    pub validity: ValidityPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessingConfig {
    /// File prefix for preprocessing outputs.
    #[serde(default = "default_preprocessing_name")]
    pub name: String,
    /// ROI names kept for simulation. Empty keeps every segmented ROI.
    #[serde(default, alias = "ROISubset")]
    pub roi_subset: Vec<String>,
    /// Target edge length of the resampled volume.
    #[serde(default, alias = "ResizeDim")]
    pub resize: Option<u32>,
}

fn default_preprocessing_name() -> String {
    "tdt".to_string()
}

/// Optional lesion insertion between preprocessing and PBPK. Only runs when the
/// CLI enables it and `specs` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticLesionsConfig {
    #[serde(default = "default_lesions_name")]
    pub name: String,
    /// Lesion parameters keyed by the organ ROI that hosts them. Passed through
    /// to the lesion tool untouched.
    #[serde(default)]
    pub specs: Option<BTreeMap<String, serde_json::Value>>,
}

fn default_lesions_name() -> String {
    "synthetic_lesions".to_string()
}

impl SyntheticLesionsConfig {
    pub fn is_configured(&self) -> bool {
        self.specs.as_ref().is_some_and(|s| !s.is_empty())
    }
}

impl Default for SyntheticLesionsConfig {
    fn default() -> Self {
        Self {
            name: default_lesions_name(),
            specs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PbpkConfig {
    #[serde(default = "default_pbpk_name")]
    pub name: String,
    /// Kinetic model observables (e.g. "Kidney", "Liver", "Rest").
    #[serde(default, alias = "VOIs")]
    pub vois: Vec<String>,
    /// Frame start times in minutes.
    #[serde(alias = "FrameStartTimes")]
    pub frame_start_times: Vec<f64>,
    /// Frame durations in minutes, one per start time.
    #[serde(alias = "FrameDurations")]
    pub frame_durations: Vec<f64>,
}

fn default_pbpk_name() -> String {
    "pbpk".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Prefix for simulation and reconstruction outputs.
    #[serde(default = "default_simulation_name")]
    pub name: String,
    #[serde(alias = "SIMINDDirectory")]
    pub simind_directory: String,
    /// Directory holding `scattwin.win`, `smc.smc` and `jaszak.smc`.
    /// Defaults to `<simind_directory>/templates`.
    #[serde(default, alias = "TemplateDirectory")]
    pub template_directory: Option<String>,
    #[serde(alias = "Collimator")]
    pub collimator: String,
    #[serde(alias = "Isotope")]
    pub isotope: String,
    #[serde(alias = "NumPhotons")]
    pub num_photons: f64,
    #[serde(alias = "NumProjections")]
    pub num_projections: u32,
    #[serde(alias = "EnergyWindowWidth")]
    pub energy_window_width: f64,
    #[serde(alias = "DetectorDistance")]
    pub detector_distance: f64,
    #[serde(alias = "DetectorWidth")]
    pub detector_width: f64,
    /// Zero means "use the CT axial length".
    #[serde(default, alias = "DetectorLength")]
    pub detector_length: f64,
    #[serde(alias = "OutputImgSize")]
    pub output_img_size: u32,
    #[serde(alias = "OutputPixelWidth")]
    pub output_pixel_width: f64,
    #[serde(alias = "OutputSliceWidth")]
    pub output_slice_width: f64,
    #[serde(alias = "Iterations")]
    pub iterations: u32,
    #[serde(alias = "Subsets")]
    pub subsets: u32,
    /// Simulation workers per case. Zero uses every available core.
    #[serde(default, alias = "NumCores")]
    pub num_cores: usize,
    #[serde(default = "default_max_job_retries")]
    pub max_job_retries: u32,
    /// Known activity of the calibration phantom.
    #[serde(default = "default_calibration_activity")]
    pub calibration_activity_mbq: f64,
}

fn default_simulation_name() -> String {
    "spect".to_string()
}

fn default_max_job_retries() -> u32 {
    2
}

fn default_calibration_activity() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    fn named(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default = "default_preprocessing_command")]
    pub preprocessing: CommandConfig,
    #[serde(default = "default_pbpk_command")]
    pub pbpk: CommandConfig,
    #[serde(default = "default_reconstruction_command")]
    pub reconstruction: CommandConfig,
    #[serde(default = "default_lesions_command")]
    pub lesions: CommandConfig,
}

fn default_preprocessing_command() -> CommandConfig {
    CommandConfig::named("tdt-preprocess")
}

fn default_pbpk_command() -> CommandConfig {
    CommandConfig::named("tdt-pbpk")
}

fn default_reconstruction_command() -> CommandConfig {
    CommandConfig::named("tdt-recon")
}

fn default_lesions_command() -> CommandConfig {
    CommandConfig::named("tdt-lesions")
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            preprocessing: default_preprocessing_command(),
            pbpk: default_pbpk_command(),
            reconstruction: default_reconstruction_command(),
            lesions: default_lesions_command(),
        }
    }
}
