use std::path::PathBuf;

use tracing::info;

use crate::config::{
    CollaboratorsConfig, Config, PbpkConfig, PreprocessingConfig, RunMode, SimulationConfig,
    SubdirNames, SyntheticLesionsConfig,
};
use crate::error::RunError;
use crate::stage::{TimeFrame, ValidityPolicy};

/// Invocation options that sit outside the config document (CLI flags).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides `mode` from the config document.
    pub mode: Option<RunMode>,
    /// Overrides `output_folder.root` from the config document.
    pub output_root: Option<PathBuf>,
    pub logging_on: bool,
    pub save_ct_scan: bool,
    pub save_config: bool,
    /// Inserts synthetic lesions after preprocessing when the config carries specs.
    pub synthetic_lesions: bool,
    /// Source of the config document, copied into each case when `save_config` is set.
    pub config_path: Option<PathBuf>,
}

/// Immutable run configuration handed to every component as `Arc<PipelineConfig>`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: RunMode,
    pub output_root: PathBuf,
    pub title: String,
    pub subdirs: SubdirNames,
    pub validity: ValidityPolicy,
    pub case_parallelism: usize,
    pub preprocessing: PreprocessingConfig,
    pub pbpk: PbpkConfig,
    pub simulation: SimulationConfig,
    /// Present only when lesion insertion is both requested and configured.
    pub lesions: Option<SyntheticLesionsConfig>,
    pub collaborators: CollaboratorsConfig,
    pub frames: Vec<TimeFrame>,
    /// Concurrent engine runs for the whole batch, resolved from `num_cores`.
    pub worker_count: usize,
    pub logging_on: bool,
    pub save_ct_scan: bool,
    pub save_config: bool,
    pub config_path: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn from_config(config: &Config, options: RunOptions) -> Result<Self, RunError> {
        let worker_count = resolve_worker_count(config.spect_simulation.num_cores)?;

        let output_root = options
            .output_root
            .or_else(|| config.output_folder.root.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));

        let lesions = match (options.synthetic_lesions, config.synthetic_lesions.is_configured()) {
            (true, true) => Some(config.synthetic_lesions.clone()),
            (true, false) => {
                info!("Synthetic lesions requested but no specs are configured; step disabled");
                None
            }
            (false, _) => None,
        };

        Ok(Self {
            mode: options.mode.unwrap_or(config.mode),
            output_root,
            title: config.output_folder.title.clone(),
            subdirs: config.subdir_names.clone(),
            validity: config.resume.validity,
            case_parallelism: config.case_parallelism.max(1),
            preprocessing: config.spect_preprocessing.clone(),
            pbpk: config.pbpk.clone(),
            simulation: config.spect_simulation.clone(),
            lesions,
            collaborators: config.collaborators.clone(),
            frames: TimeFrame::from_config(&config.pbpk),
            worker_count,
            logging_on: options.logging_on,
            save_ct_scan: options.save_ct_scan,
            save_config: options.save_config,
            config_path: options.config_path,
        })
    }

    /// ROI names kept for simulation. An explicit subset grows by the lesion ROI
    /// when lesions are inserted; an empty subset already keeps every ROI.
    pub fn roi_subset(&self) -> Vec<String> {
        let mut rois = self.preprocessing.roi_subset.clone();
        if self.lesions.is_some() && !rois.is_empty() && !rois.iter().any(|r| r == LESION_ROI) {
            rois.push(LESION_ROI.to_string());
        }
        rois
    }

    /// Prefix of every simulation and reconstruction output file.
    pub fn simulation_prefix(&self) -> &str {
        &self.simulation.name
    }
}

/// ROI label the lesion tool writes into the segmentation.
pub const LESION_ROI: &str = "synthetic_lesion";

/// `0` means every available core; asking for more than exist is a run-level error.
pub fn resolve_worker_count(num_cores: usize) -> Result<usize, RunError> {
    let available = num_cpus::get().max(1);
    match num_cores {
        0 => Ok(available),
        n if n > available => Err(RunError::CoreCount {
            requested: n,
            available,
        }),
        n => Ok(n),
    }
}
