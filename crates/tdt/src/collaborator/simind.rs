//! SIMIND invocation: switch strings, environment, template staging.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::collaborator::{EngineSetup, ExternalCommand, MonteCarloEngine};
use crate::config::SimulationConfig;
use crate::error::ToolError;
use crate::storage::filesystem::{copy_file, ensure_directory};
use crate::worker::job::{CalibrationJob, SimulationJob, SimulationParams, WorkItem};

const WINDOW_TEMPLATE: &str = "scattwin.win";
const SMC_TEMPLATE: &str = "smc.smc";
const CALIBRATION_TEMPLATE: &str = "jaszak.smc";

pub struct SimindEngine {
    simind_dir: PathBuf,
    executable: PathBuf,
    template_dir: PathBuf,
}

impl SimindEngine {
    pub fn from_config(config: &SimulationConfig) -> Self {
        let simind_dir = PathBuf::from(&config.simind_directory);
        let template_dir = config
            .template_directory
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| simind_dir.join("templates"));

        let mut executable = simind_dir.join("simind");
        let windows_exe = simind_dir.join("simind.exe");
        if !executable.exists() && windows_exe.exists() {
            executable = windows_exe;
        }

        Self {
            simind_dir,
            executable,
            template_dir,
        }
    }

    fn command(&self) -> ExternalCommand {
        let mut search_path = vec![self.simind_dir.clone()];
        if let Some(existing) = std::env::var_os("PATH") {
            search_path.extend(std::env::split_paths(&existing));
        }
        let path = std::env::join_paths(search_path)
            .unwrap_or_else(|_| self.simind_dir.clone().into_os_string());

        ExternalCommand::new(self.executable.to_string_lossy().to_string())
            .env("SMC_DIR", self.simind_dir.join("smc_dir"))
            .env("PATH", path)
    }

    fn stage_file(source: &Path, work_dir: &Path) -> Result<PathBuf, ToolError> {
        let name = source
            .file_name()
            .ok_or_else(|| ToolError::MissingOutput(source.to_path_buf()))?;
        let target = work_dir.join(name);
        if !target.exists() {
            copy_file(source, &target)?;
        }
        Ok(target)
    }
}

impl MonteCarloEngine for SimindEngine {
    fn prepare(&self, setup: &EngineSetup) -> Result<(), ToolError> {
        ensure_directory(&setup.work_dir)?;

        let prefix = &setup.params.prefix;
        copy_file(
            &self.template_dir.join(WINDOW_TEMPLATE),
            &setup.work_dir.join(format!("{}.win", prefix)),
        )?;
        copy_file(
            &self.template_dir.join(SMC_TEMPLATE),
            &setup.work_dir.join(format!("{}.smc", prefix)),
        )?;
        copy_file(
            &self.template_dir.join(CALIBRATION_TEMPLATE),
            &setup.work_dir.join(CALIBRATION_TEMPLATE),
        )?;

        Self::stage_file(&setup.attenuation_map, &setup.work_dir)?;
        Ok(())
    }

    fn run(&self, item: &WorkItem, work_dir: &Path) -> Result<(), ToolError> {
        let args: Vec<OsString> = match item {
            WorkItem::Simulation(job) => {
                Self::stage_file(&job.activity_map, work_dir)?;
                vec![
                    job.params.prefix.clone().into(),
                    job.output_stem().into(),
                    format!("{}/rr:{}", simulation_switches(job), job.seed).into(),
                ]
            }
            WorkItem::Calibration(job) => vec![
                "jaszak".into(),
                format!("{}{}", item.output_stem(), calibration_switches(job)).into(),
            ],
        };

        self.command().run(work_dir, &args)?;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Switches for one (ROI, frame) run. Geometry comes from the preprocessing
/// metadata; the seed switch is appended by the caller.
pub fn simulation_switches(job: &SimulationJob) -> String {
    let params: &SimulationParams = &job.params;
    let geometry = &job.geometry;
    let half_length = geometry.half_length_cm();

    [
        format!("/fd:{}", file_name(&job.attenuation_map)),
        format!("/fs:{}", file_name(&job.activity_map)),
        "/in:x22,3x".to_string(),
        format!("/nn:{}", job.photon_scale),
        format!("/cc:{}", params.collimator),
        format!("/fi:{}", params.isotope),
        format!("/02:{}", half_length),
        format!("/05:{}", half_length),
        format!("/08:{:.2}", geometry.detector_length_cm(params)),
        format!("/10:{:.2}", params.detector_width),
        "/14:-7".to_string(),
        "/15:-7".to_string(),
        format!("/20:{}", -params.energy_window_width),
        format!("/21:{}", -params.energy_window_width),
        format!("/28:{}", params.output_pixel_width),
        format!("/29:{}", params.num_projections),
        format!("/31:{}", geometry.pixel_width_cm()),
        format!("/34:{}", geometry.shape[0]),
        format!("/42:{}", params.detector_distance),
        format!("/76:{}", params.output_img_size),
        format!("/77:{}", geometry.output_length(params)),
        format!("/78:{}", geometry.shape[1]),
        format!("/79:{}", geometry.shape[2]),
    ]
    .concat()
}

/// Jaszczak phantom reference run.
pub fn calibration_switches(job: &CalibrationJob) -> String {
    format!(
        "/fi:{}/cc:{}/29:1/15:5/fa:11/fa:15/fa:14",
        job.params.isotope, job.params.collimator
    )
}
