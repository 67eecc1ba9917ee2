//! Declared terminal outputs of each stage. Their presence and validity is the
//! only signal used to decide how far a case has progressed.

use std::path::PathBuf;

use crate::aggregation::window_files;
use crate::case::{CaseLayout, CaseState};
use crate::error::StorageError;
use crate::pipeline::PipelineConfig;
use crate::stage::data::{KineticsOutput, PreprocessingMetadata, TimeFrame};
use crate::stage::Stage;
use crate::storage::filesystem::read_json;

pub struct StageContracts<'a> {
    layout: &'a CaseLayout,
    config: &'a PipelineConfig,
}

impl<'a> StageContracts<'a> {
    pub fn new(layout: &'a CaseLayout, config: &'a PipelineConfig) -> Self {
        Self { layout, config }
    }

    pub fn layout(&self) -> &CaseLayout {
        self.layout
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.layout
            .stage_dir(Stage::Preprocessing)
            .join(PreprocessingMetadata::file_name(&self.config.preprocessing.name))
    }

    pub fn kinetics_path(&self) -> PathBuf {
        self.layout
            .stage_dir(Stage::Pbpk)
            .join(KineticsOutput::file_name(&self.config.pbpk.name))
    }

    /// `<preprocessing>/<name>_outputs`, where the lesion tool writes.
    pub fn lesion_dir(&self) -> Option<PathBuf> {
        let lesions = self.config.lesions.as_ref()?;
        Some(
            self.layout
                .stage_dir(Stage::Preprocessing)
                .join(format!("{}_outputs", lesions.name)),
        )
    }

    pub fn lesion_record_path(&self) -> Option<PathBuf> {
        let lesions = self.config.lesions.as_ref()?;
        self.lesion_dir()
            .map(|dir| dir.join(format!("{}_lesions.json", lesions.name)))
    }

    pub fn load_metadata(&self) -> Result<PreprocessingMetadata, StorageError> {
        let mut metadata: PreprocessingMetadata = read_json(&self.metadata_path())?;
        metadata.resolve_paths(self.layout.stage_dir(Stage::Preprocessing));
        Ok(metadata)
    }

    pub fn load_kinetics(&self) -> Result<KineticsOutput, StorageError> {
        let mut kinetics: KineticsOutput = read_json(&self.kinetics_path())?;
        kinetics.resolve_paths(self.layout.stage_dir(Stage::Pbpk));
        Ok(kinetics)
    }

    fn simulation_file(&self, name: String) -> PathBuf {
        self.layout.stage_dir(Stage::Simulation).join(name)
    }

    /// `<prefix>_<frame>`, the stem of every per-frame simulation output.
    pub fn frame_stem(&self, frame: &TimeFrame) -> String {
        format!("{}_{}", self.config.simulation_prefix(), frame.label())
    }

    pub fn frame_window_paths(&self, frame: &TimeFrame) -> [PathBuf; 3] {
        window_files(
            self.layout.stage_dir(Stage::Simulation),
            &self.frame_stem(frame),
        )
    }

    pub fn calibrated_path(&self, frame: &TimeFrame) -> PathBuf {
        self.simulation_file(format!("{}_cal_w2.a00", self.frame_stem(frame)))
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.simulation_file("calibration.json".to_string())
    }

    pub fn aggregation_report_path(&self) -> PathBuf {
        self.simulation_file(format!("{}_aggregation.json", self.config.simulation_prefix()))
    }

    pub fn job_summaries_path(&self) -> PathBuf {
        self.simulation_file(format!(
            "{}_job_summaries.json",
            self.config.simulation_prefix()
        ))
    }

    pub fn reconstruction_path(&self, frame: &TimeFrame) -> PathBuf {
        self.simulation_file(format!("{}.nii", self.frame_stem(frame)))
    }

    pub fn reconstruction_attenuation_path(&self) -> PathBuf {
        self.simulation_file(format!("{}_atn_img.nii", self.config.simulation_prefix()))
    }

    /// Terminal files of `stage`. For preprocessing and PBPK this includes the
    /// files their records reference, when the record itself is readable.
    pub fn terminal_outputs(&self, stage: Stage) -> Vec<PathBuf> {
        match stage {
            Stage::Preprocessing => {
                let mut outputs = vec![self.metadata_path()];
                if let Ok(metadata) = self.load_metadata() {
                    outputs.extend(metadata.referenced_files());
                }
                outputs.extend(self.lesion_record_path());
                outputs
            }
            Stage::Pbpk => {
                let mut outputs = vec![self.kinetics_path()];
                if let Ok(kinetics) = self.load_kinetics() {
                    outputs.extend(kinetics.referenced_files());
                }
                outputs
            }
            Stage::Simulation => {
                let mut outputs = Vec::new();
                for frame in &self.config.frames {
                    outputs.extend(self.frame_window_paths(frame));
                    outputs.push(self.calibrated_path(frame));
                }
                outputs.push(self.calibration_path());
                outputs.push(self.aggregation_report_path());
                outputs
            }
            Stage::Reconstruction => {
                let mut outputs: Vec<PathBuf> = self
                    .config
                    .frames
                    .iter()
                    .map(|f| self.reconstruction_path(f))
                    .collect();
                outputs.push(self.reconstruction_attenuation_path());
                outputs
            }
        }
    }

    /// Validates the terminal outputs of `stage` under the configured policy.
    pub fn check(&self, stage: Stage) -> Result<Vec<PathBuf>, String> {
        let outputs = self.terminal_outputs(stage);
        self.config.validity.check_all(&outputs)?;
        Ok(outputs)
    }

    pub fn is_finalized(&self) -> bool {
        self.config.validity.is_valid(&self.layout.provenance_path())
    }
}

/// Highest state whose stage outputs, and those of every earlier stage, validate.
pub fn derive_state(contracts: &StageContracts<'_>) -> CaseState {
    let mut state = CaseState::Discovered;
    for stage in Stage::ALL {
        if contracts.check(stage).is_err() {
            return state;
        }
        state = stage.produces();
    }

    if contracts.is_finalized() {
        CaseState::Finalized
    } else {
        state
    }
}
