pub mod contract;
pub mod data;
pub mod validity;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::case::CaseState;

pub use contract::{derive_state, StageContracts};
pub use data::{
    FrameRecord, KineticsOutput, PreprocessingMetadata, Roi, RoiKinetics, RoiLabel, TimeFrame,
};
pub use validity::ValidityPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocessing,
    Pbpk,
    Simulation,
    Reconstruction,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Preprocessing,
        Stage::Pbpk,
        Stage::Simulation,
        Stage::Reconstruction,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Preprocessing => "preprocessing",
            Stage::Pbpk => "pbpk",
            Stage::Simulation => "simulation",
            Stage::Reconstruction => "reconstruction",
        }
    }

    /// State a case reaches once this stage's outputs are in place.
    pub fn produces(self) -> CaseState {
        match self {
            Stage::Preprocessing => CaseState::Preprocessed,
            Stage::Pbpk => CaseState::KineticsDone,
            Stage::Simulation => CaseState::Simulated,
            Stage::Reconstruction => CaseState::Reconstructed,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable record of one stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub outputs: Vec<PathBuf>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    /// Outputs already existed and were reused instead of re-running the stage.
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub elapsed_secs: f64,
}

impl StageResult {
    pub fn completed(stage: Stage, outputs: Vec<PathBuf>, elapsed_secs: f64) -> Self {
        Self {
            stage,
            outputs,
            completed_at: Utc::now(),
            success: true,
            skipped: false,
            message: None,
            elapsed_secs,
        }
    }

    pub fn reused(stage: Stage, outputs: Vec<PathBuf>) -> Self {
        Self {
            stage,
            outputs,
            completed_at: Utc::now(),
            success: true,
            skipped: true,
            message: Some("valid outputs reused".to_string()),
            elapsed_secs: 0.0,
        }
    }

    pub fn failed(stage: Stage, message: String, elapsed_secs: f64) -> Self {
        Self {
            stage,
            outputs: Vec::new(),
            completed_at: Utc::now(),
            success: false,
            skipped: false,
            message: Some(message),
            elapsed_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_states() {
        let states: Vec<CaseState> = Stage::ALL.iter().map(|s| s.produces()).collect();
        let mut sorted = states.clone();
        sorted.sort();
        assert_eq!(states, sorted);
    }

    #[test]
    fn test_stage_result_serializes_stage_name() {
        let result = StageResult::reused(Stage::Pbpk, vec![]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stage"], "pbpk");
        assert_eq!(json["skipped"], true);
    }
}
