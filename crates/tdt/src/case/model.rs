use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::stage::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CtInputKind {
    /// Single `.nii` / `.nii.gz` volume.
    Volume,
    /// Directory holding a DICOM series.
    Series,
    Unsupported(String),
}

/// Pipeline state of one case. Ordered; `Failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    Discovered,
    Preprocessed,
    KineticsDone,
    Simulated,
    Reconstructed,
    Finalized,
    Failed,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CaseState::Finalized | CaseState::Failed)
    }

    /// Stage whose completion moves the case out of this state.
    pub fn next_stage(self) -> Option<Stage> {
        match self {
            CaseState::Discovered => Some(Stage::Preprocessing),
            CaseState::Preprocessed => Some(Stage::Pbpk),
            CaseState::KineticsDone => Some(Stage::Simulation),
            CaseState::Simulated => Some(Stage::Reconstruction),
            CaseState::Reconstructed | CaseState::Finalized | CaseState::Failed => None,
        }
    }

    /// Transitions only move forward; `Failed` is reachable from any non-terminal state.
    pub fn can_transition_to(self, next: CaseState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == CaseState::Failed || next >= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CaseState::Discovered => "discovered",
            CaseState::Preprocessed => "preprocessed",
            CaseState::KineticsDone => "kinetics_done",
            CaseState::Simulated => "simulated",
            CaseState::Reconstructed => "reconstructed",
            CaseState::Finalized => "finalized",
            CaseState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for CaseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One CT input processed end-to-end.
#[derive(Debug, Clone)]
pub struct Case {
    pub index: usize,
    pub id: String,
    pub source_path: PathBuf,
    pub input_kind: CtInputKind,
    pub state: CaseState,
    pub failure: Option<String>,
}

impl Case {
    pub fn new(index: usize, source_path: PathBuf, input_kind: CtInputKind) -> Self {
        let id = case_id(&source_path);
        Self {
            index,
            id,
            source_path,
            input_kind,
            state: CaseState::Discovered,
            failure: None,
        }
    }

    pub fn mark_failed(&mut self, reason: String) {
        self.state = CaseState::Failed;
        self.failure = Some(reason);
    }

    pub fn is_finalized(&self) -> bool {
        self.state == CaseState::Finalized
    }
}

/// File stem with `.nii.gz` stripped, or the directory name.
fn case_id(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "case".to_string());

    for suffix in [".nii.gz", ".nii"] {
        if let Some(stem) = name.strip_suffix(suffix) {
            if !stem.is_empty() {
                return stem.to_string();
            }
        }
    }
    name
}
