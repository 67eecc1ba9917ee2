use crate::case::{Case, CaseLayout, CaseState};
use crate::stage::{Stage, StageResult};

use super::case_log::CaseLog;

pub struct CaseContext {
    // Input
    pub case: Case,
    pub layout: CaseLayout,

    // One record per stage, in stage order
    pub results: Vec<StageResult>,

    // Highest state seen so far; a lower derived state means outputs vanished
    pub observed: CaseState,

    pub log: CaseLog,
}

impl CaseContext {
    pub fn new(case: Case, layout: CaseLayout) -> Self {
        Self {
            case,
            layout,
            results: Vec::new(),
            observed: CaseState::Discovered,
            log: CaseLog::disabled(),
        }
    }

    pub fn has_result(&self, stage: Stage) -> bool {
        self.results.iter().any(|r| r.stage == stage)
    }

    /// Replaces an earlier record of the same stage.
    pub fn record(&mut self, result: StageResult) {
        self.results.retain(|r| r.stage != result.stage);
        self.results.push(result);
        self.results.sort_by_key(|r| r.stage);
    }
}
