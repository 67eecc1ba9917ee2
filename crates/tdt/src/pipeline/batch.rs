use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use chrono::Utc;
use crossbeam_channel::unbounded;
use tracing::{error, info, info_span, warn};

use crate::case::Case;
use crate::error::RunError;
use crate::storage::{Manifest, ManifestEntry, ManifestWriter};

use super::progress::ProgressReporter;
use super::runner::{CaseOutcome, Orchestrator};

/// Summary of one batch invocation.
#[derive(Debug)]
pub struct BatchReport {
    pub manifest: Manifest,
    pub manifest_path: PathBuf,
    pub outcomes: Vec<CaseOutcome>,
}

impl BatchReport {
    pub fn all_finalized(&self) -> bool {
        self.manifest.all_succeeded()
    }

    pub fn failed_count(&self) -> usize {
        self.manifest.failed.len()
    }
}

/// Runs every case with `case_parallelism` case workers, then writes the manifest.
///
/// Case failures stay with their case. A full disk stops new cases from
/// starting and turns the whole run into an error once the manifest is written.
pub struct BatchRunner {
    orchestrator: Arc<Orchestrator>,
    progress: Arc<dyn ProgressReporter>,
    shutdown: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        progress: Arc<dyn ProgressReporter>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            orchestrator,
            progress,
            shutdown,
        }
    }

    pub fn run(&self, cases: Vec<Case>) -> Result<BatchReport, RunError> {
        let config = self.orchestrator.config();
        let _batch_span = info_span!("batch",
            cases = cases.len(),
            mode = %config.mode,
            case_parallelism = config.case_parallelism,
        )
        .entered();

        let started_at = Utc::now();
        let worker_count = config.case_parallelism.max(1).min(cases.len().max(1));

        let (case_tx, case_rx) = unbounded::<Case>();
        for case in cases {
            // Receiver is alive; send cannot fail.
            let _ = case_tx.send(case);
        }
        drop(case_tx);

        let outcomes: Mutex<Vec<CaseOutcome>> = Mutex::new(Vec::new());
        let disk_full: Mutex<Option<String>> = Mutex::new(None);
        let stop = AtomicBool::new(false);

        thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let case_rx = case_rx.clone();
                let outcomes = &outcomes;
                let disk_full = &disk_full;
                let stop = &stop;

                scope.spawn(move || {
                    while let Ok(case) = case_rx.recv() {
                        let outcome = if stop.load(Ordering::Relaxed)
                            || self.shutdown.load(Ordering::Relaxed)
                        {
                            self.not_started(case)
                        } else {
                            let outcome = self.orchestrator.run_case(case, self.progress.as_ref());
                            if outcome.disk_full {
                                stop.store(true, Ordering::Relaxed);
                                if let Ok(mut slot) = disk_full.lock() {
                                    slot.get_or_insert_with(|| {
                                        outcome.case.failure.clone().unwrap_or_default()
                                    });
                                }
                            }
                            outcome
                        };

                        match outcomes.lock() {
                            Ok(mut all) => all.push(outcome),
                            Err(e) => error!(worker_id, "outcome list poisoned: {}", e),
                        }
                    }
                });
            }
        });

        let mut outcomes = outcomes.into_inner().unwrap_or_else(|e| e.into_inner());
        outcomes.sort_by_key(|o| o.case.index);

        let mut manifest = Manifest::new(config.mode, &config.output_root, started_at);
        for outcome in &outcomes {
            manifest.push(ManifestEntry::new(
                &outcome.case,
                &outcome.output_dir,
                outcome.results.clone(),
            ));
        }
        let manifest = manifest.finish();

        let writer = ManifestWriter::new(&config.output_root, &config.title);
        let manifest_path = writer
            .write(&manifest)
            .map_err(RunError::Manifest)?
            .to_path_buf();

        info!(
            succeeded = manifest.succeeded.len(),
            failed = manifest.failed.len(),
            manifest = %manifest_path.display(),
            "batch finished"
        );

        if let Some(reason) = disk_full.into_inner().unwrap_or_else(|e| e.into_inner()) {
            return Err(RunError::DiskFull(reason));
        }

        Ok(BatchReport {
            manifest,
            manifest_path,
            outcomes,
        })
    }

    fn not_started(&self, mut case: Case) -> CaseOutcome {
        warn!(case = case.index, "run stopped before case started");
        let output_dir = self.orchestrator.layout_for(&case).root().to_path_buf();
        case.mark_failed("not started: run stopped before this case".to_string());
        CaseOutcome {
            case,
            output_dir,
            results: Vec::new(),
            disk_full: false,
        }
    }
}
