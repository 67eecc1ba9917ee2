mod cli;
mod logging;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use cli::Cli;
use tdt::pipeline::TracingProgress;
use tdt::{
    load_config, BatchReport, BatchRunner, CaseScanner, Orchestrator, PipelineConfig, RunError,
    RunOptions,
};

/// Every case finalized.
const EXIT_OK: u8 = 0;
/// At least one case failed; the rest of the batch ran.
const EXIT_CASE_FAILED: u8 = 1;
/// The run itself could not proceed.
const EXIT_RUN_ERROR: u8 = 2;

fn main() -> ExitCode {
    let args = Cli::parse();
    logging::init_logger(args.log_format, args.verbose);

    match run(&args) {
        Ok(report) => {
            info!(
                manifest = %report.manifest_path.display(),
                finalized = report.manifest.succeeded.len(),
                failed = report.failed_count(),
                "run complete"
            );
            for outcome in report.outcomes.iter().filter(|o| !o.case.is_finalized()) {
                warn!(
                    case = outcome.case.index,
                    id = %outcome.case.id,
                    reason = outcome.case.failure.as_deref().unwrap_or("unknown"),
                    "case did not finalize"
                );
            }

            if report.all_finalized() {
                ExitCode::from(EXIT_OK)
            } else {
                ExitCode::from(EXIT_CASE_FAILED)
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_RUN_ERROR)
        }
    }
}

fn run(args: &Cli) -> Result<BatchReport, RunError> {
    let config = load_config(&args.config)?;

    let options = RunOptions {
        mode: args.mode.map(Into::into),
        output_root: args.output_root.clone(),
        logging_on: args.logging_enabled(),
        save_ct_scan: args.save_ct_scan,
        save_config: args.save_config,
        synthetic_lesions: args.synthetic_lesions,
        config_path: Some(args.config.clone()),
    };
    let pipeline = Arc::new(PipelineConfig::from_config(&config, options)?);
    info!(
        mode = %pipeline.mode,
        output_root = %pipeline.output_root.display(),
        simulation_workers = pipeline.worker_count,
        case_parallelism = pipeline.case_parallelism,
        "configuration loaded"
    );

    let cases = CaseScanner::new(&args.input_ct_dir).scan()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        if !flag.swap(true, Ordering::SeqCst) {
            warn!("interrupt received; finishing running jobs, no new jobs or cases will start");
        }
    }) {
        warn!(error = %e, "Ctrl-C handler not installed");
    }

    let orchestrator = Arc::new(Orchestrator::from_config(pipeline, Arc::clone(&shutdown)));
    let runner = BatchRunner::new(orchestrator, Arc::new(TracingProgress), shutdown);
    runner.run(cases)
}
