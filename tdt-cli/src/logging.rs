use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogFormat;

/// Installs the console subscriber and routes `log` records into it.
///
/// `RUST_LOG` wins over `verbose` when set.
pub fn init_logger(format: LogFormat, verbose: bool) {
    // Scanner and worker pool log through the `log` facade.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("log bridge not installed: {}", e);
    }

    let default_level = if verbose { "debug" } else { "info" };
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter_layer);
    let result = match format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr).with_target(false)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(false),
            ),
        ),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber not installed: {}", e);
    }
}
