use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tdt::RunMode;

#[derive(Parser, Debug)]
#[command(name = "tdt")]
#[command(version, about = "Run theranostic digital twin cases from CT to reconstructed SPECT")]
pub struct Cli {
    /// Pipeline config document (.json, .yaml or .yml)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Directory of CT inputs; each top-level entry is one case
    #[arg(short, long = "input-ct-dir")]
    pub input_ct_dir: PathBuf,

    /// Root for case folders and the run manifest (overrides output_folder.root)
    #[arg(short, long)]
    pub output_root: Option<PathBuf>,

    /// Run mode (overrides the config document)
    #[arg(short, long, value_enum)]
    pub mode: Option<ModeArg>,

    /// Write a per-case log file into each case folder
    #[arg(long, overrides_with = "no_logging")]
    pub logging_on: bool,

    #[arg(long, overrides_with = "logging_on")]
    pub no_logging: bool,

    /// Copy each CT input into its case folder
    #[arg(long)]
    pub save_ct_scan: bool,

    /// Copy the config document into each case folder
    #[arg(long)]
    pub save_config: bool,

    /// Insert synthetic lesions after preprocessing (needs `synthetic_lesions.specs`)
    #[arg(long, alias = "synthetic_lesions")]
    pub synthetic_lesions: bool,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Debug-level console output (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Per-case log files are on unless `--no-logging` is the last word.
    pub fn logging_enabled(&self) -> bool {
        self.logging_on || !self.no_logging
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Debug,
    Production,
}

impl From<ModeArg> for RunMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Debug => RunMode::Debug,
            ModeArg::Production => RunMode::Production,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}
