//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

use thrcal_core::CalibrationMode;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "thrcal", version, about = "Front-end threshold and trim calibration")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/thrcal.toml")]
    pub config: PathBuf,

    /// Device list CSV (strict header); replaces the [[devices]] tables
    #[arg(long, value_name = "FILE")]
    pub devices: Option<PathBuf>,

    /// Log as JSON lines instead of pretty, and print JSON summaries
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); defaults to [logging] level, then info
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Which stages to run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// Baselines and channel classification only
    Baseline,
    /// Also solve the global threshold DAC
    Threshold,
    /// Full calibration including per-channel trims
    Trim,
}

impl From<ModeArg> for CalibrationMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Baseline => Self::Baseline,
            ModeArg::Threshold => Self::Threshold,
            ModeArg::Trim => Self::Trim,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Calibrate every configured device and write the row log and register document
    Calibrate {
        /// Override [run] mode
        #[arg(long, value_enum, value_name = "MODE")]
        mode: Option<ModeArg>,
        /// Override [run] out_dir
        #[arg(long, value_name = "DIR")]
        out_dir: Option<PathBuf>,
        /// Override [run] jobs
        #[arg(long, value_name = "N")]
        jobs: Option<usize>,
        /// Push resolved registers back to the front-end
        #[arg(long, action = ArgAction::SetTrue)]
        write_back: bool,
    },
    /// Validate the config and probe one channel of every device
    SelfCheck,
}
