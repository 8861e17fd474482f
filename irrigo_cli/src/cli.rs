//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

/// Worker guard of the log file writer; dropping it flushes the file.
pub static FILE_GUARD: Mutex<Option<tracing_appender::non_blocking::WorkerGuard>> =
    Mutex::new(None);
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

pub fn json_mode() -> bool {
    JSON_MODE.get().copied().unwrap_or(false)
}

/// Flush and close the log file, if one is open.
pub fn flush_logs() {
    if let Ok(mut g) = FILE_GUARD.lock() {
        g.take();
    }
}

#[derive(Parser, Debug)]
#[command(name = "irrigo", version, about = "Multi-channel irrigation controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/irrigo.toml")]
    pub config: PathBuf,

    /// Log as JSON lines and print results as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Use the simulated bench even when built with hardware support
    #[arg(long, action = ArgAction::SetTrue)]
    pub sim: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// One of the three journaled actuators.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ActuatorArg {
    Stepper,
    Servo,
    Pump,
}

impl ActuatorArg {
    pub const ALL: [ActuatorArg; 3] = [ActuatorArg::Stepper, ActuatorArg::Servo, ActuatorArg::Pump];

    pub fn name(self) -> &'static str {
        match self {
            ActuatorArg::Stepper => "stepper",
            ActuatorArg::Servo => "servo",
            ActuatorArg::Pump => "pump",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop over the configured channels
    Run {
        /// Load the run configuration from this JSON file instead of the data dir
        #[arg(long, value_name = "FILE")]
        run_file: Option<PathBuf>,
        /// Stop after this many control passes
        #[arg(long, value_name = "N")]
        passes: Option<u64>,
        /// Append one CSV row per channel and pass to this file
        #[arg(long, value_name = "FILE")]
        record: Option<PathBuf>,
        /// Do not persist protocol progress on exit
        #[arg(long, action = ArgAction::SetTrue)]
        no_save: bool,
    },
    /// Read one channel (calibrated unless --raw)
    Read {
        channel: usize,
        /// Samples averaged into the reading
        #[arg(long, value_name = "N")]
        samples: Option<u32>,
        /// Report raw ADC counts instead of calibrated weight
        #[arg(long, action = ArgAction::SetTrue)]
        raw: bool,
    },
    /// Calibrate a channel against the unloaded cell or a known weight
    Calibrate {
        #[command(subcommand)]
        stage: CalibrateStage,
    },
    /// Inspect or edit stored calibration records
    Calibration {
        #[command(subcommand)]
        action: CalibrationAction,
    },
    /// Inspect or acknowledge actuator journals
    Journal {
        #[command(subcommand)]
        action: JournalAction,
    },
    /// Move one actuator to an absolute position
    Jog {
        #[arg(value_enum)]
        actuator: ActuatorArg,
        #[arg(allow_negative_numbers = true)]
        target: i32,
        /// How long to wait for a running move to end first (default: runner.move_wait_ms)
        #[arg(long, value_name = "MS")]
        wait_ms: Option<u64>,
    },
    /// Validate the config (and optionally a run configuration) and exit
    CheckConfig {
        #[arg(long, value_name = "FILE")]
        run_file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CalibrateStage {
    /// Record the zero point of the unloaded cell
    Offset {
        channel: usize,
        #[arg(long, value_name = "N")]
        samples: Option<u32>,
    },
    /// Fit the slope with a known weight on the cell
    Slope {
        channel: usize,
        /// Reference weight on the cell
        #[arg(long)]
        weight: f64,
        /// 1σ uncertainty of the reference weight
        #[arg(long, default_value_t = 0.0)]
        weight_error: f64,
        #[arg(long, value_name = "N")]
        samples: Option<u32>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CalibrationAction {
    /// Print stored records (all populated channels, or one)
    Get {
        #[arg(long)]
        channel: Option<usize>,
    },
    /// Overwrite one channel's record
    Set {
        channel: usize,
        #[arg(long, allow_negative_numbers = true)]
        offset: f64,
        #[arg(long, default_value_t = 0.0)]
        offset_error: f64,
        #[arg(long, allow_negative_numbers = true, requires = "slope_error")]
        slope: Option<f64>,
        #[arg(long, requires = "slope")]
        slope_error: Option<f64>,
    },
    /// Replace all records from a bench CSV (slot,offset,offset_error,slope,slope_error)
    Import {
        #[arg(value_name = "CSV")]
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum JournalAction {
    /// Show each actuator's last journaled state
    Status,
    /// Acknowledge an interrupted move so the actuator accepts moves again
    Clear {
        #[arg(value_enum)]
        actuator: ActuatorArg,
        /// Re-homed position; defaults to the journaled one
        #[arg(long, allow_negative_numbers = true)]
        position: Option<i32>,
    },
}
