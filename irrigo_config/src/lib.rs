#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, persisted document shapes and calibration CSV import.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `records` holds the short-key JSON shapes for the calibration set and
//!   the run record. Semantic checks on those live in `irrigo_core`.
//! - The calibration CSV loader enforces headers and row shape.
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;

pub mod records;

pub use records::{CalibrationEntry, PositionRecord, ProtocolRecord, RunRecord, StepRecord};

/// Calibration CSV schema.
///
/// Expected headers:
/// slot,offset,offset_error,slope,slope_error
///
/// Example (slot 2 only has a zero point so far):
/// slot,offset,offset_error,slope,slope_error
/// 0,84291.5,12.1,0.0021,0.00001
/// 2,90210.0,9.8,,
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct CalibrationRow {
    pub slot: u32,
    pub offset: f64,
    pub offset_error: f64,
    pub slope: Option<f64>,
    pub slope_error: Option<f64>,
}

impl From<CalibrationRow> for CalibrationEntry {
    fn from(r: CalibrationRow) -> Self {
        Self {
            slot: r.slot,
            offset: r.offset,
            offset_error: r.offset_error,
            slope: r.slope,
            slope_error: r.slope_error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Pins {
    pub hx711_dt: u8,
    pub hx711_sck: u8,
    /// Multiplexer selector lines, least significant bit first.
    pub mux_select: Vec<u8>,
    /// Stepper coil lines in phase order.
    pub stepper: Vec<u8>,
    pub servo: u8,
    pub pump: u8,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GainCfg {
    #[default]
    A128,
    B32,
    A64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Acquisition {
    /// Raw samples averaged per channel reading
    pub samples_per_read: u32,
    /// Max time to wait for HX711 data-ready (DT low) per sample
    pub read_timeout_ms: u64,
    /// Sleep between data-ready polls
    pub poll_interval_us: u64,
    pub gain: GainCfg,
}

impl Default for Acquisition {
    fn default() -> Self {
        Self {
            samples_per_read: 10,
            read_timeout_ms: 5000,
            poll_interval_us: 1000,
            gain: GainCfg::A128,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StepperCfg {
    /// Delay between half-steps
    pub step_delay_us: u64,
    /// De-energize coils when a move ends
    pub release_on_finish: bool,
}

impl Default for StepperCfg {
    fn default() -> Self {
        Self {
            step_delay_us: 1000,
            release_on_finish: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServoCfg {
    pub min_angle: i32,
    pub max_angle: i32,
    /// Delay between one-degree increments
    pub step_delay_us: u64,
    pub frequency_hz: f64,
    /// Pulse width at `min_angle`
    pub min_pulse_us: u32,
    /// Pulse width at `max_angle`
    pub max_pulse_us: u32,
    /// Invert the output duty (for inverting level shifters)
    pub inverted: bool,
}

impl Default for ServoCfg {
    fn default() -> Self {
        Self {
            min_angle: 0,
            max_angle: 180,
            step_delay_us: 15_000,
            frequency_hz: 50.0,
            min_pulse_us: 500,
            max_pulse_us: 2500,
            inverted: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PumpCfg {
    pub frequency_hz: f64,
    /// Length of one pump increment; a run of `d` µs is `d / pulse_us` increments
    pub pulse_us: u64,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self {
            frequency_hz: 2000.0,
            pulse_us: 10_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub data_dir: PathBuf,
    pub calibration_file: String,
    pub run_file: String,
    /// Directory for actuator journals; defaults to `data_dir`
    pub journal_dir: Option<PathBuf>,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            calibration_file: "hxcalib.json".into(),
            run_file: "rundata.json".into(),
            journal_dir: None,
        }
    }
}

impl Storage {
    pub fn journal_dir(&self) -> PathBuf {
        self.journal_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.clone())
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RunnerCfg {
    /// Sleep between control-loop polls when nothing is due
    pub idle_sleep_ms: u64,
    /// How long a watering job waits for a busy actuator before giving up
    pub move_wait_ms: u64,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 5,
            move_wait_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub acquisition: Acquisition,
    #[serde(default)]
    pub stepper: StepperCfg,
    #[serde(default)]
    pub servo: ServoCfg,
    #[serde(default)]
    pub pump: PumpCfg,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub runner: RunnerCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_calibration_csv(path: &std::path::Path) -> eyre::Result<Vec<CalibrationEntry>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["slot", "offset", "offset_error", "slope", "slope_error"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "calibration CSV must have headers '{}', got: {}",
            expected.join(","),
            actual.join(",")
        );
    }

    let mut entries = Vec::new();
    for (idx, rec) in rdr.deserialize::<CalibrationRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if row.slope.is_some() != row.slope_error.is_some() {
            eyre::bail!(
                "invalid CSV row {}: slope and slope_error must both be set or both be empty",
                idx + 2
            );
        }
        entries.push(CalibrationEntry::from(row));
    }
    if entries.is_empty() {
        eyre::bail!("calibration CSV {:?} has no rows", path);
    }
    Ok(entries)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        let p = &self.pins;
        if p.mux_select.is_empty() || p.mux_select.len() > 8 {
            eyre::bail!("pins.mux_select must list 1..=8 selector lines");
        }
        if p.stepper.len() != 4 {
            eyre::bail!("pins.stepper must list exactly 4 coil lines");
        }
        let mut seen = HashSet::new();
        let all = [p.hx711_dt, p.hx711_sck, p.servo, p.pump]
            .into_iter()
            .chain(p.mux_select.iter().copied())
            .chain(p.stepper.iter().copied());
        for pin in all {
            if !seen.insert(pin) {
                eyre::bail!("pins must be distinct (pin {pin} is used twice)");
            }
        }

        let a = &self.acquisition;
        if a.samples_per_read == 0 {
            eyre::bail!("acquisition.samples_per_read must be >= 1");
        }
        if a.read_timeout_ms == 0 {
            eyre::bail!("acquisition.read_timeout_ms must be >= 1");
        }
        if a.read_timeout_ms > 60_000 {
            eyre::bail!("acquisition.read_timeout_ms is unreasonably large (>60s)");
        }
        if a.poll_interval_us == 0 {
            eyre::bail!("acquisition.poll_interval_us must be >= 1");
        }

        if self.stepper.step_delay_us == 0 {
            eyre::bail!("stepper.step_delay_us must be >= 1");
        }

        let s = &self.servo;
        if s.min_angle >= s.max_angle {
            eyre::bail!("servo.min_angle must be < servo.max_angle");
        }
        if !(0..=360).contains(&s.min_angle) || !(0..=360).contains(&s.max_angle) {
            eyre::bail!("servo angles must be in [0, 360]");
        }
        if !(s.frequency_hz.is_finite() && s.frequency_hz > 0.0) {
            eyre::bail!("servo.frequency_hz must be > 0");
        }
        if s.min_pulse_us >= s.max_pulse_us {
            eyre::bail!("servo.min_pulse_us must be < servo.max_pulse_us");
        }
        if s.step_delay_us == 0 {
            eyre::bail!("servo.step_delay_us must be >= 1");
        }

        if !(self.pump.frequency_hz.is_finite() && self.pump.frequency_hz > 0.0) {
            eyre::bail!("pump.frequency_hz must be > 0");
        }
        if self.pump.pulse_us == 0 {
            eyre::bail!("pump.pulse_us must be >= 1");
        }

        if self.storage.calibration_file.trim().is_empty() || self.storage.run_file.trim().is_empty()
        {
            eyre::bail!("storage file names must not be empty");
        }
        if self.storage.calibration_file == self.storage.run_file {
            eyre::bail!("storage.calibration_file and storage.run_file must differ");
        }

        if let Some(rot) = self.logging.rotation.as_deref() {
            if !matches!(rot, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly");
            }
        }
        Ok(())
    }

    /// Number of multiplexed channels addressed by the selector lines.
    pub fn channel_count(&self) -> usize {
        1usize << self.pins.mux_select.len()
    }
}
