//! `irrigo read`, `irrigo calibrate` and `irrigo calibration`.

use std::path::Path;
use std::time::Duration;

use eyre::{Result, WrapErr};
use irrigo_config::{CalibrationEntry, Config};
use irrigo_core::{Calibration, Estimate, LoadReport, Reading};
use irrigo_hardware::DirStore;
use serde_json::json;
use tracing::warn;

use crate::bench::{self, Backend, Channels};
use crate::cli::{CalibrateStage, CalibrationAction};

/// Channels with the stored calibration applied.
struct Station {
    channels: Channels,
    store: DirStore,
    file: String,
    samples: u32,
    timeout: Duration,
}

impl Station {
    fn open(cfg: &Config, backend: Backend) -> Result<Self> {
        let store = DirStore::open(&cfg.storage.data_dir)
            .wrap_err_with(|| format!("open data dir {}", cfg.storage.data_dir.display()))?;
        let (mut channels, _bus) = bench::open_channels(cfg, backend)?;
        let file = cfg.storage.calibration_file.clone();
        log_skipped(
            &channels
                .load_calibrations(&store, &file)
                .wrap_err("load calibration")?,
        );
        Ok(Self {
            channels,
            store,
            file,
            samples: cfg.acquisition.samples_per_read,
            timeout: Duration::from_millis(cfg.acquisition.read_timeout_ms),
        })
    }

    fn save(&mut self) -> Result<()> {
        self.channels
            .save_calibrations(&mut self.store, &self.file)
            .wrap_err("save calibration")
    }

    fn entry(&self, channel: usize) -> Option<CalibrationEntry> {
        self.channels
            .calibration(channel)
            .and_then(|c| c.to_entry(channel))
    }
}

fn log_skipped(report: &LoadReport) {
    for s in &report.skipped {
        warn!(entry = %s, "calibration entry ignored");
    }
}

fn reading_json(channel: usize, r: &Reading, calibrated: bool) -> serde_json::Value {
    json!({
        "channel": channel,
        "calibrated": calibrated,
        "mean": r.mean,
        "stdev": r.has_spread().then_some(r.stdev),
        "samples": r.samples,
        "warning": r.warning.map(|w| w.to_string()),
    })
}

fn print_reading(json_out: bool, channel: usize, r: &Reading, calibrated: bool) {
    if json_out {
        println!("{}", reading_json(channel, r, calibrated));
        return;
    }
    let unit = if calibrated { "" } else { " counts" };
    if r.has_spread() {
        println!(
            "channel {channel}: {:.3} ± {:.3}{unit} ({} samples)",
            r.mean, r.stdev, r.samples
        );
    } else {
        println!("channel {channel}: {:.3}{unit} (1 sample)", r.mean);
    }
    if let Some(w) = r.warning {
        println!("warning: {w}");
    }
}

fn print_entries(json_out: bool, entries: &[CalibrationEntry]) -> Result<()> {
    if json_out {
        println!("{}", serde_json::to_string(entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("no calibration records");
    }
    for e in entries {
        match (e.slope, e.slope_error) {
            (Some(s), Some(se)) => println!(
                "channel {}: offset {:.3} ± {:.3}, slope {:.6e} ± {:.3e}",
                e.slot, e.offset, e.offset_error, s, se
            ),
            _ => println!(
                "channel {}: offset {:.3} ± {:.3}, slope not calibrated",
                e.slot, e.offset, e.offset_error
            ),
        }
    }
    Ok(())
}

pub fn read(
    cfg: &Config,
    backend: Backend,
    json_out: bool,
    channel: usize,
    samples: Option<u32>,
    raw: bool,
) -> Result<()> {
    let mut st = Station::open(cfg, backend)?;
    let n = samples.unwrap_or(st.samples);
    let r = if raw {
        st.channels.read_raw_stats(channel, n, st.timeout)?
    } else {
        st.channels.read_calibrated_stats(channel, n, st.timeout)?
    };
    print_reading(json_out, channel, &r, !raw);
    Ok(())
}

pub fn calibrate(cfg: &Config, backend: Backend, json_out: bool, stage: CalibrateStage) -> Result<()> {
    let mut st = Station::open(cfg, backend)?;
    let (channel, r) = match stage {
        CalibrateStage::Offset { channel, samples } => {
            let n = samples.unwrap_or(st.samples);
            (channel, st.channels.calibrate_offset(channel, n, st.timeout)?)
        }
        CalibrateStage::Slope {
            channel,
            weight,
            weight_error,
            samples,
        } => {
            let n = samples.unwrap_or(st.samples);
            let r = st
                .channels
                .calibrate_slope(channel, n, weight, weight_error, st.timeout)?;
            (channel, r)
        }
    };
    st.save()?;
    if !json_out {
        print_reading(false, channel, &r, false);
    }
    print_entries(json_out, &st.entry(channel).into_iter().collect::<Vec<_>>())
}

fn import(st: &mut Station, path: &Path) -> Result<LoadReport> {
    let entries = irrigo_config::load_calibration_csv(path)?;
    let report = st.channels.replace_calibrations(&entries);
    log_skipped(&report);
    st.save()?;
    Ok(report)
}

pub fn calibration(
    cfg: &Config,
    backend: Backend,
    json_out: bool,
    action: CalibrationAction,
) -> Result<()> {
    let mut st = Station::open(cfg, backend)?;
    match action {
        CalibrationAction::Get { channel } => {
            let entries = match channel {
                Some(ch) => {
                    if ch >= st.channels.channel_count() {
                        return Err(irrigo_core::IrrigoError::InvalidChannel {
                            channel: ch,
                            count: st.channels.channel_count(),
                        }
                        .into());
                    }
                    st.entry(ch).into_iter().collect()
                }
                None => st.channels.calibration_entries(),
            };
            print_entries(json_out, &entries)
        }
        CalibrationAction::Set {
            channel,
            offset,
            offset_error,
            slope,
            slope_error,
        } => {
            let o = Estimate::new(offset, offset_error)?;
            let cal = match (slope, slope_error) {
                (Some(s), Some(se)) => Calibration::complete(o, Estimate::new(s, se)?),
                _ => Calibration::offset_only(o),
            };
            st.channels.set_calibration(channel, cal)?;
            st.save()?;
            print_entries(json_out, &st.entry(channel).into_iter().collect::<Vec<_>>())
        }
        CalibrationAction::Import { path } => {
            let report = import(&mut st, &path)
                .wrap_err_with(|| format!("import {}", path.display()))?;
            if json_out {
                println!(
                    "{}",
                    json!({ "loaded": report.loaded, "skipped": report.skipped })
                );
            } else {
                println!("imported {} records", report.loaded);
                for s in &report.skipped {
                    println!("skipped: {s}");
                }
            }
            Ok(())
        }
    }
}
