//! Multiplexed channel manager.
//!
//! One load cell converter sits behind a binary selector: line `i` carries
//! bit `i` of the channel number. The manager owns the converter, the
//! selector and one [`Calibration`] per channel.

use std::collections::HashSet;
use std::time::Duration;

use irrigo_config::CalibrationEntry;
use irrigo_traits::{BlobStore, LoadCell, OutputPin};
use tracing::{debug, info, trace, warn};

use crate::calibration::{Calibration, Estimate};
use crate::error::{IrrigoError, Result, SoftWarning};
use crate::hw_error::map_boxed;
use crate::stats::{Reading, SINGLE_SAMPLE_STDEV, Welford};

pub const MAX_SELECT_LINES: usize = 8;

/// Binary channel selector.
pub struct MuxSelector<P> {
    lines: Vec<P>,
    current: Option<usize>,
}

impl<P: OutputPin> MuxSelector<P> {
    pub fn new(lines: Vec<P>) -> Result<Self> {
        if lines.is_empty() || lines.len() > MAX_SELECT_LINES {
            return Err(IrrigoError::Validation(format!(
                "selector needs 1..={MAX_SELECT_LINES} lines, got {}",
                lines.len()
            )));
        }
        Ok(Self {
            lines,
            current: None,
        })
    }

    pub fn channel_count(&self) -> usize {
        1 << self.lines.len()
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    /// Drive the lines for `channel`. Returns whether anything was written.
    pub fn select(&mut self, channel: usize) -> Result<bool> {
        let count = self.channel_count();
        if channel >= count {
            return Err(IrrigoError::InvalidChannel { channel, count });
        }
        if self.current == Some(channel) {
            return Ok(false);
        }
        for (bit, line) in self.lines.iter_mut().enumerate() {
            line.set_level(channel & (1 << bit) != 0);
        }
        self.current = Some(channel);
        debug!(channel, "selector switched");
        Ok(true)
    }
}

/// Outcome of loading a persisted calibration set.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LoadReport {
    pub loaded: usize,
    /// One message per entry that was not applied.
    pub skipped: Vec<String>,
}

pub struct ChannelManager<L, P> {
    cell: L,
    selector: MuxSelector<P>,
    calibrations: Vec<Calibration>,
}

impl<L: LoadCell, P: OutputPin> ChannelManager<L, P> {
    pub fn new(cell: L, selector: MuxSelector<P>) -> Self {
        let calibrations = vec![Calibration::empty(); selector.channel_count()];
        Self {
            cell,
            selector,
            calibrations,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.calibrations.len()
    }

    fn check(&self, channel: usize) -> Result<()> {
        if channel >= self.channel_count() {
            return Err(IrrigoError::InvalidChannel {
                channel,
                count: self.channel_count(),
            });
        }
        Ok(())
    }

    pub fn select(&mut self, channel: usize) -> Result<()> {
        self.selector.select(channel).map(|_| ())
    }

    pub fn selected(&self) -> Option<usize> {
        self.selector.current()
    }

    pub fn read_raw_single(&mut self, channel: usize, timeout: Duration) -> Result<i32> {
        self.select(channel)?;
        let raw = self.cell.read_raw(timeout).map_err(map_boxed)?;
        trace!(channel, raw, "raw sample");
        Ok(raw)
    }

    /// Mean and spread of `n` raw samples.
    ///
    /// Failed samples are dropped as long as two valid ones remain; the
    /// reading then carries [`SoftWarning::SamplesDropped`]. `n == 1` skips
    /// statistics and reports [`SINGLE_SAMPLE_STDEV`].
    pub fn read_raw_stats(&mut self, channel: usize, n: u32, timeout: Duration) -> Result<Reading> {
        if n == 0 {
            return Err(IrrigoError::Validation(
                "sample count must be at least 1".into(),
            ));
        }
        self.select(channel)?;
        if n == 1 {
            let raw = self.read_raw_single(channel, timeout)?;
            warn!(channel, "single-sample read has no spread estimate");
            return Ok(Reading {
                mean: f64::from(raw),
                stdev: SINGLE_SAMPLE_STDEV,
                samples: 1,
                warning: Some(SoftWarning::SingleSample),
            });
        }

        let mut agg = Welford::new();
        let mut last_err = None;
        for _ in 0..n {
            match self.cell.read_raw(timeout) {
                Ok(raw) => {
                    trace!(channel, raw, "raw sample");
                    agg.update(f64::from(raw));
                }
                Err(e) => {
                    let err = map_boxed(e);
                    debug!(channel, error = %err, "sample dropped");
                    last_err = Some(err);
                }
            }
        }

        let obtained = agg.count();
        if obtained < 2 {
            // a lone timeout is more useful to the caller than a count
            if obtained == 0 {
                if let Some(e @ IrrigoError::Timeout) = last_err {
                    return Err(e);
                }
            }
            return Err(IrrigoError::InsufficientSamples {
                obtained,
                requested: n,
            });
        }
        let s = agg.finalize()?;
        let warning = (obtained < n).then(|| {
            warn!(channel, requested = n, obtained, "samples dropped");
            SoftWarning::SamplesDropped {
                requested: n,
                obtained,
            }
        });
        Ok(Reading {
            mean: s.mean,
            stdev: s.stdev,
            samples: obtained,
            warning,
        })
    }

    pub fn read_calibrated_stats(
        &mut self,
        channel: usize,
        n: u32,
        timeout: Duration,
    ) -> Result<Reading> {
        self.check(channel)?;
        let cal = self.calibrations[channel];
        if !cal.is_complete() {
            return Err(IrrigoError::CalibrationState(format!(
                "channel {channel} is not fully calibrated"
            )));
        }
        let raw = self.read_raw_stats(channel, n, timeout)?;
        cal.apply(&raw)
    }

    /// Zero-point calibration from the unloaded cell.
    pub fn calibrate_offset(&mut self, channel: usize, n: u32, timeout: Duration) -> Result<Reading> {
        self.check(channel)?;
        let raw = self.read_raw_stats(channel, calibration_samples(n)?, timeout)?;
        let est = Estimate::new(raw.mean, spread_for_calibration(&raw)?)?;
        self.calibrations[channel].set_offset(est);
        info!(channel, offset = est.value, offset_error = est.error, "offset calibrated");
        Ok(raw)
    }

    /// Slope calibration from a known reference weight on the cell.
    pub fn calibrate_slope(
        &mut self,
        channel: usize,
        n: u32,
        known_weight: f64,
        weight_error: f64,
        timeout: Duration,
    ) -> Result<Reading> {
        self.check(channel)?;
        if self.calibrations[channel].offset().is_none() {
            return Err(IrrigoError::CalibrationState(format!(
                "channel {channel} needs an offset before its slope"
            )));
        }
        let raw = self.read_raw_stats(channel, calibration_samples(n)?, timeout)?;
        spread_for_calibration(&raw)?;
        let est = self.calibrations[channel].fit_slope(&raw, known_weight, weight_error)?;
        info!(channel, slope = est.value, slope_error = est.error, "slope calibrated");
        Ok(raw)
    }

    pub fn calibration(&self, channel: usize) -> Option<&Calibration> {
        self.calibrations.get(channel)
    }

    pub fn set_calibration(&mut self, channel: usize, cal: Calibration) -> Result<()> {
        self.check(channel)?;
        self.calibrations[channel] = cal;
        Ok(())
    }

    /// Sparse persisted form: populated channels only.
    pub fn calibration_entries(&self) -> Vec<CalibrationEntry> {
        self.calibrations
            .iter()
            .enumerate()
            .filter_map(|(slot, c)| c.to_entry(slot))
            .collect()
    }

    /// Replace every record from `entries`.
    ///
    /// Bad entries are skipped one by one; a list longer than the channel
    /// count is truncated. Channels not mentioned end up unpopulated.
    pub fn replace_calibrations(&mut self, entries: &[CalibrationEntry]) -> LoadReport {
        let mut report = LoadReport::default();
        let count = self.channel_count();
        let mut fresh = vec![Calibration::empty(); count];
        let mut seen = HashSet::new();

        if entries.len() > count {
            let msg = format!(
                "{} entries for {count} channels; extra entries ignored",
                entries.len()
            );
            warn!("{msg}");
            report.skipped.push(msg);
        }
        for e in entries.iter().take(count) {
            let slot = e.slot as usize;
            if slot >= count {
                let msg = format!("slot {slot} out of range");
                warn!(slot, "calibration entry skipped: out of range");
                report.skipped.push(msg);
                continue;
            }
            if !seen.insert(slot) {
                warn!(slot, "calibration entry skipped: duplicate slot");
                report.skipped.push(format!("slot {slot} listed twice"));
                continue;
            }
            match Calibration::try_from(e) {
                Ok(c) => {
                    fresh[slot] = c;
                    report.loaded += 1;
                }
                Err(err) => {
                    warn!(slot, error = %err, "calibration entry skipped");
                    report.skipped.push(format!("slot {slot}: {err}"));
                }
            }
        }
        self.calibrations = fresh;
        report
    }

    /// Parse and apply a persisted calibration document.
    ///
    /// Only a document that is not a JSON array fails as a whole; entries
    /// that do not match the record shape are skipped like any other bad
    /// entry.
    pub fn load_calibrations_json(&mut self, bytes: &[u8]) -> Result<LoadReport> {
        let items: Vec<serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|e| IrrigoError::Validation(format!("calibration document: {e}")))?;
        let mut parsed = Vec::with_capacity(items.len());
        let mut malformed = Vec::new();
        for (idx, item) in items.into_iter().enumerate() {
            match serde_json::from_value::<CalibrationEntry>(item) {
                Ok(e) => parsed.push(e),
                Err(e) => {
                    warn!(index = idx, error = %e, "malformed calibration entry skipped");
                    malformed.push(format!("entry {idx}: {e}"));
                }
            }
        }
        let mut report = self.replace_calibrations(&parsed);
        report.skipped.extend(malformed);
        Ok(report)
    }

    pub fn calibrations_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.calibration_entries())
            .map_err(|e| IrrigoError::Validation(format!("encode calibration: {e}")))
    }

    /// Load from `store`; a missing document leaves every channel empty.
    pub fn load_calibrations(&mut self, store: &dyn BlobStore, name: &str) -> Result<LoadReport> {
        match store.read(name).map_err(map_boxed)? {
            Some(bytes) => {
                let report = self.load_calibrations_json(&bytes)?;
                info!(
                    loaded = report.loaded,
                    skipped = report.skipped.len(),
                    "calibration loaded"
                );
                Ok(report)
            }
            None => {
                info!(name, "no stored calibration");
                Ok(self.replace_calibrations(&[]))
            }
        }
    }

    pub fn save_calibrations(&self, store: &mut dyn BlobStore, name: &str) -> Result<()> {
        let bytes = self.calibrations_json()?;
        store.write(name, &bytes).map_err(map_boxed)
    }

    pub fn power_down(&mut self, channel: usize, wait: bool) -> Result<()> {
        self.select(channel)?;
        self.cell.power_down(wait).map_err(map_boxed)
    }

    pub fn power_up(&mut self, channel: usize) -> Result<()> {
        self.select(channel)?;
        self.cell.power_up().map_err(map_boxed)
    }
}

/// Calibration needs a measured spread, so one sample is not enough.
fn calibration_samples(n: u32) -> Result<u32> {
    if n < 2 {
        return Err(IrrigoError::Validation(format!(
            "calibration needs at least 2 samples per read (got {n})"
        )));
    }
    Ok(n)
}

fn spread_for_calibration(raw: &Reading) -> Result<f64> {
    if raw.has_spread() {
        Ok(raw.stdev)
    } else {
        Err(IrrigoError::Validation(format!(
            "calibration read kept {} sample(s); no spread to record",
            raw.samples
        )))
    }
}
