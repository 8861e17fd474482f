//! Per-channel linear calibration with propagated uncertainty.
//!
//! The model is a tare-and-scale line: `value = slope · (raw − offset)`.
//! `offset` is the raw mean of the unloaded cell and `slope` converts raw
//! counts above that zero point into weight units. Both carry a 1σ error
//! that is propagated linearly into every calibrated reading.

use irrigo_config::CalibrationEntry;

use crate::error::{IrrigoError, Result};
use crate::stats::Reading;

/// A value with its 1σ uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub value: f64,
    pub error: f64,
}

impl Estimate {
    pub fn new(value: f64, error: f64) -> Result<Self> {
        if !value.is_finite() || !error.is_finite() || error < 0.0 {
            return Err(IrrigoError::Validation(format!(
                "estimate must be finite with non-negative error (got {value} ± {error})"
            )));
        }
        Ok(Self { value, error })
    }
}

/// Calibration record for one channel.
///
/// A slope is only ever present together with an offset; the constructors
/// are the only way in, so that holds for every value of this type.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Calibration {
    offset: Option<Estimate>,
    slope: Option<Estimate>,
}

impl Calibration {
    pub const fn empty() -> Self {
        Self {
            offset: None,
            slope: None,
        }
    }

    pub fn offset_only(offset: Estimate) -> Self {
        Self {
            offset: Some(offset),
            slope: None,
        }
    }

    pub fn complete(offset: Estimate, slope: Estimate) -> Self {
        Self {
            offset: Some(offset),
            slope: Some(slope),
        }
    }

    pub fn offset(&self) -> Option<Estimate> {
        self.offset
    }

    pub fn slope(&self) -> Option<Estimate> {
        self.slope
    }

    /// Anything worth persisting.
    pub fn is_populated(&self) -> bool {
        self.offset.is_some()
    }

    /// Usable for calibrated reads.
    pub fn is_complete(&self) -> bool {
        self.offset.is_some() && self.slope.is_some()
    }

    /// Replace the zero point; an existing slope is kept.
    pub fn set_offset(&mut self, offset: Estimate) {
        self.offset = Some(offset);
    }

    /// Fit the slope from a raw read of a known reference weight.
    ///
    /// With `Δ = raw_mean − offset`:
    /// `slope = known / Δ` and
    /// `σ_slope² = (σ_known / Δ)² + (known / Δ²)² · (σ_offset² + σ_raw²)`.
    pub fn fit_slope(&mut self, raw: &Reading, known: f64, known_error: f64) -> Result<Estimate> {
        let offset = self.offset.ok_or_else(|| {
            IrrigoError::CalibrationState("offset must be calibrated before slope".into())
        })?;
        if !known.is_finite() || !known_error.is_finite() || known_error < 0.0 {
            return Err(IrrigoError::Validation(format!(
                "reference weight must be finite with non-negative error (got {known} ± {known_error})"
            )));
        }
        let delta = raw.mean - offset.value;
        if delta == 0.0 {
            return Err(IrrigoError::CalibrationState(
                "reference reading equals the zero point; load the cell and retry".into(),
            ));
        }
        let raw_sd = raw_spread(raw);
        let slope = known / delta;
        let var = (known_error / delta).powi(2)
            + (known / (delta * delta)).powi(2) * (offset.error.powi(2) + raw_sd.powi(2));
        let est = Estimate::new(slope, var.sqrt()).map_err(|_| {
            IrrigoError::CalibrationState(format!("slope fit is not finite ({slope})"))
        })?;
        self.slope = Some(est);
        Ok(est)
    }

    /// Apply to a raw read; fails unless both stages are calibrated.
    ///
    /// `σ² = slope²·σ_offset² + σ_slope²·(raw − offset)² + slope²·σ_raw²`
    pub fn apply(&self, raw: &Reading) -> Result<Reading> {
        let (Some(o), Some(s)) = (self.offset, self.slope) else {
            return Err(IrrigoError::CalibrationState(if self.offset.is_none() {
                "channel has no offset calibration".into()
            } else {
                "channel has no slope calibration".into()
            }));
        };
        let delta = raw.mean - o.value;
        let raw_sd = raw_spread(raw);
        let var = (s.value * o.error).powi(2)
            + (s.error * delta).powi(2)
            + (s.value * raw_sd).powi(2);
        Ok(Reading {
            mean: s.value * delta,
            stdev: var.sqrt(),
            samples: raw.samples,
            warning: raw.warning,
        })
    }

    /// `None` for unpopulated records, which are never persisted.
    pub fn to_entry(&self, slot: usize) -> Option<CalibrationEntry> {
        let o = self.offset?;
        Some(CalibrationEntry {
            slot: u32::try_from(slot).ok()?,
            offset: o.value,
            offset_error: o.error,
            slope: self.slope.map(|s| s.value),
            slope_error: self.slope.map(|s| s.error),
        })
    }
}

impl TryFrom<&CalibrationEntry> for Calibration {
    type Error = IrrigoError;

    fn try_from(e: &CalibrationEntry) -> Result<Self> {
        let offset = Estimate::new(e.offset, e.offset_error)?;
        match (e.slope, e.slope_error) {
            (None, None) => Ok(Self::offset_only(offset)),
            (Some(s), Some(se)) => Ok(Self::complete(offset, Estimate::new(s, se)?)),
            _ => Err(IrrigoError::Validation(
                "slope and slope error must appear together".into(),
            )),
        }
    }
}

/// Single-sample reads carry a negative sentinel; they contribute no spread.
fn raw_spread(raw: &Reading) -> f64 {
    if raw.has_spread() { raw.stdev } else { 0.0 }
}
