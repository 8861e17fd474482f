//! Streaming mean/variance (Welford).

use crate::error::{IrrigoError, Result, SoftWarning};

/// Spread reported for single-sample reads, where none can be estimated.
pub const SINGLE_SAMPLE_STDEV: f64 = -1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Welford {
    count: u32,
    mean: f64,
    m2: f64,
}

/// Finalized sample statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub mean: f64,
    pub stdev: f64,
    pub count: u32,
}

impl Welford {
    pub const fn new() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    #[inline]
    pub fn update(&mut self, sample: f64) {
        self.count += 1;
        let delta = sample - self.mean;
        self.mean += delta / f64::from(self.count);
        self.m2 += delta * (sample - self.mean);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Mean and sample standard deviation; needs at least two samples.
    pub fn finalize(&self) -> Result<Summary> {
        if self.count < 2 {
            return Err(IrrigoError::InsufficientSamples {
                obtained: self.count,
                requested: 2,
            });
        }
        let var = (self.m2 / f64::from(self.count - 1)).max(0.0);
        Ok(Summary {
            mean: self.mean,
            stdev: var.sqrt(),
            count: self.count,
        })
    }
}

/// A statistical read of one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub mean: f64,
    /// Sample standard deviation, or [`SINGLE_SAMPLE_STDEV`].
    pub stdev: f64,
    /// Valid samples that went into `mean`.
    pub samples: u32,
    pub warning: Option<SoftWarning>,
}

impl Reading {
    pub fn has_spread(&self) -> bool {
        self.stdev >= 0.0
    }
}
