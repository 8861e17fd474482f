//! Non-blocking protocol steps.
//!
//! A step is ticked once per control-loop pass with the latest calibrated
//! weight and the current millisecond clock. Timestamps are latched on the
//! wrapping `u32` clock and compared with [`timer_finished`], so a step
//! spanning the counter rollover behaves the same as any other.
//!
//! Each step exposes a small `phase` number that is 0 whenever the step is
//! not in progress and goes back to 0 on the tick that reports completion.
//! [`Step::progress`] and [`Step::restore`] carry phase and elapsed time
//! across a restart; a step restored without progress starts over from
//! phase 0.

use irrigo_config::StepRecord;
use irrigo_config::records::{STEP_HOLD_WEIGHT, STEP_OSCILLATE, STEP_WAIT};
use irrigo_traits::timer_finished;
use tracing::trace;

use crate::error::{IrrigoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Wait,
    HoldWeight,
    OscillateInRange,
}

/// Result of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepOutcome {
    pub finished: bool,
    pub should_water: bool,
}

impl StepOutcome {
    const IDLE: Self = Self {
        finished: false,
        should_water: false,
    };
    const WATER: Self = Self {
        finished: false,
        should_water: true,
    };
    const DONE: Self = Self {
        finished: true,
        should_water: false,
    };
}

/// Read-only context for a tick. Steps may log it but never act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepContext {
    pub channel: usize,
    pub previous: Option<StepKind>,
}

/// Resumable progress of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepProgress {
    pub phase: u8,
    pub elapsed_ms: u32,
    pub cycles_done: u32,
}

impl StepProgress {
    pub fn is_initial(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    duration_ms: u32,
    started_at: Option<u32>,
}

impl Wait {
    pub fn new(duration_ms: u32) -> Self {
        Self {
            duration_ms,
            started_at: None,
        }
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    fn tick(&mut self, now: u32) -> StepOutcome {
        let start = *self.started_at.get_or_insert(now);
        if timer_finished(start, self.duration_ms, now) {
            self.started_at = None;
            StepOutcome::DONE
        } else {
            StepOutcome::IDLE
        }
    }
}

/// Bring the weight into `target ± tolerance` and keep it there for
/// `min_hold_ms` without interruption.
#[derive(Debug, Clone, PartialEq)]
pub struct HoldWeight {
    target: f64,
    tolerance: f64,
    min_hold_ms: u32,
    holding_since: Option<u32>,
}

impl HoldWeight {
    pub fn new(target: f64, tolerance: f64, min_hold_ms: u32) -> Result<Self> {
        if !target.is_finite() || !tolerance.is_finite() || tolerance < 0.0 {
            return Err(IrrigoError::Validation(format!(
                "hold weight needs a finite target and non-negative tolerance (got {target} ± {tolerance})"
            )));
        }
        Ok(Self {
            target,
            tolerance,
            min_hold_ms,
            holding_since: None,
        })
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn min_hold_ms(&self) -> u32 {
        self.min_hold_ms
    }

    fn tick(&mut self, weight: f64, now: u32) -> StepOutcome {
        let in_band = (weight - self.target).abs() <= self.tolerance;
        match (self.holding_since, in_band) {
            (None, false) => {
                if weight < self.target {
                    StepOutcome::WATER
                } else {
                    StepOutcome::IDLE
                }
            }
            (None, true) if self.min_hold_ms == 0 => StepOutcome::DONE,
            (None, true) => {
                self.holding_since = Some(now);
                StepOutcome::IDLE
            }
            (Some(since), true) => {
                if timer_finished(since, self.min_hold_ms, now) {
                    self.holding_since = None;
                    StepOutcome::DONE
                } else {
                    StepOutcome::IDLE
                }
            }
            (Some(_), false) => {
                // the hold must be continuous
                self.holding_since = None;
                if weight < self.target - self.tolerance {
                    StepOutcome::WATER
                } else {
                    StepOutcome::IDLE
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Swing {
    Filling,
    Draining,
}

/// Water up to `upper`, then let the weight drift down to `lower` with at
/// least `pause_ms` between the top and the next fill; repeat `cycles` times.
///
/// A cycle counts when the weight is back at or below `lower` after the
/// pause. Reaching `upper` is what switches from filling to draining.
#[derive(Debug, Clone, PartialEq)]
pub struct OscillateInRange {
    lower: f64,
    upper: f64,
    cycles: u32,
    pause_ms: u32,
    swing: Swing,
    paused_at: Option<u32>,
    done: u32,
}

impl OscillateInRange {
    pub fn new(lower: f64, upper: f64, cycles: u32, pause_ms: u32) -> Result<Self> {
        if !lower.is_finite() || !upper.is_finite() || lower >= upper {
            return Err(IrrigoError::Validation(format!(
                "oscillation needs finite bounds with lower < upper (got {lower}..{upper})"
            )));
        }
        Ok(Self {
            lower,
            upper,
            cycles,
            pause_ms,
            swing: Swing::Filling,
            paused_at: None,
            done: 0,
        })
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn pause_ms(&self) -> u32 {
        self.pause_ms
    }

    pub fn cycles_done(&self) -> u32 {
        self.done
    }

    fn reset(&mut self) {
        self.swing = Swing::Filling;
        self.paused_at = None;
        self.done = 0;
    }

    fn tick(&mut self, weight: f64, now: u32) -> StepOutcome {
        if self.cycles == 0 {
            return StepOutcome::DONE;
        }
        match self.swing {
            Swing::Filling if weight >= self.upper => {
                self.swing = Swing::Draining;
                self.paused_at = Some(now);
                StepOutcome::IDLE
            }
            Swing::Filling => StepOutcome::WATER,
            Swing::Draining => {
                let since = *self.paused_at.get_or_insert(now);
                if weight > self.lower || !timer_finished(since, self.pause_ms, now) {
                    return StepOutcome::IDLE;
                }
                self.done += 1;
                if self.done >= self.cycles {
                    self.reset();
                    StepOutcome::DONE
                } else {
                    self.swing = Swing::Filling;
                    self.paused_at = None;
                    StepOutcome::IDLE
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Wait(Wait),
    HoldWeight(HoldWeight),
    OscillateInRange(OscillateInRange),
}

impl Step {
    pub fn wait(duration_ms: u32) -> Self {
        Step::Wait(Wait::new(duration_ms))
    }

    pub fn hold_weight(target: f64, tolerance: f64, min_hold_ms: u32) -> Result<Self> {
        HoldWeight::new(target, tolerance, min_hold_ms).map(Step::HoldWeight)
    }

    pub fn oscillate(lower: f64, upper: f64, cycles: u32, pause_ms: u32) -> Result<Self> {
        OscillateInRange::new(lower, upper, cycles, pause_ms).map(Step::OscillateInRange)
    }

    pub fn kind(&self) -> StepKind {
        match self {
            Step::Wait(_) => StepKind::Wait,
            Step::HoldWeight(_) => StepKind::HoldWeight,
            Step::OscillateInRange(_) => StepKind::OscillateInRange,
        }
    }

    pub fn tick(&mut self, weight: f64, now_ms: u32, ctx: &StepContext) -> StepOutcome {
        let out = match self {
            Step::Wait(s) => s.tick(now_ms),
            Step::HoldWeight(s) => s.tick(weight, now_ms),
            Step::OscillateInRange(s) => s.tick(weight, now_ms),
        };
        trace!(
            channel = ctx.channel,
            kind = ?self.kind(),
            previous = ?ctx.previous,
            weight,
            finished = out.finished,
            water = out.should_water,
            "step tick"
        );
        out
    }

    pub fn phase(&self) -> u8 {
        match self {
            Step::Wait(s) => u8::from(s.started_at.is_some()),
            Step::HoldWeight(s) => u8::from(s.holding_since.is_some()),
            Step::OscillateInRange(s) => u8::from(s.swing == Swing::Draining),
        }
    }

    pub fn progress(&self, now_ms: u32) -> StepProgress {
        let since = match self {
            Step::Wait(s) => s.started_at,
            Step::HoldWeight(s) => s.holding_since,
            Step::OscillateInRange(s) => s.paused_at,
        };
        StepProgress {
            phase: self.phase(),
            elapsed_ms: since.map_or(0, |t| now_ms.wrapping_sub(t)),
            cycles_done: match self {
                Step::OscillateInRange(s) => s.done,
                _ => 0,
            },
        }
    }

    /// Re-latch timestamps so that `elapsed_ms` has already passed at `now_ms`.
    pub fn restore(&mut self, p: StepProgress, now_ms: u32) -> Result<()> {
        if p.phase > 1 {
            return Err(IrrigoError::Validation(format!(
                "step phase {} out of range",
                p.phase
            )));
        }
        let latched = (p.phase == 1).then(|| now_ms.wrapping_sub(p.elapsed_ms));
        match self {
            Step::Wait(s) => s.started_at = latched,
            Step::HoldWeight(s) => s.holding_since = latched,
            Step::OscillateInRange(s) => {
                if s.cycles > 0 && p.cycles_done >= s.cycles {
                    return Err(IrrigoError::Validation(format!(
                        "{} of {} oscillations already done",
                        p.cycles_done, s.cycles
                    )));
                }
                s.swing = if p.phase == 1 {
                    Swing::Draining
                } else {
                    Swing::Filling
                };
                s.paused_at = latched;
                s.done = p.cycles_done;
            }
        }
        if !matches!(self, Step::OscillateInRange(_)) && p.cycles_done != 0 {
            return Err(IrrigoError::Validation(
                "only oscillation steps count cycles".into(),
            ));
        }
        Ok(())
    }

    /// Back to phase 0 with nothing latched.
    pub fn reset(&mut self) {
        match self {
            Step::Wait(s) => s.started_at = None,
            Step::HoldWeight(s) => s.holding_since = None,
            Step::OscillateInRange(s) => s.reset(),
        }
    }

    /// Persisted form; progress keys are written only when given.
    pub fn to_record(&self, progress: Option<StepProgress>) -> StepRecord {
        let mut r = match self {
            Step::Wait(s) => StepRecord {
                kind: STEP_WAIT,
                w: Some(s.duration_ms.into()),
                ..StepRecord::default()
            },
            Step::HoldWeight(s) => StepRecord {
                kind: STEP_HOLD_WEIGHT,
                w: serde_json::Number::from_f64(s.target),
                tolerance: Some(s.tolerance),
                min_hold_ms: Some(s.min_hold_ms),
                ..StepRecord::default()
            },
            Step::OscillateInRange(s) => StepRecord {
                kind: STEP_OSCILLATE,
                lower: Some(s.lower),
                upper: Some(s.upper),
                cycles: Some(s.cycles),
                pause_ms: Some(s.pause_ms),
                ..StepRecord::default()
            },
        };
        if let Some(p) = progress.filter(|p| !p.is_initial()) {
            r.phase = Some(p.phase);
            r.elapsed_ms = Some(p.elapsed_ms);
            r.cycles_done = (p.cycles_done > 0).then_some(p.cycles_done);
        }
        r
    }

    /// Build from the persisted form, restoring any progress keys.
    pub fn from_record(r: &StepRecord, now_ms: u32) -> Result<Self> {
        let mut step = Self::try_from(r)?;
        if r.phase.is_some() || r.elapsed_ms.is_some() || r.cycles_done.is_some() {
            step.restore(
                StepProgress {
                    phase: r.phase.unwrap_or(0),
                    elapsed_ms: r.elapsed_ms.unwrap_or(0),
                    cycles_done: r.cycles_done.unwrap_or(0),
                },
                now_ms,
            )?;
        }
        Ok(step)
    }
}

fn missing(kind: &str, key: &str) -> IrrigoError {
    IrrigoError::Validation(format!("{kind} step is missing \"{key}\""))
}

impl TryFrom<&StepRecord> for Step {
    type Error = IrrigoError;

    fn try_from(r: &StepRecord) -> Result<Self> {
        match r.kind {
            STEP_WAIT => {
                let w = r.w.as_ref().ok_or_else(|| missing("wait", "w"))?;
                let ms = w
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| {
                        IrrigoError::Validation(format!("wait duration {w} is not a u32"))
                    })?;
                Ok(Step::wait(ms))
            }
            STEP_HOLD_WEIGHT => {
                let target = r
                    .w
                    .as_ref()
                    .and_then(serde_json::Number::as_f64)
                    .ok_or_else(|| missing("hold-weight", "w"))?;
                Step::hold_weight(
                    target,
                    r.tolerance.ok_or_else(|| missing("hold-weight", "a"))?,
                    r.min_hold_ms.ok_or_else(|| missing("hold-weight", "m"))?,
                )
            }
            STEP_OSCILLATE => Step::oscillate(
                r.lower.ok_or_else(|| missing("oscillate", "l"))?,
                r.upper.ok_or_else(|| missing("oscillate", "u"))?,
                r.cycles.ok_or_else(|| missing("oscillate", "n"))?,
                r.pause_ms.ok_or_else(|| missing("oscillate", "p"))?,
            ),
            other => Err(IrrigoError::Validation(format!(
                "unknown step type {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: StepContext = StepContext {
        channel: 0,
        previous: None,
    };

    #[test]
    fn wait_latches_on_first_tick() {
        let mut s = Step::wait(100);
        assert_eq!(s.tick(0.0, 5_000, &CTX), StepOutcome::IDLE);
        assert_eq!(s.phase(), 1);
        assert_eq!(s.tick(0.0, 5_099, &CTX), StepOutcome::IDLE);
        assert_eq!(s.tick(0.0, 5_100, &CTX), StepOutcome::DONE);
        assert_eq!(s.phase(), 0);
    }

    #[test]
    fn zero_wait_finishes_immediately() {
        let mut s = Step::wait(0);
        assert_eq!(s.tick(0.0, 1, &CTX), StepOutcome::DONE);
        assert_eq!(s.phase(), 0);
    }

    #[test]
    fn wait_across_rollover() {
        let mut s = Step::wait(20);
        let t0 = u32::MAX - 5;
        assert!(!s.tick(0.0, t0, &CTX).finished);
        assert!(!s.tick(0.0, t0.wrapping_add(19), &CTX).finished);
        assert!(s.tick(0.0, t0.wrapping_add(20), &CTX).finished);
    }

    #[test]
    fn hold_weight_waters_until_in_band_then_holds() {
        let mut s = Step::hold_weight(100.0, 2.0, 1_000).unwrap();
        let mut t = 0;
        for _ in 0..5 {
            let o = s.tick(50.0, t, &CTX);
            assert!(o.should_water && !o.finished);
            t += 10;
        }
        // entering the band starts the hold
        assert_eq!(s.tick(98.0, t, &CTX), StepOutcome::IDLE);
        assert_eq!(s.phase(), 1);
        // still inside: no water even though below target
        assert_eq!(s.tick(99.0, t + 500, &CTX), StepOutcome::IDLE);
        // drifting below the band asks for water and restarts the hold
        assert_eq!(s.tick(97.9, t + 600, &CTX), StepOutcome::WATER);
        assert_eq!(s.phase(), 0);
        assert_eq!(s.tick(100.0, t + 700, &CTX), StepOutcome::IDLE);
        assert!(!s.tick(100.0, t + 1_699, &CTX).finished);
        assert_eq!(s.tick(101.0, t + 1_700, &CTX), StepOutcome::DONE);
        assert_eq!(s.phase(), 0);
    }

    #[test]
    fn hold_weight_above_band_never_waters() {
        let mut s = Step::hold_weight(100.0, 2.0, 0).unwrap();
        assert_eq!(s.tick(150.0, 0, &CTX), StepOutcome::IDLE);
        assert_eq!(s.tick(101.0, 1, &CTX), StepOutcome::DONE);
    }

    #[test]
    fn hold_weight_rejects_bad_params() {
        assert!(Step::hold_weight(f64::NAN, 1.0, 0).is_err());
        assert!(Step::hold_weight(1.0, -1.0, 0).is_err());
    }

    #[test]
    fn oscillation_counts_cycles() {
        let mut s = Step::oscillate(10.0, 20.0, 2, 100).unwrap();
        // fill
        assert_eq!(s.tick(5.0, 0, &CTX), StepOutcome::WATER);
        assert_eq!(s.tick(20.0, 10, &CTX), StepOutcome::IDLE);
        // low but pause not over
        assert_eq!(s.tick(9.0, 50, &CTX), StepOutcome::IDLE);
        // pause over but still high
        assert_eq!(s.tick(15.0, 200, &CTX), StepOutcome::IDLE);
        assert_eq!(s.tick(10.0, 210, &CTX), StepOutcome::IDLE);
        assert_eq!(s.progress(210).cycles_done, 1);
        // second cycle
        assert_eq!(s.tick(10.0, 220, &CTX), StepOutcome::WATER);
        assert_eq!(s.tick(25.0, 230, &CTX), StepOutcome::IDLE);
        assert_eq!(s.tick(8.0, 330, &CTX), StepOutcome::DONE);
        assert_eq!(s.phase(), 0);
        assert_eq!(s.progress(330).cycles_done, 0);
    }

    #[test]
    fn zero_cycles_finish_immediately() {
        let mut s = Step::oscillate(1.0, 2.0, 0, 10).unwrap();
        assert_eq!(s.tick(0.0, 0, &CTX), StepOutcome::DONE);
    }

    #[test]
    fn oscillation_needs_ordered_bounds() {
        assert!(Step::oscillate(5.0, 5.0, 1, 0).is_err());
        assert!(Step::oscillate(6.0, 5.0, 1, 0).is_err());
    }

    #[test]
    fn restore_keeps_elapsed_time() {
        let mut s = Step::wait(1_000);
        s.tick(0.0, 10_000, &CTX);
        let p = s.progress(10_400);
        assert_eq!(p, StepProgress { phase: 1, elapsed_ms: 400, cycles_done: 0 });

        // simulated restart with a fresh clock
        let mut resumed = Step::wait(1_000);
        resumed.restore(p, 3).unwrap();
        assert!(!resumed.tick(0.0, 602, &CTX).finished);
        assert!(resumed.tick(0.0, 603, &CTX).finished);
    }

    #[test]
    fn record_round_trip_with_progress() {
        let mut s = Step::oscillate(10.0, 20.0, 3, 50).unwrap();
        s.tick(5.0, 0, &CTX);
        s.tick(21.0, 100, &CTX);
        let rec = s.to_record(Some(s.progress(130)));
        assert_eq!(rec.phase, Some(1));
        assert_eq!(rec.elapsed_ms, Some(30));
        let back = Step::from_record(&rec, 1_000).unwrap();
        assert_eq!(back.progress(1_000), s.progress(130));
    }

    #[test]
    fn record_validation() {
        let bad_kind = StepRecord {
            kind: 9,
            ..StepRecord::default()
        };
        assert!(Step::try_from(&bad_kind).is_err());
        let no_tol = StepRecord {
            kind: STEP_HOLD_WEIGHT,
            w: serde_json::Number::from_f64(5.0),
            min_hold_ms: Some(0),
            ..StepRecord::default()
        };
        assert!(Step::try_from(&no_tol).is_err());
        let frac_wait: StepRecord = serde_json::from_str(r#"{"t":1,"w":1.5}"#).unwrap();
        assert!(Step::try_from(&frac_wait).is_err());
        let bad_phase = StepRecord {
            kind: STEP_WAIT,
            w: Some(10u32.into()),
            phase: Some(4),
            ..StepRecord::default()
        };
        assert!(Step::from_record(&bad_phase, 0).is_err());
    }
}
