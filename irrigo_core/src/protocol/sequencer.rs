//! Ordered, optionally cyclic list of steps for one channel.

use irrigo_config::ProtocolRecord;
use tracing::debug;

use super::step::{Step, StepContext, StepKind};
use crate::error::{IrrigoError, Result};

/// Longest protocol accepted for one channel.
pub const MAX_STEPS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SequencerTick {
    pub should_water: bool,
    pub finished: bool,
    pub current_step: usize,
    pub current_cycle: u32,
}

/// Runs steps in order. A non-cyclic sequencer that completed its cycle stays
/// finished until [`Sequencer::reset`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sequencer {
    steps: Vec<Step>,
    cyclic: bool,
    current_step: usize,
    current_cycle: u32,
    channel: usize,
}

impl Sequencer {
    pub fn new(steps: Vec<Step>, cyclic: bool) -> Result<Self> {
        if steps.is_empty() {
            return Err(IrrigoError::Validation("protocol has no steps".into()));
        }
        if steps.len() > MAX_STEPS {
            return Err(IrrigoError::Validation(format!(
                "protocol has {} steps (max {MAX_STEPS})",
                steps.len()
            )));
        }
        Ok(Self {
            steps,
            cyclic,
            current_step: 0,
            current_cycle: 0,
            channel: 0,
        })
    }

    /// Tag log output and step context with a channel number.
    pub fn with_channel(mut self, channel: usize) -> Self {
        self.channel = channel;
        self
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn is_cyclic(&self) -> bool {
        self.cyclic
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn current_cycle(&self) -> u32 {
        self.current_cycle
    }

    pub fn is_finished(&self) -> bool {
        !self.cyclic && self.current_cycle >= 1
    }

    fn snapshot(&self, should_water: bool) -> SequencerTick {
        SequencerTick {
            should_water,
            finished: self.is_finished(),
            current_step: self.current_step,
            current_cycle: self.current_cycle,
        }
    }

    fn previous_kind(&self) -> Option<StepKind> {
        match self.current_step {
            0 if self.current_cycle == 0 => None,
            0 => self.steps.last().map(Step::kind),
            i => self.steps.get(i - 1).map(Step::kind),
        }
    }

    pub fn tick(&mut self, weight: f64, now_ms: u32) -> SequencerTick {
        if self.is_finished() {
            return self.snapshot(false);
        }
        let ctx = StepContext {
            channel: self.channel,
            previous: self.previous_kind(),
        };
        let Some(step) = self.steps.get_mut(self.current_step) else {
            return self.snapshot(false);
        };
        let out = step.tick(weight, now_ms, &ctx);
        if out.finished {
            self.current_step += 1;
            if self.current_step == self.steps.len() {
                self.current_cycle = self.current_cycle.saturating_add(1);
                if self.cyclic {
                    self.current_step = 0;
                    debug!(channel = self.channel, cycle = self.current_cycle, "protocol cycle complete");
                } else {
                    debug!(channel = self.channel, "protocol finished");
                }
            } else {
                debug!(channel = self.channel, step = self.current_step, "next step");
            }
        }
        let water = out.should_water && !self.is_finished();
        self.snapshot(water)
    }

    /// Start over from step 0, cycle 0.
    pub fn reset(&mut self) {
        for s in &mut self.steps {
            s.reset();
        }
        self.current_step = 0;
        self.current_cycle = 0;
    }

    /// Persisted form including the position inside the protocol and the
    /// progress of the running step.
    pub fn to_record(&self, slot: u32, now_ms: u32) -> ProtocolRecord {
        let steps = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let progress = (i == self.current_step).then(|| s.progress(now_ms));
                s.to_record(progress)
            })
            .collect();
        let started = self.current_step != 0 || self.current_cycle != 0;
        ProtocolRecord {
            slot,
            steps,
            cyclic: self.cyclic,
            current_step: started.then(|| u32::try_from(self.current_step).unwrap_or(u32::MAX)),
            current_cycle: started.then_some(self.current_cycle),
        }
    }

    /// Rebuild from a record; latched step times are re-based on `now_ms`.
    pub fn from_record(r: &ProtocolRecord, now_ms: u32) -> Result<Self> {
        let steps = r
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| {
                Step::from_record(s, now_ms).map_err(|e| match e {
                    IrrigoError::Validation(m) => {
                        IrrigoError::Validation(format!("step {i}: {m}"))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut seq = Self::new(steps, r.cyclic)?.with_channel(r.slot as usize);
        let step = r.current_step.unwrap_or(0) as usize;
        let cycle = r.current_cycle.unwrap_or(0);
        let finished_state = !r.cyclic && cycle >= 1 && step == seq.steps.len();
        let running_state = step < seq.steps.len() && (r.cyclic || cycle == 0);
        if !finished_state && !running_state {
            return Err(IrrigoError::Validation(format!(
                "protocol position step {step} cycle {cycle} is not reachable"
            )));
        }
        let stray = r.steps.iter().enumerate().any(|(i, s)| {
            i != step && (s.phase.is_some() || s.elapsed_ms.is_some() || s.cycles_done.is_some())
        });
        if stray {
            return Err(IrrigoError::Validation(
                "progress recorded on a step that is not running".into(),
            ));
        }
        seq.current_step = step;
        seq.current_cycle = cycle;
        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waits(n: usize) -> Vec<Step> {
        (0..n).map(|_| Step::wait(0)).collect()
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(Sequencer::new(vec![], false).is_err());
        assert!(Sequencer::new(waits(MAX_STEPS + 1), false).is_err());
        assert!(Sequencer::new(waits(MAX_STEPS), false).is_ok());
    }

    #[test]
    fn non_cyclic_runs_once() {
        let mut s = Sequencer::new(waits(2), false).unwrap();
        let t = s.tick(0.0, 0);
        assert_eq!((t.current_step, t.finished), (1, false));
        let t = s.tick(0.0, 0);
        assert!(t.finished);
        assert_eq!((t.current_step, t.current_cycle), (2, 1));
        s.reset();
        assert!(!s.is_finished());
        assert_eq!(s.current_step(), 0);
    }

    #[test]
    fn cyclic_wraps_and_counts() {
        let mut s = Sequencer::new(waits(2), true).unwrap();
        for _ in 0..5 {
            s.tick(0.0, 0);
        }
        assert_eq!(s.current_step(), 1);
        assert_eq!(s.current_cycle(), 2);
        assert!(!s.is_finished());
    }

    #[test]
    fn water_request_passes_through() {
        let hold = Step::hold_weight(100.0, 1.0, 10).unwrap();
        let mut s = Sequencer::new(vec![hold], false).unwrap();
        assert!(s.tick(20.0, 0).should_water);
        assert!(!s.tick(100.0, 1).should_water);
        assert!(s.tick(100.0, 11).finished);
    }

    #[test]
    fn record_keeps_position_and_progress() {
        let mut s = Sequencer::new(vec![Step::wait(0), Step::wait(1_000)], true)
            .unwrap()
            .with_channel(2);
        s.tick(0.0, 100);
        s.tick(0.0, 100);
        let rec = s.to_record(2, 400);
        assert_eq!(rec.current_step, Some(1));
        assert_eq!(rec.steps[1].elapsed_ms, Some(300));
        assert_eq!(rec.steps[0].phase, None);

        let mut back = Sequencer::from_record(&rec, 10).unwrap();
        assert_eq!(back.channel(), 2);
        assert!(!back.tick(0.0, 709).finished);
        let t = back.tick(0.0, 710);
        assert_eq!((t.current_step, t.current_cycle), (0, 1));
    }

    #[test]
    fn record_rejects_unreachable_position() {
        let s = Sequencer::new(waits(2), false).unwrap();
        let mut rec = s.to_record(0, 0);
        rec.current_step = Some(2);
        assert!(Sequencer::from_record(&rec, 0).is_err());
        rec.current_cycle = Some(1);
        let finished = Sequencer::from_record(&rec, 0).unwrap();
        assert!(finished.is_finished());
    }
}
