//! The foreground control loop.
//!
//! One pass reads every configured channel, ticks its sequencer with the
//! calibrated weight and hands watering requests to a [`Dispenser`]. The
//! dispenser runs one job at a time through the async actuators; a channel
//! that asks for water while a job is running is reported as pending and
//! asks again on a later pass.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use irrigo_traits::{
    Clock, JournalStore, LoadCell, OutputPin, PwmOutput, RepeatingTimer, timer_finished,
};
use tracing::{debug, info, warn};

use crate::actuation::{Actuator, ActuatorArena, ActuatorId, Pump};
use crate::channels::ChannelManager;
use crate::error::{IrrigoError, Result};
use crate::protocol::SequencerTick;
use crate::run::{ChannelPosition, RunConfig};

/// Where a watering job is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispenseState {
    Idle,
    Positioning { channel: usize },
    Aiming { channel: usize },
    Pumping { channel: usize },
}

impl DispenseState {
    pub fn channel(&self) -> Option<usize> {
        match *self {
            DispenseState::Idle => None,
            DispenseState::Positioning { channel }
            | DispenseState::Aiming { channel }
            | DispenseState::Pumping { channel } => Some(channel),
        }
    }
}

/// Carries out watering jobs without blocking the loop.
pub trait Dispenser {
    /// Start watering `channel`. Fails with [`IrrigoError::Busy`] while a
    /// job is running.
    fn start(&mut self, channel: usize, position: &ChannelPosition) -> Result<()>;

    /// Advance the running job and report where it is.
    fn poll(&mut self) -> Result<DispenseState>;

    fn state(&self) -> DispenseState;

    fn is_idle(&self) -> bool {
        self.state() == DispenseState::Idle
    }
}

/// Stepper to the channel, servo to its angle, then the pump for the
/// channel's run time. Each leg is an async move on its own arena; the legs
/// share one timer since they never overlap.
pub struct WateringRig<S, V, W, J, T> {
    stepper: Arc<ActuatorArena<S, J>>,
    stepper_id: ActuatorId,
    servo: Arc<ActuatorArena<V, J>>,
    servo_id: ActuatorId,
    pump: Arc<ActuatorArena<Pump<W>, J>>,
    pump_id: ActuatorId,
    timer: T,
    job: DispenseState,
    target: Option<ChannelPosition>,
}

impl<S, V, W, J, T> WateringRig<S, V, W, J, T>
where
    S: Actuator + 'static,
    V: Actuator + 'static,
    W: PwmOutput + Send + 'static,
    J: JournalStore + 'static,
    T: RepeatingTimer,
{
    pub fn new(
        stepper: (Arc<ActuatorArena<S, J>>, ActuatorId),
        servo: (Arc<ActuatorArena<V, J>>, ActuatorId),
        pump: (Arc<ActuatorArena<Pump<W>, J>>, ActuatorId),
        timer: T,
    ) -> Self {
        Self {
            stepper: stepper.0,
            stepper_id: stepper.1,
            servo: servo.0,
            servo_id: servo.1,
            pump: pump.0,
            pump_id: pump.1,
            timer,
            job: DispenseState::Idle,
            target: None,
        }
    }

    /// Restore every actuator from its journal. All three are attempted;
    /// the first failure is returned.
    pub fn begin(&self) -> Result<()> {
        let results = [
            self.stepper.begin(self.stepper_id),
            self.servo.begin(self.servo_id),
            self.pump.begin(self.pump_id),
        ];
        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    pub fn stepper(&self) -> (&Arc<ActuatorArena<S, J>>, ActuatorId) {
        (&self.stepper, self.stepper_id)
    }

    pub fn servo(&self) -> (&Arc<ActuatorArena<V, J>>, ActuatorId) {
        (&self.servo, self.servo_id)
    }

    pub fn pump(&self) -> (&Arc<ActuatorArena<Pump<W>, J>>, ActuatorId) {
        (&self.pump, self.pump_id)
    }

    fn abort(&mut self, e: IrrigoError) -> Result<DispenseState> {
        warn!(job = ?self.job, error = %e, "watering job aborted");
        self.job = DispenseState::Idle;
        self.target = None;
        Err(e)
    }

    fn start_pump(&mut self, pos: &ChannelPosition) -> Result<()> {
        let pulses = self.pump.with_idle(self.pump_id, |p| {
            p.set_intensity(pos.pump_intensity)
                .map(|()| p.pulses_for(pos.pump_time_us))
        })??;
        let from = self.pump.position(self.pump_id)?;
        let target = i32::try_from(pulses)
            .ok()
            .and_then(|n| from.checked_add(n))
            .ok_or_else(|| {
                IrrigoError::State("pump counter exhausted; acknowledge its journal".into())
            })?;
        self.pump
            .move_async(self.pump_id, target, &mut self.timer)
    }
}

impl<S, V, W, J, T> Dispenser for WateringRig<S, V, W, J, T>
where
    S: Actuator + 'static,
    V: Actuator + 'static,
    W: PwmOutput + Send + 'static,
    J: JournalStore + 'static,
    T: RepeatingTimer,
{
    fn start(&mut self, channel: usize, position: &ChannelPosition) -> Result<()> {
        if self.job != DispenseState::Idle {
            return Err(IrrigoError::Busy("watering rig".into()));
        }
        self.stepper
            .move_async(self.stepper_id, position.stepper, &mut self.timer)?;
        self.job = DispenseState::Positioning { channel };
        self.target = Some(*position);
        info!(channel, "watering started");
        Ok(())
    }

    fn poll(&mut self) -> Result<DispenseState> {
        let Some(pos) = self.target else {
            self.job = DispenseState::Idle;
            return Ok(self.job);
        };
        match self.job {
            DispenseState::Idle => {}
            DispenseState::Positioning { channel } => {
                if self.stepper.running(self.stepper_id) {
                    return Ok(self.job);
                }
                if let Some(e) = self.stepper.take_fault(self.stepper_id) {
                    return self.abort(e);
                }
                if let Err(e) = self
                    .servo
                    .move_async(self.servo_id, pos.servo, &mut self.timer)
                {
                    return self.abort(e);
                }
                debug!(channel, angle = pos.servo, "aiming");
                self.job = DispenseState::Aiming { channel };
            }
            DispenseState::Aiming { channel } => {
                if self.servo.running(self.servo_id) {
                    return Ok(self.job);
                }
                if let Some(e) = self.servo.take_fault(self.servo_id) {
                    return self.abort(e);
                }
                if let Err(e) = self.start_pump(&pos) {
                    return self.abort(e);
                }
                debug!(channel, run_us = pos.pump_time_us, intensity = pos.pump_intensity, "pumping");
                self.job = DispenseState::Pumping { channel };
            }
            DispenseState::Pumping { channel } => {
                if self.pump.running(self.pump_id) {
                    return Ok(self.job);
                }
                if let Some(e) = self.pump.take_fault(self.pump_id) {
                    return self.abort(e);
                }
                info!(channel, "watering done");
                self.job = DispenseState::Idle;
                self.target = None;
            }
        }
        Ok(self.job)
    }

    fn state(&self) -> DispenseState {
        self.job
    }
}

/// What the loop did about water for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaterAction {
    #[default]
    None,
    Started,
    /// Requested while another job was running.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReport {
    pub channel: usize,
    pub weight: Option<f64>,
    pub stdev: Option<f64>,
    pub tick: Option<SequencerTick>,
    pub water: WaterAction,
    pub error: Option<IrrigoError>,
}

impl ChannelReport {
    fn failed(channel: usize, error: IrrigoError) -> Self {
        Self {
            channel,
            weight: None,
            stdev: None,
            tick: None,
            water: WaterAction::None,
            error: Some(error),
        }
    }
}

pub const DEFAULT_SAMPLES: u32 = 10;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_IDLE_SLEEP: Duration = Duration::from_millis(5);

pub struct Controller<L, P, C, D> {
    channels: ChannelManager<L, P>,
    run: RunConfig,
    clock: C,
    dispenser: D,
    samples: u32,
    read_timeout: Duration,
    idle_sleep: Duration,
    reports: Vec<ChannelReport>,
    last_pass: Option<u32>,
    passes: u64,
}

impl<L, P, C, D> Controller<L, P, C, D>
where
    L: LoadCell,
    P: OutputPin,
    C: Clock,
    D: Dispenser,
{
    pub fn new(channels: ChannelManager<L, P>, run: RunConfig, clock: C, dispenser: D) -> Self {
        let reports = Vec::with_capacity(run.len());
        Self {
            channels,
            run,
            clock,
            dispenser,
            samples: DEFAULT_SAMPLES,
            read_timeout: DEFAULT_READ_TIMEOUT,
            idle_sleep: DEFAULT_IDLE_SLEEP,
            reports,
            last_pass: None,
            passes: 0,
        }
    }

    pub fn with_sampling(mut self, samples: u32, read_timeout: Duration) -> Self {
        self.samples = samples;
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    pub fn channels(&self) -> &ChannelManager<L, P> {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelManager<L, P> {
        &mut self.channels
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.run
    }

    pub fn run_config_mut(&mut self) -> &mut RunConfig {
        &mut self.run
    }

    pub fn dispenser(&self) -> &D {
        &self.dispenser
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Reports from the most recent pass.
    pub fn reports(&self) -> &[ChannelReport] {
        &self.reports
    }

    fn poll_dispenser(&mut self) {
        if let Err(e) = self.dispenser.poll() {
            warn!(error = %e, "dispenser fault");
        }
    }

    /// Read, tick and dispatch every configured channel once.
    pub fn run_pass(&mut self) -> &[ChannelReport] {
        let now = self.clock.millis();
        self.poll_dispenser();
        self.reports.clear();
        for i in 0..self.run.len() {
            let Some((channel, position, seq)) = self.run.entry_mut(i) else {
                break;
            };
            let reading =
                match self
                    .channels
                    .read_calibrated_stats(channel, self.samples, self.read_timeout)
                {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(channel, error = %e, "channel read failed");
                        self.reports.push(ChannelReport::failed(channel, e));
                        continue;
                    }
                };
            let tick = seq.tick(reading.mean, now);
            let mut error = None;
            let water = if !tick.should_water {
                WaterAction::None
            } else if !self.dispenser.is_idle() {
                WaterAction::Pending
            } else {
                match self.dispenser.start(channel, &position) {
                    Ok(()) => WaterAction::Started,
                    Err(IrrigoError::Busy(_)) => WaterAction::Pending,
                    Err(e) => {
                        warn!(channel, error = %e, "watering not started");
                        error = Some(e);
                        WaterAction::None
                    }
                }
            };
            self.reports.push(ChannelReport {
                channel,
                weight: Some(reading.mean),
                stdev: reading.has_spread().then_some(reading.stdev),
                tick: Some(tick),
                water,
                error,
            });
        }
        self.last_pass = Some(now);
        self.passes += 1;
        debug!(pass = self.passes, channels = self.reports.len(), "pass complete");
        &self.reports
    }

    /// Run a pass if the sensor period has elapsed; otherwise only advance
    /// the dispenser.
    pub fn run_due(&mut self) -> Option<&[ChannelReport]> {
        let now = self.clock.millis();
        let due = self
            .last_pass
            .is_none_or(|last| timer_finished(last, self.run.sensor_period_ms(), now));
        if due {
            Some(self.run_pass())
        } else {
            self.poll_dispenser();
            None
        }
    }

    /// Loop until `shutdown` is set, `max_passes` passes have run, or every
    /// protocol has finished. A watering job still running at that point is
    /// driven to its end first. Returns the pass count.
    pub fn run(
        &mut self,
        max_passes: Option<u64>,
        shutdown: &AtomicBool,
        mut on_pass: impl FnMut(&[ChannelReport]),
    ) -> u64 {
        let started = self.passes;
        info!(channels = self.run.len(), period_ms = self.run.sensor_period_ms(), "control loop start");
        let mut stopping = false;
        loop {
            if !stopping && shutdown.load(Ordering::Relaxed) {
                info!("shutdown requested");
                stopping = true;
            }
            let limit_hit = max_passes.is_some_and(|m| self.passes - started >= m);
            let finished = self.run.all_finished();
            if stopping || limit_hit || finished {
                // no new jobs; a running one ends before returning
                if self.dispenser.is_idle() {
                    if finished && !stopping {
                        info!("all protocols finished");
                    }
                    break;
                }
                self.poll_dispenser();
                self.clock.sleep(self.idle_sleep);
                continue;
            }
            let ran = match self.run_due() {
                Some(reports) => {
                    on_pass(reports);
                    true
                }
                None => false,
            };
            if !ran {
                self.clock.sleep(self.idle_sleep);
            }
        }
        let done = self.passes - started;
        info!(passes = done, "control loop stop");
        done
    }

    /// Current run state, including protocol progress.
    pub fn snapshot(&self) -> irrigo_config::RunRecord {
        self.run.to_record(self.clock.millis())
    }

    pub fn save_run(&self, store: &mut dyn irrigo_traits::BlobStore, name: &str) -> Result<()> {
        self.run.save(store, name, self.clock.millis())
    }
}
