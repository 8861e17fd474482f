//! Simulated beds for `run` on the simulated bench.
//!
//! Each channel's bed loses a little water every tick and gains water while
//! the pump runs with the stepper parked at that channel's position. The
//! resulting weight is written to the simulated ADC as raw counts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eyre::{Result, WrapErr};
use irrigo_core::{ActuatorId, RunConfig};
use irrigo_hardware::{SimHx711Bus, SimPwm};
use tracing::{debug, trace};

use crate::bench::{StepperArena, sim_raw};

pub const TICK: Duration = Duration::from_millis(10);
/// Grams per tick at full pump intensity.
pub const DEFAULT_FLOW_G: f64 = 0.5;
/// Grams lost per tick.
pub const DEFAULT_DRAIN_G: f64 = 0.01;

const ENV_SIM_FLOW: &str = "IRRIGO_SIM_FLOW";
const ENV_SIM_START: &str = "IRRIGO_SIM_WEIGHT";

#[derive(Debug, Clone, Copy)]
struct Bed {
    channel: usize,
    stepper: i32,
    grams: f64,
}

#[derive(Debug, Clone)]
pub struct Plant {
    beds: Vec<Bed>,
    flow_g: f64,
    drain_g: f64,
}

fn env_f64(name: &str) -> Result<Option<f64>> {
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse::<f64>()
            .map(Some)
            .wrap_err_with(|| format!("{name}={v} is not a number")),
        Err(_) => Ok(None),
    }
}

impl Plant {
    pub fn from_run(run: &RunConfig) -> Result<Self> {
        let start = env_f64(ENV_SIM_START)?.unwrap_or(0.0);
        let beds = run
            .active_channels()
            .filter_map(|ch| {
                run.position(ch).map(|p| Bed {
                    channel: ch,
                    stepper: p.stepper,
                    grams: start,
                })
            })
            .collect();
        Ok(Self {
            beds,
            flow_g: env_f64(ENV_SIM_FLOW)?.unwrap_or(DEFAULT_FLOW_G),
            drain_g: DEFAULT_DRAIN_G,
        })
    }

    /// Advance one tick. `nozzle` is the parked stepper position, `duty`
    /// the pump output.
    pub fn step(&mut self, nozzle: Option<i32>, duty: f64) {
        for bed in &mut self.beds {
            bed.grams = (bed.grams - self.drain_g).max(0.0);
            if duty > 0.0 && nozzle == Some(bed.stepper) {
                bed.grams += self.flow_g * duty;
                trace!(channel = bed.channel, grams = bed.grams, "bed watered");
            }
        }
    }

    pub fn grams(&self, channel: usize) -> Option<f64> {
        self.beds
            .iter()
            .find(|b| b.channel == channel)
            .map(|b| b.grams)
    }

    fn publish(&self, bus: &SimHx711Bus) {
        for bed in &self.beds {
            bus.set_value(bed.channel, Some(sim_raw(bed.grams)));
        }
    }

    /// Run the plant on its own thread until the handle is dropped.
    pub fn spawn(
        self,
        bus: SimHx711Bus,
        pump: SimPwm,
        stepper: (Arc<StepperArena>, ActuatorId),
    ) -> Result<PlantHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let mut plant = self;
        plant.publish(&bus);
        let handle = thread::Builder::new()
            .name("irrigo-plant".into())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(TICK);
                    let (arena, id) = (&stepper.0, stepper.1);
                    let nozzle = if arena.running(id) {
                        None
                    } else {
                        arena.position(id).ok()
                    };
                    plant.step(nozzle, pump.duty());
                    plant.publish(&bus);
                }
                debug!("plant stopped");
            })
            .wrap_err("spawn plant thread")?;
        Ok(PlantHandle {
            stop,
            handle: Some(handle),
        })
    }
}

pub struct PlantHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for PlantHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}
