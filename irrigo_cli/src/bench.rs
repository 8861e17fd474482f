//! Hardware assembly: the load cell behind its multiplexer and the three
//! journaled actuators, on the simulated bench or on real GPIO.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use eyre::{Result, WrapErr};
use irrigo_config::{Config, GainCfg};
use irrigo_core::{
    ActuatorArena, ActuatorId, Calibration, ChannelManager, Estimate, MuxSelector, Pump, Servo,
    Stepper,
};
use irrigo_hardware::{FileJournal, Gain, Hx711, SimHx711Bus, SimOutputPin, SimPwm};
use irrigo_traits::{LoadCell, MonotonicClock, NoMask, OutputPin, PwmOutput};

use crate::cli::ActuatorArg;

pub type Cell = Box<dyn LoadCell + Send>;
pub type Line = Box<dyn OutputPin + Send>;
pub type Pwm = Box<dyn PwmOutput + Send>;

pub type Channels = ChannelManager<Cell, Line>;
pub type StepperArena = ActuatorArena<Stepper<Line>, FileJournal>;
pub type ServoArena = ActuatorArena<Servo<Pwm>, FileJournal>;
pub type PumpArena = ActuatorArena<Pump<Pwm>, FileJournal>;

/// Raw counts of an empty simulated cell.
pub const SIM_TARE_RAW: i32 = 84_000;
/// Raw counts per gram on the simulated bench.
pub const SIM_COUNTS_PER_GRAM: f64 = 100.0;

/// Constant load (grams) on every simulated cell.
const ENV_SIM_WEIGHT: &str = "IRRIGO_SIM_WEIGHT";
/// Any value makes every simulated cell stop converting.
const ENV_SIM_TIMEOUT: &str = "IRRIGO_SIM_TIMEOUT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sim,
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    Gpio,
}

impl Backend {
    pub fn select(force_sim: bool) -> Self {
        #[cfg(all(feature = "hardware", target_os = "linux"))]
        {
            if !force_sim {
                return Backend::Gpio;
            }
        }
        let _ = force_sim;
        Backend::Sim
    }
}

fn gain(g: GainCfg) -> Gain {
    match g {
        GainCfg::A128 => Gain::A128,
        GainCfg::B32 => Gain::B32,
        GainCfg::A64 => Gain::A64,
    }
}

pub fn sim_raw(grams: f64) -> i32 {
    #[allow(clippy::cast_possible_truncation)]
    let counts = (grams * SIM_COUNTS_PER_GRAM).round() as i32;
    SIM_TARE_RAW.saturating_add(counts)
}

/// Calibration matching [`sim_raw`].
pub fn sim_calibration() -> Result<Calibration> {
    Ok(Calibration::complete(
        Estimate::new(f64::from(SIM_TARE_RAW), 0.0)?,
        Estimate::new(1.0 / SIM_COUNTS_PER_GRAM, 0.0)?,
    ))
}

/// True when the simulated cells were told never to convert.
pub fn sim_disconnected() -> bool {
    std::env::var_os(ENV_SIM_TIMEOUT).is_some()
}

fn sim_bus(cfg: &Config) -> Result<SimHx711Bus> {
    let bits = u8::try_from(cfg.pins.mux_select.len()).wrap_err("too many selector lines")?;
    let bus = SimHx711Bus::new(bits);
    let grams = match std::env::var(ENV_SIM_WEIGHT) {
        Ok(v) => v
            .trim()
            .parse::<f64>()
            .wrap_err_with(|| format!("{ENV_SIM_WEIGHT}={v} is not a number"))?,
        Err(_) => 0.0,
    };
    let value = (!sim_disconnected()).then(|| sim_raw(grams));
    for ch in 0..cfg.channel_count() {
        bus.set_value(ch, value);
    }
    Ok(bus)
}

/// Channel manager plus, on the simulated bench, the bus behind it.
pub fn open_channels(cfg: &Config, backend: Backend) -> Result<(Channels, Option<SimHx711Bus>)> {
    let acq = &cfg.acquisition;
    let poll = Duration::from_micros(acq.poll_interval_us);
    match backend {
        Backend::Sim => {
            let bus = sim_bus(cfg)?;
            let cell: Cell = Box::new(
                Hx711::new(
                    bus.data_pin(),
                    bus.clock_pin(),
                    NoMask,
                    MonotonicClock::new(),
                    gain(acq.gain),
                )
                .with_poll_interval(poll),
            );
            let lines: Vec<Line> = bus
                .select_pins()
                .into_iter()
                .map(|p| Box::new(p) as Line)
                .collect();
            let selector = MuxSelector::new(lines)?;
            Ok((ChannelManager::new(cell, selector), Some(bus)))
        }
        #[cfg(all(feature = "hardware", target_os = "linux"))]
        Backend::Gpio => {
            use irrigo_hardware::rpi;
            let p = &cfg.pins;
            let dt = rpi::input(p.hx711_dt).wrap_err("open hx711 pins")?;
            let sck = rpi::output(p.hx711_sck).wrap_err("open hx711 pins")?;
            let cell: Cell = Box::new(
                Hx711::new(dt, sck, NoMask, MonotonicClock::new(), gain(acq.gain))
                    .with_poll_interval(poll),
            );
            let lines = p
                .mux_select
                .iter()
                .map(|&pin| rpi::output(pin).map(|o| Box::new(o) as Line))
                .collect::<std::result::Result<Vec<_>, _>>()
                .wrap_err("open selector pins")?;
            let selector = MuxSelector::new(lines)?;
            Ok((ChannelManager::new(cell, selector), None))
        }
    }
}

/// The three actuators, each alone in its arena, with file journals.
pub struct Actuators {
    pub stepper: (Arc<StepperArena>, ActuatorId),
    pub servo: (Arc<ServoArena>, ActuatorId),
    pub pump: (Arc<PumpArena>, ActuatorId),
    /// Pump output on the simulated bench.
    pub sim_pump: Option<SimPwm>,
}

impl Actuators {
    pub fn begin(&self, which: ActuatorArg) -> irrigo_core::Result<i32> {
        match which {
            ActuatorArg::Stepper => self.stepper.0.begin(self.stepper.1),
            ActuatorArg::Servo => self.servo.0.begin(self.servo.1),
            ActuatorArg::Pump => self.pump.0.begin(self.pump.1),
        }
    }

    pub fn acknowledge(&self, which: ActuatorArg, position: Option<i32>) -> irrigo_core::Result<i32> {
        match which {
            ActuatorArg::Stepper => self.stepper.0.acknowledge(self.stepper.1, position),
            ActuatorArg::Servo => self.servo.0.acknowledge(self.servo.1, position),
            ActuatorArg::Pump => self.pump.0.acknowledge(self.pump.1, position),
        }
    }

    pub fn journal(&self, which: ActuatorArg) -> irrigo_core::Result<Option<irrigo_traits::JournalEntry>> {
        match which {
            ActuatorArg::Stepper => self.stepper.0.journal_entry(self.stepper.1),
            ActuatorArg::Servo => self.servo.0.journal_entry(self.servo.1),
            ActuatorArg::Pump => self.pump.0.journal_entry(self.pump.1),
        }
    }
}

fn single<A: irrigo_core::Actuator + 'static>(
    name: &str,
    actuator: A,
    journal: FileJournal,
) -> (Arc<ActuatorArena<A, FileJournal>>, ActuatorId) {
    let mut arena = ActuatorArena::new();
    let id = arena.add(name, actuator, journal);
    (Arc::new(arena), id)
}

pub fn open_actuators(cfg: &Config, backend: Backend) -> Result<Actuators> {
    let dir = cfg.storage.journal_dir();
    fs::create_dir_all(&dir).wrap_err_with(|| format!("create journal dir {}", dir.display()))?;
    let journal = |a: ActuatorArg| FileJournal::new(dir.join(format!("{}.jnl", a.name())));

    let (coils, servo_pwm, pump_pwm, sim_pump): ([Line; 4], Pwm, Pwm, Option<SimPwm>) =
        match backend {
            Backend::Sim => {
                let pump = SimPwm::new();
                (
                    std::array::from_fn(|_| Box::new(SimOutputPin::new()) as Line),
                    Box::new(SimPwm::new()),
                    Box::new(pump.clone()),
                    Some(pump),
                )
            }
            #[cfg(all(feature = "hardware", target_os = "linux"))]
            Backend::Gpio => {
                use irrigo_hardware::rpi;
                let p = &cfg.pins;
                let lines = p
                    .stepper
                    .iter()
                    .map(|&pin| rpi::output(pin).map(|o| Box::new(o) as Line))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .wrap_err("open stepper pins")?;
                let coils: [Line; 4] = lines
                    .try_into()
                    .map_err(|_| eyre::eyre!("pins.stepper must list exactly 4 coil lines"))?;
                (
                    coils,
                    Box::new(rpi::soft_pwm(p.servo).wrap_err("open servo pin")?),
                    Box::new(rpi::soft_pwm(p.pump).wrap_err("open pump pin")?),
                    None,
                )
            }
        };

    Ok(Actuators {
        stepper: single(
            ActuatorArg::Stepper.name(),
            Stepper::from_cfg(coils, &cfg.stepper),
            journal(ActuatorArg::Stepper),
        ),
        servo: single(
            ActuatorArg::Servo.name(),
            Servo::from_cfg(servo_pwm, &cfg.servo),
            journal(ActuatorArg::Servo),
        ),
        pump: single(
            ActuatorArg::Pump.name(),
            Pump::from_cfg(pump_pwm, &cfg.pump),
            journal(ActuatorArg::Pump),
        ),
        sim_pump,
    })
}
