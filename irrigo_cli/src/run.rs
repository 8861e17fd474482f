//! `irrigo run`: the control loop with optional per-pass CSV log.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use eyre::{Result, WrapErr};
use irrigo_config::Config;
use irrigo_core::{ChannelReport, Controller, RunConfig, RunLimits, WaterAction, WateringRig};
use irrigo_hardware::{DirStore, ThreadTimer};
use irrigo_traits::{Clock, MonotonicClock};
use serde_json::json;
use tracing::{info, warn};

use crate::bench::{self, Backend, Channels};
use crate::plant::Plant;

pub struct RunArgs {
    pub run_file: Option<PathBuf>,
    pub passes: Option<u64>,
    pub record: Option<PathBuf>,
    pub no_save: bool,
}

pub fn run_limits(cfg: &Config) -> RunLimits {
    RunLimits::new(cfg.channel_count()).with_servo_range(cfg.servo.min_angle, cfg.servo.max_angle)
}

/// Parse a run configuration file against the board's limits.
pub fn read_run_file(path: &Path, limits: &RunLimits, now_ms: u32) -> Result<RunConfig> {
    let f = File::open(path).wrap_err_with(|| format!("open run file {}", path.display()))?;
    let run = RunConfig::from_reader(std::io::BufReader::new(f), limits, now_ms)
        .wrap_err_with(|| format!("run file {}", path.display()))?;
    Ok(run)
}

fn water_name(w: WaterAction) -> &'static str {
    match w {
        WaterAction::None => "none",
        WaterAction::Started => "started",
        WaterAction::Pending => "pending",
    }
}

/// Per-channel CSV rows, one record per report.
struct Recorder {
    out: csv::Writer<File>,
}

impl Recorder {
    const HEADER: [&'static str; 10] = [
        "pass", "t_ms", "channel", "weight", "stdev", "step", "cycle", "finished", "water",
        "error",
    ];

    fn create(path: &Path) -> Result<Self> {
        let mut out = csv::Writer::from_path(path)
            .wrap_err_with(|| format!("create record file {}", path.display()))?;
        out.write_record(Self::HEADER)?;
        Ok(Self { out })
    }

    fn write(&mut self, pass: u64, t_ms: u32, reports: &[ChannelReport]) -> csv::Result<()> {
        let opt = |v: Option<f64>| v.map(|x| format!("{x:.3}")).unwrap_or_default();
        for r in reports {
            let (step, cycle, finished) = r.tick.map_or((String::new(), String::new(), String::new()), |t| {
                (
                    t.current_step.to_string(),
                    t.current_cycle.to_string(),
                    t.finished.to_string(),
                )
            });
            self.out.write_record([
                pass.to_string(),
                t_ms.to_string(),
                r.channel.to_string(),
                opt(r.weight),
                opt(r.stdev),
                step,
                cycle,
                finished,
                water_name(r.water).to_string(),
                r.error.as_ref().map(ToString::to_string).unwrap_or_default(),
            ])?;
        }
        self.out.flush()?;
        Ok(())
    }
}

fn report_json(pass: u64, t_ms: u32, reports: &[ChannelReport]) -> serde_json::Value {
    let channels: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "channel": r.channel,
                "weight": r.weight,
                "stdev": r.stdev,
                "step": r.tick.map(|t| t.current_step),
                "cycle": r.tick.map(|t| t.current_cycle),
                "finished": r.tick.map(|t| t.finished),
                "water": water_name(r.water),
                "error": r.error.as_ref().map(ToString::to_string),
            })
        })
        .collect();
    json!({ "pass": pass, "t_ms": t_ms, "channels": channels })
}

fn report_line(pass: u64, reports: &[ChannelReport]) -> String {
    let parts: Vec<String> = reports
        .iter()
        .map(|r| match (&r.error, r.weight, r.tick) {
            (Some(e), None, _) => format!("ch{} error: {e}", r.channel),
            (_, Some(w), Some(t)) => {
                let state = if t.finished {
                    "done".to_string()
                } else {
                    format!("step {} cycle {}", t.current_step, t.current_cycle)
                };
                format!("ch{} {w:.2} {state} water={}", r.channel, water_name(r.water))
            }
            _ => format!("ch{} -", r.channel),
        })
        .collect();
    format!("pass {pass}: {}", parts.join(" | "))
}

/// Fill channels without a complete record with the simulated bench's
/// calibration.
fn seed_sim_calibration(channels: &mut Channels, run: &RunConfig) -> Result<()> {
    let cal = bench::sim_calibration()?;
    for ch in run.active_channels() {
        if !channels.calibration(ch).is_some_and(|c| c.is_complete()) {
            warn!(channel = ch, "no calibration; using the simulated bench calibration");
            channels.set_calibration(ch, cal)?;
        }
    }
    Ok(())
}

pub fn run(cfg: &Config, backend: Backend, json_out: bool, args: RunArgs) -> Result<()> {
    let clock = MonotonicClock::new();
    let limits = run_limits(cfg);
    let mut store = DirStore::open(&cfg.storage.data_dir)
        .wrap_err_with(|| format!("open data dir {}", cfg.storage.data_dir.display()))?;

    let run = match &args.run_file {
        Some(path) => read_run_file(path, &limits, clock.millis())?,
        None => RunConfig::load(&store, &cfg.storage.run_file, &limits, clock.millis())?
            .ok_or_else(|| eyre::eyre!("no run configuration in {}", cfg.storage.data_dir.display()))?,
    };

    let (mut channels, sim_bus) = bench::open_channels(cfg, backend)?;
    let report = channels
        .load_calibrations(&store, &cfg.storage.calibration_file)
        .wrap_err("load calibration")?;
    for skipped in &report.skipped {
        warn!(entry = %skipped, "calibration entry ignored");
    }
    if sim_bus.is_some() {
        seed_sim_calibration(&mut channels, &run)?;
    }

    let act = bench::open_actuators(cfg, backend)?;
    let plant = match (sim_bus, act.sim_pump.clone()) {
        (Some(bus), Some(pump)) if !bench::sim_disconnected() => Some(
            Plant::from_run(&run)?.spawn(bus, pump, (Arc::clone(&act.stepper.0), act.stepper.1))?,
        ),
        _ => None,
    };

    let rig = WateringRig::new(
        (Arc::clone(&act.stepper.0), act.stepper.1),
        (Arc::clone(&act.servo.0), act.servo.1),
        (Arc::clone(&act.pump.0), act.pump.1),
        ThreadTimer::new(),
    );
    rig.begin().wrap_err("start actuators")?;

    let timeout = Duration::from_millis(cfg.acquisition.read_timeout_ms);
    let mut controller = Controller::new(channels, run, clock, rig)
        .with_sampling(cfg.acquisition.samples_per_read, timeout)
        .with_idle_sleep(Duration::from_millis(cfg.runner.idle_sleep_ms));

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = Arc::clone(&shutdown);
        ctrlc::set_handler(move || flag.store(true, std::sync::atomic::Ordering::Relaxed))
            .wrap_err("install signal handler")?;
    }

    let mut recorder = args.record.as_deref().map(Recorder::create).transpose()?;
    let mut record_err: Option<csv::Error> = None;
    let mut pass = 0u64;
    let done = controller.run(args.passes, &shutdown, |reports| {
        pass += 1;
        let t_ms = clock.millis();
        if json_out {
            println!("{}", report_json(pass, t_ms, reports));
        } else {
            println!("{}", report_line(pass, reports));
        }
        let failed = recorder
            .as_mut()
            .and_then(|rec| rec.write(pass, t_ms, reports).err());
        if let Some(e) = failed {
            warn!(error = %e, "record write failed; recording stopped");
            record_err = Some(e);
            recorder = None;
        }
    });
    drop(plant);

    if !args.no_save {
        controller
            .save_run(&mut store, &cfg.storage.run_file)
            .wrap_err("save run progress")?;
        info!(file = %cfg.storage.run_file, "run progress saved");
    }

    let finished = controller.run_config().all_finished();
    if json_out {
        println!("{}", json!({ "passes": done, "finished": finished }));
    } else {
        println!(
            "{done} passes, {}",
            if finished { "all protocols finished" } else { "stopped" }
        );
    }
    if let Some(e) = record_err {
        return Err(e).wrap_err("write record file");
    }
    Ok(())
}
