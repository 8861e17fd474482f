//! `irrigo journal` and `irrigo jog`.

use std::time::{Duration, Instant};

use eyre::{Result, WrapErr};
use irrigo_config::Config;
use irrigo_core::{Actuator, ActuatorArena, ActuatorId};
use irrigo_hardware::{FileJournal, ThreadTimer};
use irrigo_traits::{Clock, JournalEntry, MonotonicClock};
use serde_json::json;
use tracing::info;

use crate::bench::{self, Actuators, Backend};
use crate::cli::{ActuatorArg, JournalAction};

fn state_name(entry: Option<JournalEntry>) -> &'static str {
    match entry {
        None => "fresh",
        Some(e) if e.in_progress => "interrupted",
        Some(_) => "idle",
    }
}

pub fn journal(cfg: &Config, backend: Backend, json_out: bool, action: JournalAction) -> Result<()> {
    let act = bench::open_actuators(cfg, backend)?;
    match action {
        JournalAction::Status => {
            let mut rows = Vec::new();
            for which in ActuatorArg::ALL {
                let entry = act
                    .journal(which)
                    .wrap_err_with(|| format!("read {} journal", which.name()))?;
                rows.push((which, entry));
            }
            if json_out {
                let v: Vec<_> = rows
                    .iter()
                    .map(|(w, e)| {
                        json!({
                            "actuator": w.name(),
                            "state": state_name(*e),
                            "position": e.map(|e| e.position),
                        })
                    })
                    .collect();
                println!("{}", serde_json::Value::Array(v));
            } else {
                for (w, e) in rows {
                    match e {
                        Some(e) => println!("{}: {} at {}", w.name(), state_name(Some(e)), e.position),
                        None => println!("{}: {}", w.name(), state_name(None)),
                    }
                }
            }
            Ok(())
        }
        JournalAction::Clear { actuator, position } => {
            let pos = act.acknowledge(actuator, position)?;
            if json_out {
                println!("{}", json!({ "actuator": actuator.name(), "position": pos }));
            } else {
                println!("{} acknowledged at {pos}", actuator.name());
            }
            Ok(())
        }
    }
}

/// Start an async move and wait for it to end.
fn jog_one<A: Actuator + 'static>(
    (arena, id): (&std::sync::Arc<ActuatorArena<A, FileJournal>>, ActuatorId),
    target: i32,
    wait: Duration,
) -> Result<i32> {
    let clock = MonotonicClock::new();
    let mut timer = ThreadTimer::new();
    arena.move_async_wait(id, target, &mut timer, &clock, wait)?;
    let started = Instant::now();
    while arena.running(id) {
        clock.sleep(Duration::from_millis(2));
    }
    if let Some(fault) = arena.take_fault(id) {
        return Err(fault.into());
    }
    let pos = arena.position(id)?;
    info!(position = pos, elapsed_ms = started.elapsed().as_millis(), "jog complete");
    Ok(pos)
}

pub fn jog(
    cfg: &Config,
    backend: Backend,
    json_out: bool,
    which: ActuatorArg,
    target: i32,
    wait_ms: Option<u64>,
) -> Result<()> {
    let act: Actuators = bench::open_actuators(cfg, backend)?;
    act.begin(which)
        .wrap_err_with(|| format!("start {}", which.name()))?;
    let wait = Duration::from_millis(wait_ms.unwrap_or(cfg.runner.move_wait_ms));
    let pos = match which {
        ActuatorArg::Stepper => jog_one((&act.stepper.0, act.stepper.1), target, wait)?,
        ActuatorArg::Servo => jog_one((&act.servo.0, act.servo.1), target, wait)?,
        ActuatorArg::Pump => jog_one((&act.pump.0, act.pump.1), target, wait)?,
    };
    if json_out {
        println!("{}", json!({ "actuator": which.name(), "position": pos }));
    } else {
        println!("{} at {pos}", which.name());
    }
    Ok(())
}
