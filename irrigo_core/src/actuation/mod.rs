//! Journaled actuators driven one increment at a time.
//!
//! Every move is bracketed by two journal writes: `moving(start)` before the
//! first increment and `idle(end)` after the last. The first write completes
//! before any increment is issued. An actuator whose journal still says
//! `moving` at startup lost power mid-move and is refused until an operator
//! acknowledges it, see [`ActuatorArena::begin`].

pub mod arena;
pub mod pump;
pub mod servo;
pub mod stepper;

use std::fmt;
use std::time::Duration;

pub use arena::{ActuatorArena, ActuatorId};
pub use pump::Pump;
pub use servo::Servo;
pub use stepper::Stepper;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Direction from `from` to `to`, `None` when they are equal.
    pub fn toward(from: i32, to: i32) -> Option<Self> {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Some(Direction::Forward),
            std::cmp::Ordering::Less => Some(Direction::Backward),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn delta(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorKind {
    Stepper,
    Servo,
    Pump,
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActuatorKind::Stepper => "stepper",
            ActuatorKind::Servo => "servo",
            ActuatorKind::Pump => "pump",
        })
    }
}

/// Motion decomposed into unit increments.
///
/// Position bookkeeping and journaling live in the arena; an actuator only
/// turns "now be at `position`" into outputs.
pub trait Actuator: Send {
    fn kind(&self) -> ActuatorKind;

    /// Delay between two increments.
    fn increment_period(&self) -> Duration;

    /// Reject a move before anything is journaled.
    fn validate_target(&self, _from: i32, _to: i32) -> Result<()> {
        Ok(())
    }

    /// Called once before the first increment of a move.
    fn start(&mut self, from: i32, to: i32) -> Result<()>;

    /// Advance one unit; `position` is where the actuator is afterwards.
    fn increment(&mut self, dir: Direction, position: i32) -> Result<()>;

    /// Called once after the last increment.
    fn finish(&mut self) -> Result<()>;
}

impl<A: Actuator + ?Sized> Actuator for Box<A> {
    fn kind(&self) -> ActuatorKind {
        (**self).kind()
    }

    fn increment_period(&self) -> Duration {
        (**self).increment_period()
    }

    fn validate_target(&self, from: i32, to: i32) -> Result<()> {
        (**self).validate_target(from, to)
    }

    fn start(&mut self, from: i32, to: i32) -> Result<()> {
        (**self).start(from, to)
    }

    fn increment(&mut self, dir: Direction, position: i32) -> Result<()> {
        (**self).increment(dir, position)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}
