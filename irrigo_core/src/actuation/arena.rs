//! Owned storage for journaled actuators and their in-flight moves.
//!
//! Timer callbacks never reach shared globals: [`ActuatorArena::move_async`]
//! hands the timer a closure holding an `Arc` of the arena and the index of
//! one slot. Each slot pairs a [`SpinLock`] busy flag, which is what makes a
//! second move fail fast, with a mutex around the actuator, its journal and
//! the move bookkeeping.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use irrigo_traits::{
    Clock, JournalEntry, JournalStore, RepeatingTimer, SpinLock, TimedLock, TimerAction,
};
use tracing::{debug, error, info, warn};

use super::{Actuator, Direction};
use crate::error::{IrrigoError, Result};
use crate::hw_error::map_boxed;

/// Handle to one actuator in an [`ActuatorArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActuatorId(usize);

impl ActuatorId {
    pub fn index(self) -> usize {
        self.0
    }
}

struct SlotState<A, J> {
    actuator: A,
    journal: J,
    position: i32,
    target: Option<i32>,
    /// Reason moves are refused; cleared by `begin` or `acknowledge`.
    blocked: Option<IrrigoError>,
    /// Unreported failure from a finished move.
    fault: Option<IrrigoError>,
}

struct Slot<A, J> {
    name: String,
    busy: SpinLock,
    state: Mutex<SlotState<A, J>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ActuatorArena<A, J> {
    slots: Vec<Slot<A, J>>,
}

impl<A, J> Default for ActuatorArena<A, J> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<A, J> ActuatorArena<A, J>
where
    A: Actuator + 'static,
    J: JournalStore + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actuator. It refuses to move until [`Self::begin`].
    pub fn add(&mut self, name: impl Into<String>, actuator: A, journal: J) -> ActuatorId {
        let name = name.into();
        let id = ActuatorId(self.slots.len());
        self.slots.push(Slot {
            busy: SpinLock::new(),
            state: Mutex::new(SlotState {
                actuator,
                journal,
                position: 0,
                target: None,
                blocked: Some(IrrigoError::State(format!("{name} has not been started"))),
                fault: None,
            }),
            name,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ActuatorId> + '_ {
        (0..self.slots.len()).map(ActuatorId)
    }

    fn slot(&self, id: ActuatorId) -> Result<&Slot<A, J>> {
        self.slots
            .get(id.0)
            .ok_or_else(|| IrrigoError::Validation(format!("no actuator with id {}", id.0)))
    }

    pub fn name(&self, id: ActuatorId) -> Result<&str> {
        self.slot(id).map(|s| s.name.as_str())
    }

    /// Restore the position from the journal.
    ///
    /// A journal left `in_progress` fails with
    /// [`IrrigoError::CrashConsistency`] and the actuator stays refused
    /// until [`Self::acknowledge`].
    pub fn begin(&self, id: ActuatorId) -> Result<i32> {
        let slot = self.slot(id)?;
        if slot.busy.is_locked() {
            return Err(IrrigoError::Busy(slot.name.clone()));
        }
        let mut st = lock(&slot.state);
        match st.journal.load().map_err(map_boxed)? {
            Some(e) if e.in_progress => {
                error!(actuator = %slot.name, position = e.position, "journal shows an interrupted move");
                let err = IrrigoError::CrashConsistency {
                    actuator: slot.name.clone(),
                    position: e.position,
                };
                st.blocked = Some(err.clone());
                return Err(err);
            }
            Some(e) => st.position = e.position,
            None => {
                st.journal
                    .store(JournalEntry::idle(0))
                    .map_err(map_boxed)?;
                st.position = 0;
            }
        }
        st.blocked = None;
        info!(actuator = %slot.name, position = st.position, "actuator ready");
        Ok(st.position)
    }

    /// Operator override after an interrupted move or a fault. Journals the
    /// given position (or the last journaled one) as idle and clears the
    /// refusal.
    pub fn acknowledge(&self, id: ActuatorId, position: Option<i32>) -> Result<i32> {
        let slot = self.slot(id)?;
        if !slot.busy.try_lock() {
            return Err(IrrigoError::Busy(slot.name.clone()));
        }
        let result = (|| -> Result<i32> {
            let mut st = lock(&slot.state);
            let pos = match position {
                Some(p) => p,
                None => st
                    .journal
                    .load()
                    .map_err(map_boxed)?
                    .map_or(st.position, |e| e.position),
            };
            st.journal
                .store(JournalEntry::idle(pos))
                .map_err(map_boxed)?;
            st.position = pos;
            st.blocked = None;
            st.fault = None;
            Ok(pos)
        })();
        slot.busy.unlock();
        if let Ok(pos) = result {
            warn!(actuator = %slot.name, position = pos, "journal acknowledged");
        }
        result
    }

    /// Current journal record, read from storage.
    pub fn journal_entry(&self, id: ActuatorId) -> Result<Option<JournalEntry>> {
        let slot = self.slot(id)?;
        let mut st = lock(&slot.state);
        st.journal.load().map_err(map_boxed)
    }

    /// True while a move owns the actuator.
    pub fn running(&self, id: ActuatorId) -> bool {
        self.slot(id).is_ok_and(|s| s.busy.is_locked())
    }

    pub fn position(&self, id: ActuatorId) -> Result<i32> {
        Ok(lock(&self.slot(id)?.state).position)
    }

    pub fn is_ready(&self, id: ActuatorId) -> bool {
        self.slot(id)
            .is_ok_and(|s| lock(&s.state).blocked.is_none())
    }

    /// Take the failure of the last async move, if any.
    pub fn take_fault(&self, id: ActuatorId) -> Option<IrrigoError> {
        self.slot(id).ok().and_then(|s| lock(&s.state).fault.take())
    }

    /// Run `f` on an idle actuator, e.g. to change its settings.
    pub fn with_idle<R>(&self, id: ActuatorId, f: impl FnOnce(&mut A) -> R) -> Result<R> {
        let slot = self.slot(id)?;
        if !slot.busy.try_lock() {
            return Err(IrrigoError::Busy(slot.name.clone()));
        }
        let r = f(&mut lock(&slot.state).actuator);
        slot.busy.unlock();
        Ok(r)
    }

    /// Move to `target` on the calling thread, sleeping one increment period
    /// between increments.
    pub fn move_blocking(&self, id: ActuatorId, target: i32, clock: &dyn Clock) -> Result<()> {
        let slot = self.slot(id)?;
        if !slot.busy.try_lock() {
            return Err(IrrigoError::Busy(slot.name.clone()));
        }
        let result = Self::run_blocking(slot, target, clock);
        slot.busy.unlock();
        result
    }

    fn run_blocking(slot: &Slot<A, J>, target: i32, clock: &dyn Clock) -> Result<()> {
        let mut st = lock(&slot.state);
        let Some(period) = prepare(&slot.name, &mut st, target)? else {
            return Ok(());
        };
        while !advance(&slot.name, &mut st)? {
            clock.sleep(period);
        }
        complete(&slot.name, &mut st)
    }

    /// Start a timer-driven move and return immediately.
    ///
    /// Fails with [`IrrigoError::Busy`] and no side effects while another
    /// move owns the actuator.
    pub fn move_async(
        self: &Arc<Self>,
        id: ActuatorId,
        target: i32,
        timer: &mut dyn RepeatingTimer,
    ) -> Result<()> {
        let slot = self.slot(id)?;
        if !slot.busy.try_lock() {
            return Err(IrrigoError::Busy(slot.name.clone()));
        }
        self.start_async_locked(id, target, timer)
    }

    /// Like [`Self::move_async`] but waits up to `timeout` for a running
    /// move to end first.
    pub fn move_async_wait(
        self: &Arc<Self>,
        id: ActuatorId,
        target: i32,
        timer: &mut dyn RepeatingTimer,
        clock: &dyn Clock,
        timeout: Duration,
    ) -> Result<()> {
        let slot = self.slot(id)?;
        if !slot.busy.lock_timeout(clock, timeout) {
            return Err(IrrigoError::Busy(slot.name.clone()));
        }
        self.start_async_locked(id, target, timer)
    }

    fn start_async_locked(
        self: &Arc<Self>,
        id: ActuatorId,
        target: i32,
        timer: &mut dyn RepeatingTimer,
    ) -> Result<()> {
        let slot = &self.slots[id.0];
        let prepared = {
            let mut st = lock(&slot.state);
            prepare(&slot.name, &mut st, target)
        };
        let period = match prepared {
            Ok(Some(p)) => p,
            Ok(None) => {
                slot.busy.unlock();
                return Ok(());
            }
            Err(e) => {
                slot.busy.unlock();
                return Err(e);
            }
        };

        let arena = Arc::clone(self);
        let index = id.0;
        if let Err(e) = timer.start(period, Box::new(move || arena.on_tick(index))) {
            let e = map_boxed(e);
            let mut st = lock(&slot.state);
            // nothing moved yet
            st.target = None;
            if let Err(fe) = st.actuator.finish() {
                warn!(actuator = %slot.name, error = %fe, "finish after failed timer start");
            }
            let idle = JournalEntry::idle(st.position);
            if let Err(je) = st.journal.store(idle) {
                warn!(actuator = %slot.name, error = %je, "journal not reset after failed timer start");
            }
            drop(st);
            slot.busy.unlock();
            return Err(e);
        }
        Ok(())
    }

    fn on_tick(&self, index: usize) -> TimerAction {
        let Some(slot) = self.slots.get(index) else {
            return TimerAction::Stop;
        };
        let mut st = lock(&slot.state);
        match advance(&slot.name, &mut st) {
            Ok(false) => return TimerAction::Repeat,
            Ok(true) => {
                if let Err(e) = complete(&slot.name, &mut st) {
                    debug!(actuator = %slot.name, error = %e, "fault kept for take_fault");
                }
            }
            Err(e) => debug!(actuator = %slot.name, error = %e, "move ended early"),
        }
        drop(st);
        slot.busy.unlock();
        TimerAction::Stop
    }
}

/// Validate and journal the start of a move. `None` when already at `target`.
fn prepare<A: Actuator, J: JournalStore>(
    name: &str,
    st: &mut SlotState<A, J>,
    target: i32,
) -> Result<Option<Duration>> {
    if let Some(reason) = &st.blocked {
        return Err(reason.clone());
    }
    st.actuator.validate_target(st.position, target)?;
    if target == st.position {
        return Ok(None);
    }
    st.journal
        .store(JournalEntry::moving(st.position))
        .map_err(map_boxed)?;
    if let Err(e) = st.actuator.start(st.position, target) {
        let idle = JournalEntry::idle(st.position);
        if let Err(je) = st.journal.store(idle) {
            warn!(actuator = name, error = %je, "journal not reset after failed start");
        }
        return Err(e);
    }
    st.target = Some(target);
    debug!(actuator = name, from = st.position, to = target, "move started");
    Ok(Some(st.actuator.increment_period()))
}

/// Issue one increment. `Ok(true)` once the target is reached.
fn advance<A: Actuator, J: JournalStore>(name: &str, st: &mut SlotState<A, J>) -> Result<bool> {
    let Some(target) = st.target else {
        return Ok(true);
    };
    if let Some(dir) = Direction::toward(st.position, target) {
        let next = st.position + dir.delta();
        if let Err(e) = st.actuator.increment(dir, next) {
            st.target = None;
            if let Err(fe) = st.actuator.finish() {
                warn!(actuator = name, error = %fe, "finish after failed increment");
            }
            let fault = IrrigoError::HardwareFault(format!("{name}: {e}"));
            error!(actuator = name, position = st.position, error = %e, "increment failed mid-move");
            st.blocked = Some(fault.clone());
            st.fault = Some(fault.clone());
            return Err(fault);
        }
        st.position = next;
    }
    Ok(st.position == target)
}

/// End the move and journal the final position.
fn complete<A: Actuator, J: JournalStore>(name: &str, st: &mut SlotState<A, J>) -> Result<()> {
    st.target = None;
    let finished = st.actuator.finish();
    if let Err(e) = st.journal.store(JournalEntry::idle(st.position)) {
        let fault = IrrigoError::HardwareFault(format!("{name}: final journal write failed: {e}"));
        error!(actuator = name, position = st.position, error = %e, "final journal write failed");
        st.blocked = Some(fault.clone());
        st.fault = Some(fault.clone());
        return Err(fault);
    }
    if let Err(e) = finished {
        warn!(actuator = name, error = %e, "actuator did not finish cleanly");
        st.fault = Some(e.clone());
        return Err(e);
    }
    debug!(actuator = name, position = st.position, "move complete");
    Ok(())
}
