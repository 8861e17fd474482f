//! Test and helper doubles for irrigo_core.
//!
//! These stand in for the hardware seam in unit tests and in the simulated
//! bench: a timer fired by hand, in-memory journal and blob store, and a
//! load cell that replays a script.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use irrigo_traits::{
    BlobStore, HwResult, JournalEntry, JournalStore, LoadCell, OutputPin, RepeatingTimer,
    TimerAction, TimerCallback,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct TimerSlot {
    period: Option<Duration>,
    callback: Option<TimerCallback>,
    starts: usize,
}

/// Timer whose callback runs only when the test calls [`ManualTimer::fire`].
/// Clones share the armed callback.
#[derive(Clone, Default)]
pub struct ManualTimer {
    slot: Arc<Mutex<TimerSlot>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.slot).callback.is_some()
    }

    pub fn period(&self) -> Option<Duration> {
        lock(&self.slot).period
    }

    /// Times `start` was called.
    pub fn starts(&self) -> usize {
        lock(&self.slot).starts
    }

    /// Run the callback once; `None` if nothing is armed.
    pub fn fire(&self) -> Option<TimerAction> {
        // run outside the lock so the callback may re-arm
        let mut cb = lock(&self.slot).callback.take()?;
        let action = cb();
        if action == TimerAction::Repeat {
            let mut s = lock(&self.slot);
            if s.callback.is_none() {
                s.callback = Some(cb);
            }
        }
        Some(action)
    }

    /// Fire until the callback stops or `limit` firings; returns the count.
    pub fn run_to_completion(&self, limit: usize) -> usize {
        let mut n = 0;
        while n < limit {
            match self.fire() {
                Some(TimerAction::Repeat) => n += 1,
                Some(TimerAction::Stop) => return n + 1,
                None => break,
            }
        }
        n
    }
}

impl RepeatingTimer for ManualTimer {
    fn start(&mut self, period: Duration, callback: TimerCallback) -> HwResult<()> {
        let mut s = lock(&self.slot);
        s.period = Some(period);
        s.callback = Some(callback);
        s.starts += 1;
        Ok(())
    }

    fn cancel(&mut self) {
        lock(&self.slot).callback = None;
    }
}

#[derive(Default)]
struct JournalState {
    entry: Option<JournalEntry>,
    writes: Vec<JournalEntry>,
    fail_after: Option<usize>,
}

/// In-memory journal that records every write. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryJournal {
    state: Arc<Mutex<JournalState>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(entry: JournalEntry) -> Self {
        let j = Self::new();
        lock(&j.state).entry = Some(entry);
        j
    }

    pub fn entry(&self) -> Option<JournalEntry> {
        lock(&self.state).entry
    }

    pub fn writes(&self) -> Vec<JournalEntry> {
        lock(&self.state).writes.clone()
    }

    /// Allow `n` more successful writes, then fail every write.
    pub fn fail_after(&self, n: usize) {
        lock(&self.state).fail_after = Some(n);
    }
}

impl JournalStore for MemoryJournal {
    fn load(&mut self) -> HwResult<Option<JournalEntry>> {
        Ok(lock(&self.state).entry)
    }

    fn store(&mut self, entry: JournalEntry) -> HwResult<()> {
        let mut s = lock(&self.state);
        if let Some(left) = s.fail_after.as_mut() {
            if *left == 0 {
                return Err(Box::new(std::io::Error::other("journal write failed")));
            }
            *left -= 1;
        }
        s.entry = Some(entry);
        s.writes.push(entry);
        Ok(())
    }
}

/// In-memory blob store.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    docs: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.docs.get(name).map(Vec::as_slice)
    }
}

impl BlobStore for MemoryStore {
    fn read(&self, name: &str) -> HwResult<Option<Vec<u8>>> {
        Ok(self.docs.get(name).cloned())
    }

    fn write(&mut self, name: &str, bytes: &[u8]) -> HwResult<()> {
        self.docs.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Load cell replaying scripted samples; `None` entries time out.
/// Once the script runs dry every read returns `fallback`.
pub struct SeqLoadCell {
    script: VecDeque<Option<i32>>,
    fallback: Option<i32>,
    pub reads: usize,
    pub powered: bool,
}

impl SeqLoadCell {
    pub fn new(script: impl IntoIterator<Item = Option<i32>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback: None,
            reads: 0,
            powered: true,
        }
    }

    pub fn steady(value: i32) -> Self {
        Self::new([]).with_fallback(Some(value))
    }

    pub fn with_fallback(mut self, value: Option<i32>) -> Self {
        self.fallback = value;
        self
    }
}

impl LoadCell for SeqLoadCell {
    fn read_raw(&mut self, _timeout: Duration) -> HwResult<i32> {
        self.reads += 1;
        let next = self.script.pop_front().unwrap_or(self.fallback);
        match next {
            Some(v) if self.powered => Ok(v),
            _ => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "hx711 data-ready timeout",
            ))),
        }
    }

    fn power_down(&mut self, _wait: bool) -> HwResult<()> {
        self.powered = false;
        Ok(())
    }

    fn power_up(&mut self) -> HwResult<()> {
        self.powered = true;
        Ok(())
    }
}

/// Output pin that ignores writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPin;

impl OutputPin for NullPin {
    fn set_high(&mut self) {}
    fn set_low(&mut self) {}
}
