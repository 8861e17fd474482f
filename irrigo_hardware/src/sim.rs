//! Simulated bench: an HX711 behind a binary channel multiplexer, plus
//! recording output pins and PWM channels.
//!
//! The simulated ADC follows the wire protocol closely enough to exercise
//! the real driver: DT goes low when the selected channel has a conversion,
//! each SCK rising edge shifts out the next bit MSB-first, trailing pulses
//! are counted as the gain selection, and a rising edge outside a read
//! powers the part down until SCK returns low.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use irrigo_traits::{HwResult, InputPin, OutputPin, PwmOutput};

#[derive(Debug, Default)]
struct Channel {
    steady: Option<i32>,
    script: VecDeque<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle { armed: bool },
    Shifting { word: u32, sent: u8, extra: u8 },
    PoweredDown,
}

#[derive(Debug)]
struct BusState {
    channels: Vec<Channel>,
    select_bits: Vec<bool>,
    select_writes: usize,
    sck_high: bool,
    dt_high: bool,
    phase: Phase,
    last_gain_pulses: Option<u8>,
    conversions: usize,
}

impl BusState {
    fn selected(&self) -> usize {
        self.select_bits
            .iter()
            .enumerate()
            .filter(|(_, high)| **high)
            .map(|(i, _)| 1usize << i)
            .sum()
    }

    fn peek_ready(&self) -> bool {
        self.channels
            .get(self.selected())
            .is_some_and(|c| !c.script.is_empty() || c.steady.is_some())
    }

    fn take_value(&mut self) -> Option<i32> {
        let idx = self.selected();
        let ch = self.channels.get_mut(idx)?;
        ch.script.pop_front().or(ch.steady)
    }

    fn sck_rise(&mut self) {
        self.phase = match self.phase {
            Phase::Idle { armed: true } => match self.take_value() {
                #[allow(clippy::cast_sign_loss)]
                Some(v) => {
                    let word = (v as u32) & 0x00FF_FFFF;
                    self.dt_high = word & 0x0080_0000 != 0;
                    Phase::Shifting {
                        word,
                        sent: 1,
                        extra: 0,
                    }
                }
                None => Phase::PoweredDown,
            },
            Phase::Idle { armed: false } => Phase::PoweredDown,
            Phase::Shifting { word, sent, extra } if sent < 24 => {
                self.dt_high = (word >> (23 - sent)) & 1 == 1;
                if sent == 23 {
                    self.conversions += 1;
                }
                Phase::Shifting {
                    word,
                    sent: sent + 1,
                    extra,
                }
            }
            Phase::Shifting { word, sent, extra } => {
                // data done; DT idles high until the next conversion
                self.dt_high = true;
                Phase::Shifting {
                    word,
                    sent,
                    extra: extra.saturating_add(1),
                }
            }
            Phase::PoweredDown => Phase::PoweredDown,
        };
    }

    fn sck_fall(&mut self) {
        if self.phase == Phase::PoweredDown {
            self.phase = Phase::Idle { armed: false };
        }
    }

    fn dt_read(&mut self) -> bool {
        match self.phase {
            Phase::Shifting { sent, extra, .. } if sent >= 24 && extra > 0 => {
                self.last_gain_pulses = Some(extra);
                self.phase = Phase::Idle { armed: false };
                self.idle_level()
            }
            Phase::Shifting { .. } => self.dt_high,
            Phase::Idle { .. } => self.idle_level(),
            Phase::PoweredDown => true,
        }
    }

    fn idle_level(&mut self) -> bool {
        let ready = !self.sck_high && self.peek_ready();
        self.phase = Phase::Idle { armed: ready };
        !ready
    }
}

/// Handle to the simulated ADC and multiplexer. Clones share state.
#[derive(Debug, Clone)]
pub struct SimHx711Bus {
    state: Arc<Mutex<BusState>>,
}

impl SimHx711Bus {
    /// A bus with `select_bits` selector lines, so `1 << select_bits` channels.
    pub fn new(select_bits: u8) -> Self {
        let channels = (0..(1usize << select_bits))
            .map(|_| Channel::default())
            .collect();
        Self {
            state: Arc::new(Mutex::new(BusState {
                channels,
                select_bits: vec![false; usize::from(select_bits)],
                select_writes: 0,
                sck_high: false,
                dt_high: true,
                phase: Phase::Idle { armed: false },
                last_gain_pulses: None,
                conversions: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Steady conversion value for `channel`; `None` means the channel never
    /// becomes ready (disconnected cell).
    pub fn set_value(&self, channel: usize, value: Option<i32>) {
        if let Some(ch) = self.lock().channels.get_mut(channel) {
            ch.steady = value;
        }
    }

    /// Values returned (in order) before falling back to the steady value.
    pub fn push_samples(&self, channel: usize, values: impl IntoIterator<Item = i32>) {
        if let Some(ch) = self.lock().channels.get_mut(channel) {
            ch.script.extend(values);
        }
    }

    pub fn selected_channel(&self) -> usize {
        self.lock().selected()
    }

    /// Number of writes to any selector line.
    pub fn select_writes(&self) -> usize {
        self.lock().select_writes
    }

    /// SCK held high outside the data phase.
    pub fn is_powered_down(&self) -> bool {
        let st = self.lock();
        st.sck_high && !matches!(st.phase, Phase::Shifting { sent, .. } if sent < 24)
    }

    /// Trailing pulses seen after the most recent 24 data bits.
    pub fn last_gain_pulses(&self) -> Option<u8> {
        let st = self.lock();
        match st.phase {
            Phase::Shifting { sent, extra, .. } if sent >= 24 && extra > 0 => Some(extra),
            _ => st.last_gain_pulses,
        }
    }

    pub fn conversions(&self) -> usize {
        self.lock().conversions
    }

    pub fn data_pin(&self) -> SimDataPin {
        SimDataPin { bus: self.clone() }
    }

    pub fn clock_pin(&self) -> SimClockPin {
        SimClockPin { bus: self.clone() }
    }

    /// Output pin driving selector line `bit` (bit 0 is the least significant).
    pub fn select_pin(&self, bit: u8) -> SimSelectPin {
        SimSelectPin {
            bus: self.clone(),
            bit: usize::from(bit),
        }
    }

    pub fn select_pins(&self) -> Vec<SimSelectPin> {
        let n = self.lock().select_bits.len();
        (0..n)
            .filter_map(|b| u8::try_from(b).ok())
            .map(|b| self.select_pin(b))
            .collect()
    }
}

pub struct SimDataPin {
    bus: SimHx711Bus,
}

impl InputPin for SimDataPin {
    fn is_high(&self) -> bool {
        self.bus.lock().dt_read()
    }
}

pub struct SimClockPin {
    bus: SimHx711Bus,
}

impl OutputPin for SimClockPin {
    fn set_high(&mut self) {
        let mut st = self.bus.lock();
        if !st.sck_high {
            st.sck_high = true;
            st.sck_rise();
        }
    }

    fn set_low(&mut self) {
        let mut st = self.bus.lock();
        if st.sck_high {
            st.sck_high = false;
            st.sck_fall();
        }
    }
}

pub struct SimSelectPin {
    bus: SimHx711Bus,
    bit: usize,
}

impl OutputPin for SimSelectPin {
    fn set_high(&mut self) {
        self.set_level(true);
    }

    fn set_low(&mut self) {
        self.set_level(false);
    }

    fn set_level(&mut self, high: bool) {
        let mut st = self.bus.lock();
        st.select_writes += 1;
        if let Some(b) = st.select_bits.get_mut(self.bit) {
            *b = high;
        }
        // a channel switch discards any pending conversion
        if let Phase::Idle { .. } = st.phase {
            st.phase = Phase::Idle { armed: false };
        }
    }
}

/// Recording pins and PWM channels keep at most this many entries.
pub const HISTORY_LIMIT: usize = 4096;

fn push_bounded<T>(log: &Mutex<Vec<T>>, item: T) {
    if let Ok(mut g) = log.lock() {
        if g.len() >= HISTORY_LIMIT {
            g.drain(..HISTORY_LIMIT / 2);
        }
        g.push(item);
    }
}

/// Output pin that records the levels written to it (most recent
/// [`HISTORY_LIMIT`] at most).
#[derive(Debug, Clone, Default)]
pub struct SimOutputPin {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl SimOutputPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<bool> {
        self.levels
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn level(&self) -> Option<bool> {
        self.levels.lock().ok().and_then(|g| g.last().copied())
    }
}

impl OutputPin for SimOutputPin {
    fn set_high(&mut self) {
        push_bounded(&self.levels, true);
    }

    fn set_low(&mut self) {
        push_bounded(&self.levels, false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PwmEvent {
    Set { frequency_hz: f64, duty: f64 },
    Disabled,
}

/// PWM output that records its changes (most recent [`HISTORY_LIMIT`] at most).
#[derive(Debug, Clone, Default)]
pub struct SimPwm {
    events: Arc<Mutex<Vec<PwmEvent>>>,
}

impl SimPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PwmEvent> {
        self.events
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<PwmEvent> {
        self.events.lock().ok().and_then(|g| g.last().copied())
    }

    /// Current duty, `0.0` when disabled or never driven.
    pub fn duty(&self) -> f64 {
        match self.last() {
            Some(PwmEvent::Set { duty, .. }) => duty,
            _ => 0.0,
        }
    }
}

impl PwmOutput for SimPwm {
    fn set_pwm(&mut self, frequency_hz: f64, duty: f64) -> HwResult<()> {
        push_bounded(
            &self.events,
            PwmEvent::Set {
                frequency_hz,
                duty: duty.clamp(0.0, 1.0),
            },
        );
        Ok(())
    }

    fn disable(&mut self) -> HwResult<()> {
        push_bounded(&self.events, PwmEvent::Disabled);
        Ok(())
    }
}
