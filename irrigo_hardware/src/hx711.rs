//! Bit-serial driver for the HX711 24-bit load cell ADC.
//!
//! The part signals a finished conversion by pulling DT low. The driver then
//! clocks 24 data bits out MSB-first and appends 1..=3 extra pulses that pick
//! the channel/gain of the *next* conversion (25, 26 or 27 pulses in total).
//! The shift runs with interrupts masked so a preempted SCK high phase cannot
//! exceed the 60 µs power-down threshold.

use std::time::Duration;

use irrigo_traits::{Clock, HwResult, InputPin, InterruptMask, LoadCell, OutputPin};
use tracing::trace;

use crate::error::Result;
use crate::util::wait_until_low_with_timeout;

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(5000);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(1000);
/// SCK must stay high at least this long for the part to power down.
pub const POWER_DOWN_SETTLE: Duration = Duration::from_micros(60);

/// Input channel and gain selected for the next conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gain {
    #[default]
    A128,
    B32,
    A64,
}

impl Gain {
    /// Extra SCK pulses after the 24 data bits.
    pub const fn pulses(self) -> u8 {
        match self {
            Gain::A128 => 1,
            Gain::B32 => 2,
            Gain::A64 => 3,
        }
    }
}

pub struct Hx711<D, K, M, C> {
    dt: D,
    sck: K,
    mask: M,
    clock: C,
    gain: Gain,
    poll_interval: Duration,
}

impl<D, K, M, C> Hx711<D, K, M, C>
where
    D: InputPin,
    K: OutputPin,
    M: InterruptMask,
    C: Clock,
{
    pub fn new(dt: D, mut sck: K, mask: M, clock: C, gain: Gain) -> Self {
        sck.set_low(); // clock idle low
        Self {
            dt,
            sck,
            mask,
            clock,
            gain,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Takes effect from the conversion after the next read.
    pub fn set_gain(&mut self, gain: Gain) {
        self.gain = gain;
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    pub fn is_ready(&self) -> bool {
        self.dt.is_low()
    }

    pub fn read_with_timeout(&mut self, timeout: Duration) -> Result<i32> {
        let Self {
            dt,
            sck,
            mask,
            clock,
            gain,
            poll_interval,
        } = self;

        wait_until_low_with_timeout(|| dt.is_high(), &*clock, timeout, *poll_interval)?;

        let pulses = gain.pulses();
        let word = mask.masked(|| shift_in(&*dt, sck, pulses));
        let value = sign_extend_24(word);
        trace!(raw = value, "hx711 raw read");
        Ok(value)
    }

    pub fn power_down(&mut self, wait: bool) {
        self.sck.set_low();
        self.sck.set_high();
        if wait {
            self.clock.sleep(POWER_DOWN_SETTLE);
        }
    }

    pub fn power_up(&mut self) {
        self.sck.set_low();
    }
}

impl<D, K, M, C> LoadCell for Hx711<D, K, M, C>
where
    D: InputPin,
    K: OutputPin,
    M: InterruptMask,
    C: Clock,
{
    fn read_raw(&mut self, timeout: Duration) -> HwResult<i32> {
        Ok(self.read_with_timeout(timeout)?)
    }

    fn power_down(&mut self, wait: bool) -> HwResult<()> {
        Hx711::power_down(self, wait);
        Ok(())
    }

    fn power_up(&mut self) -> HwResult<()> {
        Hx711::power_up(self);
        Ok(())
    }
}

fn shift_in<D: InputPin, K: OutputPin>(dt: &D, sck: &mut K, gain_pulses: u8) -> u32 {
    let mut value: u32 = 0;
    for _ in 0..24 {
        sck.set_high();
        spin_delay();
        value = (value << 1) | u32::from(dt.is_high());
        sck.set_low();
        spin_delay();
    }

    // Pulse gain to set next measurement
    for _ in 0..gain_pulses {
        sck.set_high();
        spin_delay();
        sck.set_low();
        spin_delay();
    }
    value
}

/// Interpret the low 24 bits as two's complement.
#[inline]
#[allow(clippy::cast_possible_wrap)]
pub fn sign_extend_24(word: u32) -> i32 {
    let mut value = (word & 0x00FF_FFFF) as i32;
    if (value & 0x0080_0000) != 0 {
        value |= !0x00FF_FFFF;
    }
    value
}

#[inline(always)]
fn spin_delay() {
    std::hint::spin_loop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x00_0000, 0)]
    #[case(0x7F_FFFF, 8_388_607)]
    #[case(0x80_0000, -8_388_608)]
    #[case(0xFF_FFFF, -1)]
    #[case(0x01_F400, 128_000)]
    fn sign_extension(#[case] word: u32, #[case] expected: i32) {
        assert_eq!(sign_extend_24(word), expected);
    }

    #[test]
    fn gain_pulse_counts() {
        assert_eq!(Gain::A128.pulses(), 1);
        assert_eq!(Gain::B32.pulses(), 2);
        assert_eq!(Gain::A64.pulses(), 3);
    }
}
