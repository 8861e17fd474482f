//! Digital pins, PWM outputs and interrupt masking.

use crate::HwResult;

/// Digital output pin.
pub trait OutputPin {
    fn set_high(&mut self);
    fn set_low(&mut self);

    fn set_level(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }
}

/// Digital input pin.
pub trait InputPin {
    fn is_high(&self) -> bool;

    fn is_low(&self) -> bool {
        !self.is_high()
    }
}

/// A PWM-capable output.
///
/// `duty` is a fraction in `[0.0, 1.0]`; implementations clamp out-of-range
/// values rather than failing.
pub trait PwmOutput {
    fn set_pwm(&mut self, frequency_hz: f64, duty: f64) -> HwResult<()>;

    /// Stop driving the output (duty 0, output released).
    fn disable(&mut self) -> HwResult<()>;
}

/// Masks interrupts around timing-critical bit-banging.
pub trait InterruptMask {
    fn masked<R>(&mut self, f: impl FnOnce() -> R) -> R;
}

/// Mask for platforms without interrupt control; runs the closure as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMask;

impl InterruptMask for NoMask {
    #[inline]
    fn masked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn set_high(&mut self) {
        (**self).set_high();
    }

    fn set_low(&mut self) {
        (**self).set_low();
    }
}

impl<P: PwmOutput + ?Sized> PwmOutput for Box<P> {
    fn set_pwm(&mut self, frequency_hz: f64, duty: f64) -> HwResult<()> {
        (**self).set_pwm(frequency_hz, duty)
    }

    fn disable(&mut self) -> HwResult<()> {
        (**self).disable()
    }
}
