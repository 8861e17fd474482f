//! Raspberry Pi GPIO backed by `rppal`.

use irrigo_traits::{HwResult, InputPin, OutputPin, PwmOutput};
use rppal::gpio::Gpio;

use crate::error::{HwError, Result};

pub struct RpiInput(rppal::gpio::InputPin);
pub struct RpiOutput(rppal::gpio::OutputPin);

/// Software PWM on a plain GPIO line.
pub struct RpiSoftPwm(rppal::gpio::OutputPin);

fn gpio() -> Result<Gpio> {
    Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))
}

pub fn input(pin: u8) -> Result<RpiInput> {
    let p = gpio()?
        .get(pin)
        .map_err(|e| HwError::Gpio(format!("open pin {pin}: {e}")))?
        .into_input();
    Ok(RpiInput(p))
}

pub fn output(pin: u8) -> Result<RpiOutput> {
    let p = gpio()?
        .get(pin)
        .map_err(|e| HwError::Gpio(format!("open pin {pin}: {e}")))?
        .into_output_low();
    Ok(RpiOutput(p))
}

pub fn soft_pwm(pin: u8) -> Result<RpiSoftPwm> {
    output(pin).map(|o| RpiSoftPwm(o.0))
}

impl InputPin for RpiInput {
    fn is_high(&self) -> bool {
        self.0.is_high()
    }
}

impl OutputPin for RpiOutput {
    fn set_high(&mut self) {
        self.0.set_high();
    }

    fn set_low(&mut self) {
        self.0.set_low();
    }
}

impl PwmOutput for RpiSoftPwm {
    fn set_pwm(&mut self, frequency_hz: f64, duty: f64) -> HwResult<()> {
        self.0
            .set_pwm_frequency(frequency_hz, duty.clamp(0.0, 1.0))
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        Ok(())
    }

    fn disable(&mut self) -> HwResult<()> {
        self.0
            .clear_pwm()
            .map_err(|e| HwError::Gpio(e.to_string()))?;
        self.0.set_low();
        Ok(())
    }
}
