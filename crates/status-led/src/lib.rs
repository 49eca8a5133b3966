//! Status Indicator: three GPIO output lines, one asserted at a time.
//!
//! Grounded in `examples/original_source/Authentication.py::gpio_gry_set`
//! and `pi_api_server.py::set_led_status`: green on BCM pin 5, red on pin
//! 6, yellow on pin 12. The Python source falls back to a `GPIO = None`
//! mock mode when `RPi.GPIO` can't be imported (no header present); this
//! preserves the same headless tolerance with `rppal` instead.

use tracing::warn;

const GREEN_PIN: u8 = 5;
const RED_PIN: u8 = 6;
const YELLOW_PIN: u8 = 12;

/// One of the three states `spec.md` §4.8 names. Exactly one color is
/// asserted at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedState {
    Idle,
    Success,
    Failure,
}

enum Backend {
    Gpio {
        green: rppal::gpio::OutputPin,
        red: rppal::gpio::OutputPin,
        yellow: rppal::gpio::OutputPin,
    },
    Headless,
}

/// The status indicator. Not safety-critical: on a host with no GPIO
/// header, every call to [`StatusLed::set`] is simply a no-op.
pub struct StatusLed {
    backend: Backend,
}

impl StatusLed {
    /// Acquire the three output lines. Falls back to a headless no-op
    /// backend (with a single warning) if the GPIO chip can't be opened —
    /// the same tolerance as the source's `except ImportError` path.
    pub fn init() -> Self {
        match Self::try_acquire_gpio() {
            Ok(backend) => StatusLed { backend },
            Err(e) => {
                warn!(error = %e, "GPIO unavailable, status indicator running headless");
                StatusLed {
                    backend: Backend::Headless,
                }
            }
        }
    }

    fn try_acquire_gpio() -> Result<Backend, rppal::gpio::Error> {
        let gpio = rppal::gpio::Gpio::new()?;
        let mut green = gpio.get(GREEN_PIN)?.into_output();
        let mut red = gpio.get(RED_PIN)?.into_output();
        let mut yellow = gpio.get(YELLOW_PIN)?.into_output();
        green.set_low();
        red.set_low();
        yellow.set_high();
        Ok(Backend::Gpio { green, red, yellow })
    }

    /// Assert `state`, clearing the other two lines. No-op when headless.
    pub fn set(&mut self, state: LedState) {
        if let Backend::Gpio { green, red, yellow } = &mut self.backend {
            let (g, r, y) = match state {
                LedState::Idle => (false, false, true),
                LedState::Success => (true, false, false),
                LedState::Failure => (false, true, false),
            };
            set_line(green, g);
            set_line(red, r);
            set_line(yellow, y);
        }
    }

    pub fn is_headless(&self) -> bool {
        matches!(self.backend, Backend::Headless)
    }
}

fn set_line(pin: &mut rppal::gpio::OutputPin, high: bool) {
    if high {
        pin.set_high();
    } else {
        pin.set_low();
    }
}
