//! Mirror LED driver.
//!
//! Drives a single GPIO that follows the LED state the client last
//! acknowledged. Generic over `embedded_hal::digital::OutputPin`, so the
//! device build hands in an `esp_idf_hal` `PinDriver` and host tests hand
//! in a recording pin.

use std::sync::Mutex;

use embedded_hal::digital::OutputPin;
use log::warn;

use crate::app::command::LedState;
use crate::app::ports::LedPort;

pub struct StatusLed<P> {
    pin: Mutex<P>,
    active_low: bool,
}

impl<P: OutputPin + Send> StatusLed<P> {
    pub fn new(pin: P) -> Self {
        Self {
            pin: Mutex::new(pin),
            active_low: false,
        }
    }

    /// LED wired between VCC and the GPIO.
    pub fn active_low(pin: P) -> Self {
        Self {
            pin: Mutex::new(pin),
            active_low: true,
        }
    }
}

impl<P: OutputPin + Send> LedPort for StatusLed<P> {
    fn show(&self, state: LedState) {
        let lit = state == LedState::On;
        let mut pin = self.pin.lock().unwrap_or_else(|p| p.into_inner());
        let result = if lit != self.active_low {
            pin.set_high()
        } else {
            pin.set_low()
        };
        if result.is_err() {
            warn!("LED: failed to drive pin to {:?}", state);
        }
    }
}
