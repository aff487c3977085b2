//! Onboard status LED driver.
//!
//! A single digital LED: solid while disarmed, blinked from the control
//! tick while armed so the driver can see the loop is alive.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives the GPIO via hw_init.
//! On host/test: tracks state in-memory only.

use crate::drivers::hw_init;
use crate::pins;

pub struct StatusLed {
    lit: bool,
}

impl StatusLed {
    pub fn new() -> Self {
        Self { lit: false }
    }

    pub fn set(&mut self, lit: bool) {
        hw_init::gpio_write(pins::STATUS_LED_GPIO, lit);
        self.lit = lit;
    }

    pub fn on(&mut self) {
        self.set(true);
    }

    pub fn off(&mut self) {
        self.set(false);
    }

    pub fn toggle(&mut self) {
        self.set(!self.lit);
    }

    pub fn is_lit(&self) -> bool {
        self.lit
    }
}

impl Default for StatusLed {
    fn default() -> Self {
        Self::new()
    }
}
