//! ESC drivers, hardware initialisation, and peripheral helpers.

pub mod esc;
pub mod hw_init;
pub mod hw_timer;
pub mod status_led;
pub mod watchdog;
