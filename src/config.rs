//! System configuration parameters
//!
//! All tunable parameters for the battlebot firmware.  Loaded once at boot
//! and passed by reference into each component — there is no module-level
//! mutable state.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Core system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- PWM / pulse bounds ---
    /// Servo-style ESC frame rate (Hz).
    pub pwm_freq_hz: u32,
    /// Drive ESC minimum pulse (µs) — idle, or full reverse if bidirectional.
    pub motor_min_us: u32,
    /// Drive ESC mid pulse (µs) — neutral for bidirectional ESCs.
    pub motor_mid_us: u32,
    /// Drive ESC maximum pulse (µs) — full forward.
    pub motor_max_us: u32,
    /// Weapon ESC minimum pulse (µs).
    pub weapon_min_us: u32,
    /// Weapon ESC mid pulse (µs).
    pub weapon_mid_us: u32,
    /// Weapon ESC maximum pulse (µs).
    pub weapon_max_us: u32,
    /// Hard safety clamp below which no pulse is ever programmed (µs).
    pub abs_min_us: u32,
    /// Hard safety clamp above which no pulse is ever programmed (µs).
    pub abs_max_us: u32,

    // --- Drive behaviour ---
    /// Maximum speed command magnitude (percent).
    pub max_speed: i16,
    /// Command magnitudes below this snap to zero (stick drift suppression).
    pub deadband: i16,
    /// True if the drive ESCs support reverse.  Most don't.
    pub bidirectional: bool,
    /// Seconds to hold the idle pulse during the ESC arming sequence.
    pub arm_hold_secs: f32,

    // --- Safety ---
    /// Master failsafe enable.
    pub enable_failsafe: bool,
    /// Stop everything if no command arrives within this window (ms).
    pub failsafe_timeout_ms: u32,
    /// Emergency stop when battery drops below `battery_min_voltage`.
    pub enable_low_battery_cutoff: bool,

    // --- Battery ---
    /// Emergency-stop threshold (V).
    pub battery_min_voltage: f32,
    /// Fully-charged voltage (V), upper end of the percent mapping.
    pub battery_max_voltage: f32,
    /// Voltage divider ratio between pack and ADC pin.
    pub battery_adc_ratio: f32,

    // --- Timing ---
    /// Control loop interval (milliseconds).
    pub control_loop_interval_ms: u32,
    /// Telemetry report interval (milliseconds).
    pub telemetry_interval_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            // PWM
            pwm_freq_hz: 50,
            motor_min_us: 1000,
            motor_mid_us: 1500,
            motor_max_us: 2000,
            weapon_min_us: 1000,
            weapon_mid_us: 1500,
            weapon_max_us: 2000,
            abs_min_us: 900,
            abs_max_us: 2100,

            // Drive
            max_speed: 100,
            deadband: 5,
            bidirectional: false,
            arm_hold_secs: 3.0,

            // Safety
            enable_failsafe: true,
            failsafe_timeout_ms: 500,
            enable_low_battery_cutoff: true,

            // Battery (3S LiPo)
            battery_min_voltage: 10.0,
            battery_max_voltage: 12.6,
            battery_adc_ratio: 5.7,

            // Timing
            control_loop_interval_ms: 20, // 50 Hz
            telemetry_interval_ms: 1000,  // 1 Hz
        }
    }
}

impl SystemConfig {
    /// Sanity-check the parameter set before any hardware is touched.
    /// A config that fails here would silently produce clamped-to-nonsense
    /// pulses, so boot refuses it instead.
    pub fn validate(&self) -> Result<()> {
        let drive_ordered = self.abs_min_us <= self.motor_min_us
            && self.motor_min_us <= self.motor_mid_us
            && self.motor_mid_us <= self.motor_max_us
            && self.motor_max_us <= self.abs_max_us;
        if !drive_ordered {
            return Err(Error::Config("drive pulse bounds out of order"));
        }

        let weapon_ordered = self.abs_min_us <= self.weapon_min_us
            && self.weapon_min_us <= self.weapon_mid_us
            && self.weapon_mid_us <= self.weapon_max_us
            && self.weapon_max_us <= self.abs_max_us;
        if !weapon_ordered {
            return Err(Error::Config("weapon pulse bounds out of order"));
        }

        if self.pwm_freq_hz == 0 {
            return Err(Error::Config("pwm frequency must be nonzero"));
        }
        if self.max_speed <= 0 {
            return Err(Error::Config("max speed must be positive"));
        }
        if self.deadband < 0 || self.deadband >= self.max_speed {
            return Err(Error::Config("deadband must sit inside the speed range"));
        }
        if self.control_loop_interval_ms == 0 {
            return Err(Error::Config("control loop interval must be nonzero"));
        }
        if self.enable_failsafe && self.failsafe_timeout_ms < self.control_loop_interval_ms {
            return Err(Error::Config("failsafe window shorter than one control tick"));
        }
        if self.battery_min_voltage >= self.battery_max_voltage {
            return Err(Error::Config("battery voltage range inverted"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(SystemConfig::default().validate(), Ok(()));
    }

    #[test]
    fn inverted_pulse_bounds_rejected() {
        let mut c = SystemConfig::default();
        c.motor_min_us = 2000;
        c.motor_max_us = 1000;
        assert!(matches!(c.validate(), Err(Error::Config(_))));

        let mut c = SystemConfig::default();
        c.weapon_max_us = 2500; // outside the absolute clamp
        assert!(matches!(c.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn degenerate_safety_params_rejected() {
        let mut c = SystemConfig::default();
        c.failsafe_timeout_ms = 5; // shorter than one 20 ms tick
        assert!(c.validate().is_err());

        let mut c = SystemConfig::default();
        c.deadband = c.max_speed;
        assert!(c.validate().is_err());

        let mut c = SystemConfig::default();
        c.battery_min_voltage = 13.0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn failsafe_window_spans_several_ticks() {
        let c = SystemConfig::default();
        assert!(
            c.failsafe_timeout_ms >= 5 * c.control_loop_interval_ms,
            "failsafe must tolerate a few missed control ticks"
        );
    }

    #[test]
    fn battery_range_is_ordered() {
        let c = SystemConfig::default();
        assert!(c.battery_min_voltage < c.battery_max_voltage);
        assert!(c.battery_adc_ratio > 1.0);
    }

    #[test]
    fn serde_roundtrip() {
        let c = SystemConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: SystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.motor_min_us, c2.motor_min_us);
        assert_eq!(c.deadband, c2.deadband);
        assert_eq!(c.bidirectional, c2.bidirectional);
        assert!((c.battery_min_voltage - c2.battery_min_voltage).abs() < 0.001);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = SystemConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: SystemConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.failsafe_timeout_ms, c2.failsafe_timeout_ms);
        assert_eq!(c.max_speed, c2.max_speed);
    }
}
