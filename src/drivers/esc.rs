//! Brushless ESC driver (servo-style PWM).
//!
//! One `EscDriver` exclusively owns one LEDC channel: throttle fractions are
//! mapped linearly onto the configured pulse range, every programmed pulse
//! is clamped to the absolute safety bounds, and the channel is released
//! exactly once on shutdown.
//!
//! Out-of-range input is never an error here — it is silently corrected by
//! clamping.  The only defensive behaviour an ESC signal path needs is to
//! never emit a pulse the hardware could misinterpret.
//!
//! Ramping is a tick-driven state machine, not a blocking loop: the control
//! loop calls [`EscDriver::ramp_tick`] each iteration, so failsafe checks
//! stay live for the whole ramp.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives real LEDC PWM via hw_init helpers.
//! On host/test: tracks state in-memory only (`last_pulse_us` is the
//! inspection point for tests).

use core::time::Duration;

use log::{info, warn};

use crate::config::SystemConfig;
use crate::drivers::hw_init;

// ---------------------------------------------------------------------------
// Pulse configuration
// ---------------------------------------------------------------------------

/// Per-actuator pulse mapping.  Immutable after driver construction.
///
/// Invariant: `abs_min_us ≤ min_us ≤ mid_us ≤ max_us ≤ abs_max_us`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseConfig {
    /// PWM frame rate (Hz).
    pub freq_hz: u32,
    /// Idle / full-reverse pulse (µs).
    pub min_us: u32,
    /// Neutral pulse for bidirectional ESCs (µs).
    pub mid_us: u32,
    /// Full-forward pulse (µs).
    pub max_us: u32,
    /// Hard lower clamp (µs).
    pub abs_min_us: u32,
    /// Hard upper clamp (µs).
    pub abs_max_us: u32,
}

impl PulseConfig {
    /// Pulse mapping for a drive ESC from the system configuration.
    pub fn drive(cfg: &SystemConfig) -> Self {
        Self {
            freq_hz: cfg.pwm_freq_hz,
            min_us: cfg.motor_min_us,
            mid_us: cfg.motor_mid_us,
            max_us: cfg.motor_max_us,
            abs_min_us: cfg.abs_min_us,
            abs_max_us: cfg.abs_max_us,
        }
    }

    /// Pulse mapping for the weapon ESC from the system configuration.
    pub fn weapon(cfg: &SystemConfig) -> Self {
        Self {
            freq_hz: cfg.pwm_freq_hz,
            min_us: cfg.weapon_min_us,
            mid_us: cfg.weapon_mid_us,
            max_us: cfg.weapon_max_us,
            abs_min_us: cfg.abs_min_us,
            abs_max_us: cfg.abs_max_us,
        }
    }

    /// True when the nominal range sits inside the absolute clamps.
    pub fn is_ordered(&self) -> bool {
        self.abs_min_us <= self.min_us
            && self.min_us <= self.mid_us
            && self.mid_us <= self.max_us
            && self.max_us <= self.abs_max_us
    }
}

// ---------------------------------------------------------------------------
// Ramp state machine
// ---------------------------------------------------------------------------

/// In-progress throttle ramp, advanced by [`EscDriver::ramp_tick`].
#[derive(Debug, Clone, Copy)]
struct RampState {
    start: f32,
    target: f32,
    elapsed_ms: u32,
    duration_ms: u32,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct EscDriver {
    cfg: PulseConfig,
    /// LEDC channel this driver exclusively owns.
    channel: u32,
    last_throttle: f32,
    last_pulse_us: u32,
    armed: bool,
    released: bool,
    ramp: Option<RampState>,
}

impl EscDriver {
    /// Take ownership of `channel` and hold the idle pulse state.
    ///
    /// The channel itself must have been configured by
    /// [`hw_init::init_peripherals`]; no pulse is emitted until the first
    /// command.
    pub fn new(cfg: PulseConfig, channel: u32) -> Self {
        debug_assert!(cfg.is_ordered(), "pulse bounds out of order");
        Self {
            cfg,
            channel,
            last_throttle: 0.0,
            last_pulse_us: 0,
            armed: false,
            released: false,
            ramp: None,
        }
    }

    /// Program a pulse width (µs), clamped to the absolute safety bounds.
    /// Out-of-range input is silently corrected, never rejected.
    pub fn set_pulse_us(&mut self, us: u32) {
        let us = us.clamp(self.cfg.abs_min_us, self.cfg.abs_max_us);
        if !self.released {
            hw_init::ledc_set_pulse_us(self.channel, us, self.cfg.freq_hz);
        }
        self.last_pulse_us = us;
    }

    /// Set throttle in `[0.0, 1.0]`, mapped linearly to `min_us..max_us`.
    /// Negatives floor to 0.0 — this actuator never reverses on its own;
    /// direction encoding is the drive controller's job.
    pub fn set_throttle(&mut self, t: f32) {
        let t = t.clamp(0.0, 1.0);
        let span = (self.cfg.max_us - self.cfg.min_us) as f32;
        let us = self.cfg.min_us + (t * span) as u32;
        self.set_pulse_us(us);
        self.last_throttle = t;
    }

    /// Immediately command the idle pulse.  Most ESCs require this signal
    /// continuously while stopped.
    pub fn stop(&mut self) {
        self.set_pulse_us(self.cfg.min_us);
        self.last_throttle = 0.0;
        self.ramp = None;
    }

    /// Hold the idle pulse for `hold` so the ESC can run its arming
    /// beep sequence, then mark the driver armed.
    ///
    /// Blocking — startup only, serialized per actuator.
    pub fn arm(&mut self, hold: Duration) {
        self.stop();
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        self.armed = true;
        info!("esc: channel {} armed", self.channel);
    }

    /// Command idle and clear the armed flag.
    pub fn disarm(&mut self) {
        self.stop();
        self.armed = false;
    }

    /// Begin a linear ramp from the current throttle to `target` (clamped
    /// to `[0.0, 1.0]`) over `duration_ms`.  Replaces any ramp in progress.
    pub fn start_ramp(&mut self, target: f32, duration_ms: u32) {
        let target = target.clamp(0.0, 1.0);
        self.ramp = Some(RampState {
            start: self.last_throttle,
            target,
            elapsed_ms: 0,
            duration_ms,
        });
    }

    /// Advance the ramp by `dt_ms`.  Returns `true` when no ramp remains
    /// in progress (including when none was started).  A zero-duration
    /// ramp snaps to the target on the first tick.
    pub fn ramp_tick(&mut self, dt_ms: u32) -> bool {
        let Some(mut ramp) = self.ramp else {
            return true;
        };

        ramp.elapsed_ms = ramp.elapsed_ms.saturating_add(dt_ms);
        if ramp.duration_ms == 0 || ramp.elapsed_ms >= ramp.duration_ms {
            self.set_throttle(ramp.target);
            self.ramp = None;
            return true;
        }

        let frac = ramp.elapsed_ms as f32 / ramp.duration_ms as f32;
        self.set_throttle(ramp.start + (ramp.target - ramp.start) * frac);
        self.ramp = Some(ramp);
        false
    }

    /// True while a ramp is in progress.
    pub fn is_ramping(&self) -> bool {
        self.ramp.is_some()
    }

    /// Safe shutdown: idle pulse, release the LEDC channel (once), clear
    /// the armed flag.  A failed hardware release is logged and swallowed —
    /// shutdown must always complete, and the driver ends up disarmed at
    /// zero throttle regardless.
    pub fn shutdown(&mut self) {
        self.stop();
        if !self.released {
            if !hw_init::ledc_release(self.channel) {
                warn!("esc: channel {} release failed", self.channel);
            }
            self.released = true;
        }
        self.armed = false;
    }

    // ── Inspection ───────────────────────────────────────────

    pub fn last_throttle(&self) -> f32 {
        self.last_throttle
    }

    /// The pulse width last programmed, post-clamp (µs).
    pub fn last_pulse_us(&self) -> u32 {
        self.last_pulse_us
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive_esc() -> EscDriver {
        EscDriver::new(PulseConfig::drive(&SystemConfig::default()), 0)
    }

    #[test]
    fn throttle_maps_linearly() {
        let mut esc = drive_esc();
        esc.set_throttle(0.0);
        assert_eq!(esc.last_pulse_us(), 1000);
        esc.set_throttle(0.5);
        assert_eq!(esc.last_pulse_us(), 1500);
        esc.set_throttle(1.0);
        assert_eq!(esc.last_pulse_us(), 2000);
    }

    #[test]
    fn throttle_clamps_and_negatives_floor_to_zero() {
        let mut esc = drive_esc();
        esc.set_throttle(1.5);
        assert_eq!(esc.last_pulse_us(), 2000);
        assert_eq!(esc.last_throttle(), 1.0);
        esc.set_throttle(-0.3);
        assert_eq!(esc.last_pulse_us(), 1000);
        assert_eq!(esc.last_throttle(), 0.0);
    }

    #[test]
    fn pulse_never_escapes_absolute_bounds() {
        let mut esc = drive_esc();
        esc.set_pulse_us(0);
        assert_eq!(esc.last_pulse_us(), 900);
        esc.set_pulse_us(50_000);
        assert_eq!(esc.last_pulse_us(), 2100);
    }

    #[test]
    fn stop_commands_idle_and_resets_throttle() {
        let mut esc = drive_esc();
        esc.set_throttle(0.8);
        esc.stop();
        assert_eq!(esc.last_pulse_us(), 1000);
        assert_eq!(esc.last_throttle(), 0.0);
    }

    #[test]
    fn arm_and_disarm() {
        let mut esc = drive_esc();
        assert!(!esc.is_armed());
        esc.arm(Duration::ZERO);
        assert!(esc.is_armed());
        assert_eq!(esc.last_pulse_us(), 1000);
        esc.disarm();
        assert!(!esc.is_armed());
    }

    #[test]
    fn ramp_is_monotone_and_ends_exactly_at_target() {
        let mut esc = drive_esc();
        esc.set_throttle(0.0);
        esc.start_ramp(1.0, 100);

        let mut samples = vec![esc.last_throttle()];
        while !esc.ramp_tick(10) {
            samples.push(esc.last_throttle());
        }
        samples.push(esc.last_throttle());

        for pair in samples.windows(2) {
            assert!(pair[1] >= pair[0], "ramp must be non-decreasing: {samples:?}");
        }
        assert_eq!(esc.last_throttle(), 1.0);
        assert!(!esc.is_ramping());
    }

    #[test]
    fn ramp_down_reaches_target() {
        let mut esc = drive_esc();
        esc.set_throttle(1.0);
        esc.start_ramp(0.25, 60);
        while !esc.ramp_tick(20) {}
        assert_eq!(esc.last_throttle(), 0.25);
    }

    #[test]
    fn zero_duration_ramp_snaps_on_first_tick() {
        let mut esc = drive_esc();
        esc.start_ramp(0.7, 0);
        assert!(esc.ramp_tick(1));
        assert_eq!(esc.last_throttle(), 0.7);
    }

    #[test]
    fn ramp_target_is_clamped() {
        let mut esc = drive_esc();
        esc.start_ramp(4.0, 10);
        while !esc.ramp_tick(5) {}
        assert_eq!(esc.last_throttle(), 1.0);
    }

    #[test]
    fn stop_cancels_ramp() {
        let mut esc = drive_esc();
        esc.start_ramp(1.0, 1000);
        assert!(!esc.ramp_tick(10));
        esc.stop();
        assert!(!esc.is_ramping());
        assert!(esc.ramp_tick(10));
        assert_eq!(esc.last_throttle(), 0.0);
    }

    #[test]
    fn shutdown_is_idempotent_and_disarms() {
        let mut esc = drive_esc();
        esc.arm(Duration::ZERO);
        esc.set_throttle(0.6);
        esc.shutdown();
        assert!(!esc.is_armed());
        assert!(esc.is_released());
        assert_eq!(esc.last_pulse_us(), 1000);
        // Second shutdown changes nothing.
        esc.shutdown();
        assert!(esc.is_released());
        assert_eq!(esc.last_pulse_us(), 1000);
    }
}
