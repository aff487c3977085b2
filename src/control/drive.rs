//! Drive controller: command validation and mixing across three ESCs.
//!
//! Layers deadband, speed clamping, tank/arcade mixing, the weapon arming
//! gate, and the failsafe timeout on top of the dumb [`EscDriver`]s.  The
//! controller is the only writer of its three actuators.
//!
//! Time is injected (`now_ms`, monotonic milliseconds) rather than read
//! internally, so every path is deterministic on the host.
//!
//! ## Failsafe contract
//!
//! The staleness predicate and the stopping action are deliberately split:
//! [`DriveController::is_stale`] is pure and safe to call from anywhere
//! (status reads included), while [`DriveController::enforce_failsafe`] is
//! called exactly once per control tick by the main loop and is the only
//! path that stops motors on timeout.  A status poll can never stop the
//! robot.

use log::{info, warn};
use serde::Serialize;

use crate::config::SystemConfig;
use crate::drivers::esc::EscDriver;

/// Read-only snapshot for external consumers (web monitor, log record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MotorStatus {
    /// Last accepted left speed, post-deadband, post-clamp (percent).
    pub left: i16,
    /// Last accepted right speed (percent).
    pub right: i16,
    /// Last accepted weapon speed (percent).
    pub weapon: i16,
    /// Weapon arming gate.
    pub armed: bool,
    /// False once the command stream has gone stale.
    pub failsafe_ok: bool,
}

pub struct DriveController {
    left: EscDriver,
    right: EscDriver,
    weapon: EscDriver,

    // Last accepted values, retained for status reporting and logging —
    // never reapplied on read.
    left_speed: i16,
    right_speed: i16,
    weapon_speed: i16,

    /// Weapon arming gate, independent of the per-ESC armed flags.
    armed: bool,
    /// Monotonic timestamp of the last accepted command — the sole input
    /// to the failsafe check.
    last_command_ms: u64,

    max_speed: i16,
    deadband: i16,
    bidirectional: bool,
    enable_failsafe: bool,
    failsafe_timeout_ms: u32,
}

impl DriveController {
    /// Take ownership of the three ESC drivers.  `now_ms` seeds the
    /// command timestamp so the failsafe window starts at construction.
    pub fn new(
        cfg: &SystemConfig,
        left: EscDriver,
        right: EscDriver,
        weapon: EscDriver,
        now_ms: u64,
    ) -> Self {
        Self {
            left,
            right,
            weapon,
            left_speed: 0,
            right_speed: 0,
            weapon_speed: 0,
            armed: false,
            last_command_ms: now_ms,
            max_speed: cfg.max_speed,
            deadband: cfg.deadband,
            bidirectional: cfg.bidirectional,
            enable_failsafe: cfg.enable_failsafe,
            failsafe_timeout_ms: cfg.failsafe_timeout_ms,
        }
    }

    // ── Command setters ──────────────────────────────────────

    /// Set left drive speed, -100..100 (negative = reverse).
    pub fn set_left(&mut self, speed: i16, now_ms: u64) {
        let speed = self.condition(speed);
        let throttle = self.drive_throttle(speed);
        self.left.set_throttle(throttle);
        self.left_speed = speed;
        self.last_command_ms = now_ms;
    }

    /// Set right drive speed, -100..100 (negative = reverse).
    pub fn set_right(&mut self, speed: i16, now_ms: u64) {
        let speed = self.condition(speed);
        let throttle = self.drive_throttle(speed);
        self.right.set_throttle(throttle);
        self.right_speed = speed;
        self.last_command_ms = now_ms;
    }

    /// Set weapon speed, 0..100.  Forced to zero while the weapon is not
    /// armed — the gate wins over any input.
    pub fn set_weapon(&mut self, speed: i16, now_ms: u64) {
        let speed = if self.armed { speed } else { 0 };
        let speed = speed.clamp(0, self.max_speed);
        self.weapon.set_throttle(speed as f32 / 100.0);
        self.weapon_speed = speed;
        self.last_command_ms = now_ms;
    }

    /// Tank drive: independent left/right speeds.
    pub fn set_tank(&mut self, left: i16, right: i16, now_ms: u64) {
        self.set_left(left, now_ms);
        self.set_right(right, now_ms);
    }

    /// Arcade drive mixing: throttle (forward/back) + turn (left/right),
    /// each -100..100.  When the mix exceeds 100 in magnitude, both sides
    /// are scaled down proportionally so the larger side is exactly 100 —
    /// preserving the mix ratio instead of letting the clamp clip it.
    pub fn set_arcade(&mut self, throttle: i16, turn: i16, now_ms: u64) {
        // Mix in f32 so extreme stick values cannot overflow i16.
        let mut left = f32::from(throttle) + f32::from(turn);
        let mut right = f32::from(throttle) - f32::from(turn);

        let max_val = left.abs().max(right.abs());
        if max_val > 100.0 {
            left = left / max_val * 100.0;
            right = right / max_val * 100.0;
        }

        self.set_tank(left as i16, right as i16, now_ms);
    }

    // ── Weapon arming gate ───────────────────────────────────

    /// Arm the weapon — must be called before the weapon will spin.
    pub fn arm_weapon(&mut self) {
        self.armed = true;
        info!("weapon ARMED");
    }

    /// Disarm the weapon and force it to zero.
    pub fn disarm_weapon(&mut self, now_ms: u64) {
        self.armed = false;
        self.set_weapon(0, now_ms);
        info!("weapon DISARMED");
    }

    // ── Emergency stop / failsafe ────────────────────────────

    /// Emergency stop: all motors to zero through their normal setters,
    /// then disarm the weapon.  Callable at any time, idempotent.
    pub fn stop_all(&mut self, now_ms: u64) {
        self.set_left(0, now_ms);
        self.set_right(0, now_ms);
        self.set_weapon(0, now_ms);
        self.disarm_weapon(now_ms);
    }

    /// Pure staleness predicate: true when failsafe is enabled and no
    /// command has been accepted within the timeout window.  Never mutates.
    pub fn is_stale(&self, now_ms: u64) -> bool {
        if !self.enable_failsafe {
            return false;
        }
        now_ms.saturating_sub(self.last_command_ms) > u64::from(self.failsafe_timeout_ms)
    }

    /// Enforce the failsafe: if the command stream is stale, stop
    /// everything and report the trip.  Called once per control tick from
    /// the main loop.  The stop itself stamps the command time, so a trip
    /// reports once per stale window rather than on every tick.
    pub fn enforce_failsafe(&mut self, now_ms: u64) -> bool {
        if self.is_stale(now_ms) {
            warn!("failsafe tripped — stopping all motors");
            self.stop_all(now_ms);
            return true;
        }
        false
    }

    // ── Status / shutdown ────────────────────────────────────

    /// Read-only snapshot for the web monitor and the log record.
    /// Side-effect free: uses only the pure staleness predicate.
    pub fn get_status(&self, now_ms: u64) -> MotorStatus {
        MotorStatus {
            left: self.left_speed,
            right: self.right_speed,
            weapon: self.weapon_speed,
            armed: self.armed,
            failsafe_ok: !self.is_stale(now_ms),
        }
    }

    /// Shut down all three actuators and release their channels.
    pub fn shutdown(&mut self) {
        self.armed = false;
        self.left.shutdown();
        self.right.shutdown();
        self.weapon.shutdown();
    }

    /// Advance any in-progress throttle ramps by `dt_ms`.
    pub fn ramp_tick(&mut self, dt_ms: u32) {
        let _ = self.left.ramp_tick(dt_ms);
        let _ = self.right.ramp_tick(dt_ms);
        let _ = self.weapon.ramp_tick(dt_ms);
    }

    // ── Actuator access (arming sequence, tests) ─────────────

    pub fn left_esc(&mut self) -> &mut EscDriver {
        &mut self.left
    }

    pub fn right_esc(&mut self) -> &mut EscDriver {
        &mut self.right
    }

    pub fn weapon_esc(&mut self) -> &mut EscDriver {
        &mut self.weapon
    }

    // ── Internal ─────────────────────────────────────────────

    /// Deadband then clamp a raw speed command.  Widened to i32 so the
    /// full i16 range (including `i16::MIN`, whose negation overflows)
    /// clamps instead of panicking.
    fn condition(&self, speed: i16) -> i16 {
        let speed = i32::from(speed);
        let speed = if speed.abs() < i32::from(self.deadband) {
            0
        } else {
            speed
        };
        speed.clamp(-i32::from(self.max_speed), i32::from(self.max_speed)) as i16
    }

    /// Convert a signed percentage to an actuator throttle fraction.
    ///
    /// Bidirectional ESCs take 0.5 as neutral; forward-only ESCs get the
    /// absolute value, deliberately discarding the sign (reverse intent is
    /// lost — pinned by a test, not a bug to fix).
    fn drive_throttle(&self, speed: i16) -> f32 {
        if self.bidirectional {
            f32::from(speed + 100) / 200.0
        } else {
            f32::from(speed.abs()) / 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::esc::PulseConfig;

    fn controller(cfg: &SystemConfig) -> DriveController {
        DriveController::new(
            cfg,
            EscDriver::new(PulseConfig::drive(cfg), 0),
            EscDriver::new(PulseConfig::drive(cfg), 1),
            EscDriver::new(PulseConfig::weapon(cfg), 2),
            0,
        )
    }

    fn default_controller() -> DriveController {
        controller(&SystemConfig::default())
    }

    #[test]
    fn deadband_snaps_small_commands_to_zero() {
        let mut dc = default_controller();
        for speed in [-4, -1, 0, 1, 4] {
            dc.set_left(speed, 0);
            assert_eq!(dc.get_status(0).left, 0, "speed {speed} inside deadband");
        }
        dc.set_left(5, 0);
        assert_eq!(dc.get_status(0).left, 5);
    }

    #[test]
    fn speeds_clamp_to_max() {
        let mut dc = default_controller();
        dc.set_left(150, 0);
        assert_eq!(dc.get_status(0).left, 100);
        dc.set_left(-150, 0);
        assert_eq!(dc.get_status(0).left, -100);
    }

    #[test]
    fn extreme_commands_clamp_without_panicking() {
        let mut dc = default_controller();
        dc.set_left(i16::MIN, 0);
        assert_eq!(dc.get_status(0).left, -100);
        dc.set_right(i16::MAX, 0);
        assert_eq!(dc.get_status(0).right, 100);

        dc.set_arcade(i16::MIN, i16::MIN, 0);
        let s = dc.get_status(0);
        assert_eq!(s.left, -100);
        assert_eq!(s.right, 0);
    }

    #[test]
    fn forward_only_mapping_discards_sign() {
        // Forward-only ESCs get |speed|/100 — reverse intent is lost by
        // design; this test pins the behaviour.
        let mut dc = default_controller();
        dc.set_left(60, 0);
        let forward_us = dc.left_esc().last_pulse_us();
        dc.set_left(-60, 0);
        assert_eq!(dc.left_esc().last_pulse_us(), forward_us);
        assert_eq!(dc.get_status(0).left, -60, "reported speed keeps the sign");
    }

    #[test]
    fn bidirectional_mapping_centres_on_neutral() {
        let cfg = SystemConfig {
            bidirectional: true,
            ..SystemConfig::default()
        };
        let mut dc = controller(&cfg);
        dc.set_left(0, 0);
        assert_eq!(dc.left_esc().last_pulse_us(), 1500);
        dc.set_left(100, 0);
        assert_eq!(dc.left_esc().last_pulse_us(), 2000);
        dc.set_left(-100, 0);
        assert_eq!(dc.left_esc().last_pulse_us(), 1000);
    }

    #[test]
    fn arcade_mixing_normalizes_proportionally() {
        let mut dc = default_controller();
        // raw (140, 20) → scaled so the larger side is exactly 100.
        dc.set_arcade(80, 60, 0);
        let s = dc.get_status(0);
        assert_eq!(s.left, 100);
        assert_eq!(s.right, 14);
    }

    #[test]
    fn arcade_mixing_without_saturation_passes_through() {
        let mut dc = default_controller();
        dc.set_arcade(50, 20, 0);
        let s = dc.get_status(0);
        assert_eq!(s.left, 70);
        assert_eq!(s.right, 30);
    }

    #[test]
    fn weapon_is_gated_by_arming() {
        let mut dc = default_controller();
        dc.set_weapon(50, 0);
        assert_eq!(dc.get_status(0).weapon, 0);

        dc.arm_weapon();
        dc.set_weapon(50, 0);
        assert_eq!(dc.get_status(0).weapon, 50);

        dc.disarm_weapon(0);
        assert_eq!(dc.get_status(0).weapon, 0);
        // A new command while disarmed stays gated.
        dc.set_weapon(80, 0);
        assert_eq!(dc.get_status(0).weapon, 0);
    }

    #[test]
    fn failsafe_trips_after_timeout_and_stops_everything() {
        let mut dc = default_controller();
        dc.arm_weapon();
        dc.set_tank(60, -40, 0);
        dc.set_weapon(70, 0);

        // Inside the window: healthy.
        assert!(!dc.is_stale(400));
        assert!(!dc.enforce_failsafe(400));

        // Past the window: trip.
        assert!(dc.is_stale(501));
        assert!(dc.enforce_failsafe(501));
        let s = dc.get_status(501);
        assert_eq!((s.left, s.right, s.weapon), (0, 0, 0));
        assert!(!s.armed);
        assert!(s.failsafe_ok, "stop refreshed the command window");
    }

    #[test]
    fn failsafe_disabled_never_trips() {
        let cfg = SystemConfig {
            enable_failsafe: false,
            ..SystemConfig::default()
        };
        let mut dc = controller(&cfg);
        assert!(!dc.is_stale(1_000_000));
        assert!(!dc.enforce_failsafe(1_000_000));
    }

    #[test]
    fn status_read_is_side_effect_free() {
        let mut dc = default_controller();
        dc.set_tank(30, 30, 0);
        // Stale status read must report the trip without stopping anything.
        let s = dc.get_status(10_000);
        assert!(!s.failsafe_ok);
        assert_eq!(s.left, 30);
        assert_eq!(s.right, 30);
    }

    #[test]
    fn stop_all_is_idempotent() {
        let mut dc = default_controller();
        dc.arm_weapon();
        dc.set_tank(80, 80, 0);
        dc.set_weapon(90, 0);

        dc.stop_all(1);
        let first = dc.get_status(1);
        dc.stop_all(2);
        let second = dc.get_status(2);
        assert_eq!(first, second);
        assert_eq!((first.left, first.right, first.weapon), (0, 0, 0));
        assert!(!first.armed);
    }

    #[test]
    fn enforce_failsafe_reports_once_per_stale_window() {
        let mut dc = default_controller();
        dc.set_tank(40, 40, 0);
        assert!(dc.enforce_failsafe(600));
        // The stop stamped the window; the next tick is healthy again.
        assert!(!dc.enforce_failsafe(620));
        // Let it go stale a second time with no commands.
        assert!(dc.enforce_failsafe(1_200));
    }
}
