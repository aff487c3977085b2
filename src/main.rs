//! Battlebot firmware — main entry point.
//!
//! Event-driven single-task design:
//!
//! ```text
//! esp_timer callbacks ──► lock-free event queue ──► main loop
//!   ControlTick (50 Hz)                               ├─ failsafe check
//!   TelemetryTick (1 Hz)                              ├─ ramp advancement
//!                                                     ├─ status LED
//!                                                     └─ battery / log record
//! ```
//!
//! Command ingress (the RC link / web UI collaborator) calls the
//! [`DriveController`] setters; without fresh commands the failsafe holds
//! every ESC at stop within one timeout window.
#![deny(unused_must_use)]

// ── Module declarations ───────────────────────────────────────
mod config;
mod control;
mod drivers;
mod error;
mod events;
mod pins;
mod telemetry;
mod timing;

// ── Imports ───────────────────────────────────────────────────
use core::time::Duration;

use anyhow::Result;
use log::{info, warn};

use config::SystemConfig;
use control::drive::DriveController;
use drivers::esc::{EscDriver, PulseConfig};
use drivers::status_led::StatusLed;
use drivers::watchdog::TaskWatchdog;
use error::SafetyFault;
use events::Event;
use telemetry::{LogRecord, RecordBuffer, TelemetryCollector};
use timing::IntervalTimer;

/// TWDT reset window. Generous next to the 20 ms control tick — the TWDT
/// only catches a fully wedged loop, not a late one.
const HW_WATCHDOG_TIMEOUT_MS: u32 = 10_000;

/// Armed-state LED blink half-period.
const LED_BLINK_MS: u32 = 500;

/// Monotonic milliseconds since boot.
#[cfg(target_os = "espidf")]
fn uptime_ms() -> u64 {
    // SAFETY: esp_timer_get_time has no preconditions after esp_timer init,
    // which ESP-IDF performs before app_main.
    (unsafe { esp_idf_svc::sys::esp_timer_get_time() } as u64) / 1000
}

#[cfg(not(target_os = "espidf"))]
fn uptime_ms() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  Battlebot v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    // Compile-time defaults; tuning happens here, not at runtime.
    // Validated before any hardware is touched.
    let config = SystemConfig::default();
    config.validate()?;
    info!(
        "config: pwm={}Hz motors={}..{}us weapon={}..{}us failsafe={}ms",
        config.pwm_freq_hz,
        config.motor_min_us,
        config.motor_max_us,
        config.weapon_min_us,
        config.weapon_max_us,
        config.failsafe_timeout_ms
    );

    // ── 3. Hardware peripherals ───────────────────────────────
    if let Err(e) = drivers::hw_init::init_peripherals() {
        // With no working LEDC the ESCs see no signal and stay stopped,
        // which is the safe state. Halt and let the TWDT reset us.
        log::error!("HAL init failed: {} — halting", e);
        #[allow(clippy::empty_loop)]
        loop {}
    }
    let watchdog = TaskWatchdog::new(HW_WATCHDOG_TIMEOUT_MS);

    // ── 4. ESC arming sequence ────────────────────────────────
    // ESCs must see a sustained minimum pulse at power-on before they
    // accept throttle. The first hold covers the full ESC boot; later
    // ones only need the signal settled, since the ESCs booted together.
    let mut left = EscDriver::new(PulseConfig::drive(&config), pins::LEDC_CH_MOTOR_LEFT);
    let mut right = EscDriver::new(PulseConfig::drive(&config), pins::LEDC_CH_MOTOR_RIGHT);
    let mut weapon = EscDriver::new(PulseConfig::weapon(&config), pins::LEDC_CH_WEAPON);

    info!("arming ESCs ({:.1}s hold)...", config.arm_hold_secs);
    left.arm(Duration::from_secs_f32(config.arm_hold_secs));
    right.arm(Duration::from_millis(100));
    weapon.arm(Duration::from_millis(100));
    info!("ESCs armed");

    // ── 5. Coordinator + telemetry + LED ──────────────────────
    let mut drive = DriveController::new(&config, left, right, weapon, uptime_ms());
    let mut collector = TelemetryCollector::new(&config);
    let mut led = StatusLed::new();
    led.on();

    let mut blink = IntervalTimer::new(LED_BLINK_MS, uptime_ms());
    let mut records = RecordBuffer::new();
    let mut faults: u8 = 0;

    // ── 6. Tick timers + event loop ───────────────────────────
    drivers::hw_timer::start_timers(config.control_loop_interval_ms, config.telemetry_interval_ms);
    info!("system ready, entering event loop");

    loop {
        // On real hardware the esp_timer callbacks feed the queue; yield
        // to the idle task between drains instead of spinning the core.
        #[cfg(target_os = "espidf")]
        esp_idf_hal::delay::FreeRtos::delay_ms(1);

        // Simulate timer interrupts via sleep on non-espidf targets.
        #[cfg(not(target_os = "espidf"))]
        {
            std::thread::sleep(std::time::Duration::from_millis(u64::from(
                config.control_loop_interval_ms,
            )));
            events::push_event(Event::ControlTick);
        }

        events::drain_events(|event| {
            let now = uptime_ms();
            match event {
                Event::ControlTick => {
                    if drive.enforce_failsafe(now) {
                        faults |= SafetyFault::CommandTimeout.mask();
                    }
                    drive.ramp_tick(config.control_loop_interval_ms);

                    if drive.get_status(now).armed {
                        if blink.expired(now) {
                            led.toggle();
                        }
                    } else {
                        led.on();
                    }

                    watchdog.feed();
                }

                Event::TelemetryTick => {
                    let battery = collector.read_battery();
                    if config.enable_low_battery_cutoff && collector.is_battery_critical() {
                        warn!(
                            "battery critical ({:.2}V) — stopping motors, disarming weapon",
                            battery.voltage
                        );
                        drive.stop_all(now);
                        drive.disarm_weapon(now);
                        faults |= SafetyFault::LowBattery.mask();
                    }

                    let status = drive.get_status(now);
                    let flags = collector.status_flags(&status, faults);
                    let record =
                        LogRecord::from_status(now as u32, &status, battery, flags);
                    info!(
                        "telemetry: L={} R={} W={} batt={:.2}V ({}%) flags={:#04x}",
                        status.left,
                        status.right,
                        status.weapon,
                        battery.voltage,
                        battery.percent,
                        flags
                    );
                    // The flash writer task drains this buffer; until it is
                    // wired, spill to the console so the buffer cycles.
                    records.push(&record);
                    if records.len() >= RecordBuffer::CAPACITY / 2 {
                        records.drain(|rec| log::trace!("record: {:02x?}", rec));
                    }
                }
            }
        });
    }
}
