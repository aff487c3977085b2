//! GPIO / peripheral pin assignments for the battlebot main board.
//!
//! Single source of truth — every driver references this module rather than
//! hard-coding pin numbers.  Change a pin here and it propagates everywhere.

// ---------------------------------------------------------------------------
// ESC signal outputs (servo-style PWM, one wire per ESC)
// ---------------------------------------------------------------------------

/// Left drive ESC signal.
pub const MOTOR_LEFT_PWM_GPIO: i32 = 1;
/// Right drive ESC signal.
pub const MOTOR_RIGHT_PWM_GPIO: i32 = 2;
/// Weapon ESC signal.
pub const WEAPON_PWM_GPIO: i32 = 3;

// ---------------------------------------------------------------------------
// Sensors — Analog (ADC1)
// ---------------------------------------------------------------------------

/// Battery voltage via resistive divider (3S LiPo → ADC range).
/// ADC1 channel 4 (GPIO 5 on ESP32-S3).
pub const BATTERY_ADC_GPIO: i32 = 5;
/// ADC1 channel for the battery divider.
pub const BATTERY_ADC_CHANNEL: u32 = 4;

// ---------------------------------------------------------------------------
// Status LED (single onboard LED, digital)
// ---------------------------------------------------------------------------

pub const STATUS_LED_GPIO: i32 = 8;

// ---------------------------------------------------------------------------
// PWM configuration
// ---------------------------------------------------------------------------

/// LEDC timer resolution (bits).  14-bit at 50 Hz gives ~1.22 µs per count,
/// fine enough for 900–2100 µs servo pulses.
pub const PWM_RESOLUTION_BITS: u32 = 14;
/// Servo-style ESC frame rate.
pub const ESC_PWM_FREQ_HZ: u32 = 50;

/// LEDC channel assignments (all on timer 0).
pub const LEDC_CH_MOTOR_LEFT: u32 = 0;
pub const LEDC_CH_MOTOR_RIGHT: u32 = 1;
pub const LEDC_CH_WEAPON: u32 = 2;
