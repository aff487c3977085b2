//! One-shot hardware peripheral initialization.
//!
//! Configures the battery ADC channel, the status LED GPIO, and the LEDC
//! timer/channels that generate the servo-style ESC pulses, using raw
//! ESP-IDF sys calls.  Called once from `main()` before the event loop
//! starts.
//!
//! All three ESC channels share LEDC timer 0 at 50 Hz with 14-bit
//! resolution, so pulse widths are programmed in microseconds and converted
//! to duty counts here.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

use crate::pins;

#[cfg(target_os = "espidf")]
use crate::error::Error;
use crate::error::Result;

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<()> {
    // SAFETY: Called once from main() before the event loop; single-threaded.
    unsafe {
        init_adc()?;
        init_gpio_outputs()?;
        init_ledc()?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<()> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── ADC (oneshot) ─────────────────────────────────────────────

#[cfg(target_os = "espidf")]
static mut ADC1_HANDLE: adc_oneshot_unit_handle_t = core::ptr::null_mut();

/// SAFETY: Must be called only from the single-threaded init path or the
/// main-loop ADC read path.  `init_adc()` completes before the event loop
/// starts, so no concurrent access is possible.
#[cfg(target_os = "espidf")]
unsafe fn adc1_handle() -> adc_oneshot_unit_handle_t {
    unsafe { ADC1_HANDLE }
}

#[cfg(target_os = "espidf")]
unsafe fn init_adc() -> Result<()> {
    let init_cfg = adc_oneshot_unit_init_cfg_t {
        unit_id: adc_unit_t_ADC_UNIT_1,
        ulp_mode: adc_ulp_mode_t_ADC_ULP_MODE_DISABLE,
        ..Default::default()
    };
    // SAFETY: ADC1_HANDLE is only written here, once at boot.
    let ret = unsafe { adc_oneshot_new_unit(&init_cfg, &raw mut ADC1_HANDLE) };
    if ret != ESP_OK as i32 {
        log::error!("hw_init: adc_oneshot_new_unit rc={}", ret);
        return Err(Error::Init("ADC1 unit"));
    }

    let chan_cfg = adc_oneshot_chan_cfg_t {
        atten: adc_atten_t_ADC_ATTEN_DB_12,
        bitwidth: adc_bitwidth_t_ADC_BITWIDTH_12,
    };

    let ret = unsafe {
        adc_oneshot_config_channel(adc1_handle(), pins::BATTERY_ADC_CHANNEL, &chan_cfg)
    };
    if ret != ESP_OK as i32 {
        log::error!("hw_init: adc_oneshot_config_channel rc={}", ret);
        return Err(Error::Init("ADC1 channel"));
    }

    info!("hw_init: ADC1 configured (CH{}=battery)", pins::BATTERY_ADC_CHANNEL);
    Ok(())
}

/// Raw 12-bit battery ADC read (0 – 4095).  Returns 0 on read failure.
#[cfg(target_os = "espidf")]
pub fn adc1_read(channel: u32) -> u16 {
    let mut raw: i32 = 0;
    // SAFETY: adc1_handle() contract — single-threaded main-loop access only.
    let ret = unsafe { adc_oneshot_read(adc1_handle(), channel, &mut raw) };
    if ret != ESP_OK as i32 {
        return 0;
    }
    raw.max(0) as u16
}

#[cfg(not(target_os = "espidf"))]
pub fn adc1_read(_channel: u32) -> u16 {
    0
}

// ── GPIO Outputs ──────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_outputs() -> Result<()> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::STATUS_LED_GPIO,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        log::error!("hw_init: gpio_config rc={}", ret);
        return Err(Error::Init("status LED GPIO"));
    }
    unsafe { gpio_set_level(pins::STATUS_LED_GPIO, 0) };

    info!("hw_init: GPIO outputs configured");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: gpio_set_level writes to an already-configured output pin;
    // pin was validated during init_gpio_outputs(). Main-loop only.
    unsafe {
        gpio_set_level(pin, if high { 1 } else { 0 });
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── LEDC PWM (servo-style ESC pulses) ────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_ledc() -> Result<()> {
    // Timer 0: all ESC channels (50 Hz, 14-bit → ~1.22 µs/count).
    // SAFETY: Called from single main-task context via init_peripherals().
    let timer0 = ledc_timer_config_t {
        speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
        timer_num: ledc_timer_t_LEDC_TIMER_0,
        duty_resolution: ledc_timer_bit_t_LEDC_TIMER_14_BIT,
        freq_hz: pins::ESC_PWM_FREQ_HZ,
        clk_cfg: soc_periph_ledc_clk_src_legacy_t_LEDC_AUTO_CLK,
        ..Default::default()
    };
    let ret = unsafe { ledc_timer_config(&timer0) };
    if ret != ESP_OK as i32 {
        log::error!("hw_init: ledc_timer_config rc={}", ret);
        return Err(Error::Init("LEDC timer"));
    }

    let esc_channels = [
        (pins::LEDC_CH_MOTOR_LEFT, pins::MOTOR_LEFT_PWM_GPIO),
        (pins::LEDC_CH_MOTOR_RIGHT, pins::MOTOR_RIGHT_PWM_GPIO),
        (pins::LEDC_CH_WEAPON, pins::WEAPON_PWM_GPIO),
    ];
    for &(channel, gpio) in &esc_channels {
        let ret = unsafe {
            ledc_channel_config(&ledc_channel_config_t {
                speed_mode: ledc_mode_t_LEDC_LOW_SPEED_MODE,
                channel,
                timer_sel: ledc_timer_t_LEDC_TIMER_0,
                gpio_num: gpio,
                duty: 0,
                hpoint: 0,
                ..Default::default()
            })
        };
        if ret != ESP_OK as i32 {
            log::error!("hw_init: ledc_channel_config ch{} rc={}", channel, ret);
            return Err(Error::Init("LEDC channel"));
        }
    }

    info!("hw_init: LEDC configured (left=CH0, right=CH1, weapon=CH2)");
    Ok(())
}

/// Convert a pulse width in microseconds to LEDC duty counts.
///
/// duty = us · freq · 2^resolution / 10^6, computed in u64 to avoid
/// overflow.  At 50 Hz / 14-bit, 1500 µs maps to 1228 counts.
pub fn pulse_us_to_duty(us: u32, freq_hz: u32) -> u32 {
    ((us as u64 * freq_hz as u64 * (1u64 << pins::PWM_RESOLUTION_BITS)) / 1_000_000) as u32
}

/// Program a pulse width (µs) on an ESC channel.
#[cfg(target_os = "espidf")]
pub fn ledc_set_pulse_us(channel: u32, us: u32, freq_hz: u32) {
    let duty = pulse_us_to_duty(us, freq_hz);
    // SAFETY: LEDC channels were configured in init_ledc(); duty register
    // writes are race-free since only the main loop calls this function.
    unsafe {
        esp_idf_svc::sys::ledc_set_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, duty);
        esp_idf_svc::sys::ledc_update_duty(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_set_pulse_us(_channel: u32, _us: u32, _freq_hz: u32) {}

/// Release an ESC channel: stop output and park the line low.
/// Returns `false` if the IDF call failed (caller logs and moves on —
/// shutdown must always complete).
#[cfg(target_os = "espidf")]
pub fn ledc_release(channel: u32) -> bool {
    // SAFETY: ledc_stop on a configured channel; main-loop only.
    let ret = unsafe { ledc_stop(ledc_mode_t_LEDC_LOW_SPEED_MODE, channel, 0) };
    ret == ESP_OK as i32
}

#[cfg(not(target_os = "espidf"))]
pub fn ledc_release(_channel: u32) -> bool {
    true
}
