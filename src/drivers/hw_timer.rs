//! Periodic tick timers built on ESP-IDF's esp_timer API.
//!
//! Two timers drive the whole system: a fast control tick (failsafe check,
//! ramp advancement, LED) and a slow telemetry tick (battery read, log
//! record).  Each callback pushes one event into the lock-free queue; all
//! real work happens in the main loop.
//!
//! Callbacks run in the esp_timer task (not ISR context), so the AtomicU8
//! queue operations in `push_event()` are safe there.

#[cfg(target_os = "espidf")]
use crate::events::{push_event, Event};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

#[cfg(target_os = "espidf")]
static mut CONTROL_TIMER: esp_timer_handle_t = core::ptr::null_mut();
#[cfg(target_os = "espidf")]
static mut TELEMETRY_TIMER: esp_timer_handle_t = core::ptr::null_mut();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn control_tick_cb(_arg: *mut core::ffi::c_void) {
    push_event(Event::ControlTick);
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn telemetry_tick_cb(_arg: *mut core::ffi::c_void) {
    push_event(Event::TelemetryTick);
}

/// Start the periodic tick timers.
///
/// Intervals come from [`SystemConfig`](crate::config::SystemConfig):
/// 50 Hz control by default, 1 Hz telemetry.
#[cfg(target_os = "espidf")]
pub fn start_timers(control_interval_ms: u32, telemetry_interval_ms: u32) {
    // SAFETY: CONTROL_TIMER / TELEMETRY_TIMER are written exactly once here,
    // from the single main-task context, before any callback can fire.  The
    // callbacks only touch the atomic event queue.
    unsafe {
        let control_args = esp_timer_create_args_t {
            callback: Some(control_tick_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"control\0".as_ptr() as *const _,
            skip_unhandled_events: false,
        };
        let ret = esp_timer_create(&control_args, &raw mut CONTROL_TIMER);
        if ret != ESP_OK {
            log::error!(
                "hw_timer: control timer create failed (rc={}) — motors will failsafe",
                ret
            );
            return;
        }
        let ret = esp_timer_start_periodic(CONTROL_TIMER, u64::from(control_interval_ms) * 1000);
        if ret != ESP_OK {
            log::error!("hw_timer: control timer start failed (rc={})", ret);
            return;
        }

        let telemetry_args = esp_timer_create_args_t {
            callback: Some(telemetry_tick_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"telemetry\0".as_ptr() as *const _,
            skip_unhandled_events: false,
        };
        let ret = esp_timer_create(&telemetry_args, &raw mut TELEMETRY_TIMER);
        if ret != ESP_OK {
            log::error!(
                "hw_timer: telemetry timer create failed (rc={}) — continuing without telemetry ticks",
                ret
            );
            return;
        }
        let ret =
            esp_timer_start_periodic(TELEMETRY_TIMER, u64::from(telemetry_interval_ms) * 1000);
        if ret != ESP_OK {
            log::error!("hw_timer: telemetry timer start failed (rc={})", ret);
            return;
        }

        info!(
            "hw_timer: control@{}ms + telemetry@{}ms started",
            control_interval_ms, telemetry_interval_ms
        );
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn start_timers(_control_interval_ms: u32, _telemetry_interval_ms: u32) {
    log::info!("hw_timer(sim): timers not started (events driven by sleep loop)");
}

/// Stop both tick timers.
#[cfg(target_os = "espidf")]
pub fn stop_timers() {
    // SAFETY: handles are valid if start_timers() succeeded; null-check
    // prevents stopping a timer that was never created.  Main task only.
    unsafe {
        let ct = CONTROL_TIMER;
        if !ct.is_null() {
            esp_timer_stop(ct);
        }
        let tt = TELEMETRY_TIMER;
        if !tt.is_null() {
            esp_timer_stop(tt);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn stop_timers() {}
