//! Software timing utilities.
//!
//! Both types are time-injected: callers pass a monotonic millisecond
//! counter instead of the types reading a clock, so behaviour is
//! deterministic on the host and tick-exact on target.

/// Edge-triggered interval timer.
///
/// `expired()` returns true at most once per interval and resets its
/// internal reference on a true result, so a slow caller sees one fire per
/// elapsed interval, not a burst.
pub struct IntervalTimer {
    interval_ms: u32,
    last_ms: u64,
}

impl IntervalTimer {
    pub fn new(interval_ms: u32, now_ms: u64) -> Self {
        Self {
            interval_ms,
            last_ms: now_ms,
        }
    }

    /// True once the interval has elapsed; resets the reference point.
    pub fn expired(&mut self, now_ms: u64) -> bool {
        if now_ms.saturating_sub(self.last_ms) >= u64::from(self.interval_ms) {
            self.last_ms = now_ms;
            return true;
        }
        false
    }

    /// Restart the interval from `now_ms`.
    pub fn reset(&mut self, now_ms: u64) {
        self.last_ms = now_ms;
    }

    /// Milliseconds until the next expiry (0 when already due).
    pub fn remaining_ms(&self, now_ms: u64) -> u32 {
        let elapsed = now_ms.saturating_sub(self.last_ms);
        u64::from(self.interval_ms).saturating_sub(elapsed) as u32
    }
}

/// Software watchdog for detecting a stalled producer.
///
/// Sticky: once triggered it stays triggered (and `check()` keeps
/// returning true) until `feed()` clears it.  The optional callback fires
/// at most once per timeout window.
pub struct SoftWatchdog<F = fn()>
where
    F: FnMut(),
{
    timeout_ms: u32,
    last_feed_ms: u64,
    triggered: bool,
    callback: Option<F>,
}

impl<F> SoftWatchdog<F>
where
    F: FnMut(),
{
    pub fn new(timeout_ms: u32, now_ms: u64) -> Self {
        Self {
            timeout_ms,
            last_feed_ms: now_ms,
            triggered: false,
            callback: None,
        }
    }

    pub fn with_callback(timeout_ms: u32, now_ms: u64, callback: F) -> Self {
        Self {
            timeout_ms,
            last_feed_ms: now_ms,
            triggered: false,
            callback: Some(callback),
        }
    }

    /// Reset the trigger window and clear the sticky state.
    pub fn feed(&mut self, now_ms: u64) {
        self.last_feed_ms = now_ms;
        self.triggered = false;
    }

    /// True if the watchdog has timed out since the last feed.  Fires the
    /// callback on the transition into the triggered state only.
    pub fn check(&mut self, now_ms: u64) -> bool {
        if self.triggered {
            return true;
        }

        if now_ms.saturating_sub(self.last_feed_ms) >= u64::from(self.timeout_ms) {
            self.triggered = true;
            if let Some(cb) = self.callback.as_mut() {
                cb();
            }
            return true;
        }

        false
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }
}
