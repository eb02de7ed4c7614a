use crate::domain::market_data::{TimeInterval, Timestamp};
use std::any::Any;

/// Millisecond wall clock. Injected so staleness checks can be driven in tests.
pub trait Clock {
    fn now_millis(&self) -> u64;

    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_millis())
    }
}

/// `Date.now()` in the browser, `SystemTime` everywhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[cfg(target_arch = "wasm32")]
    fn now_millis(&self) -> u64 {
        js_sys::Date::now() as u64
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn now_millis(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
    }
}

/// Pending timer. Dropping it cancels the timer.
pub struct TimerHandle {
    _guard: Box<dyn Any>,
}

impl TimerHandle {
    pub fn new(guard: impl Any) -> Self {
        Self { _guard: Box::new(guard) }
    }

    pub fn cancel(self) {}
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TimerHandle")
    }
}

/// Event-loop timers (gloo in the browser, a manual queue in tests).
pub trait Scheduler {
    fn timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle;
    fn interval(&self, period_ms: u32, callback: Box<dyn FnMut()>) -> TimerHandle;
}

/// Open time of the period containing `at`.
///
/// Months are treated as fixed 30-day periods, the same approximation
/// [`TimeInterval::duration_secs`] uses.
pub fn align_to_interval(at: Timestamp, interval: TimeInterval) -> Timestamp {
    let period = interval.duration_secs();
    if interval == TimeInterval::OneWeek {
        // epoch started on a Thursday; weekly bars open on Monday
        const MONDAY_OFFSET: u64 = 3 * 24 * 60 * 60;
        let shifted = at.value() + MONDAY_OFFSET;
        return Timestamp::from_secs((shifted - shifted % period).saturating_sub(MONDAY_OFFSET));
    }
    Timestamp::from_secs(at.value() - at.value() % period)
}

/// Epoch value in seconds, accepting seconds or milliseconds.
pub fn normalize_epoch_seconds(value: f64) -> Option<Timestamp> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(Timestamp::from_epoch(value.trunc() as u64))
}

/// Short `HH:MM:SS` label (UTC) for log lines and status tooltips.
pub fn format_clock_time(millis: u64) -> String {
    let secs = millis / 1000;
    format!("{:02}:{:02}:{:02}", (secs / 3600) % 24, (secs / 60) % 60, secs % 60)
}
