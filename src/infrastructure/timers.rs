use crate::time_utils::{Scheduler, TimerHandle};
use gloo_timers::callback::{Interval, Timeout};

/// Event-loop timers backed by `setTimeout` / `setInterval`. Dropping the
/// returned handle clears the timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlooScheduler;

impl GlooScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for GlooScheduler {
    fn timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle {
        TimerHandle::new(Timeout::new(delay_ms, callback))
    }

    fn interval(&self, period_ms: u32, mut callback: Box<dyn FnMut()>) -> TimerHandle {
        TimerHandle::new(Interval::new(period_ms, move || callback()))
    }
}
