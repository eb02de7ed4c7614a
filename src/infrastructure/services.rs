//! Browser implementations of the logging ports.

use crate::domain::logging::{LogEntry, LogLevel, Logger, TimeProvider};
use std::sync::atomic::{AtomicU8, Ordering};

/// Console logger for the WASM environment.
pub struct ConsoleLogger {
    min_level: AtomicU8,
}

impl ConsoleLogger {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level: AtomicU8::new(min_level as u8) }
    }

    pub fn new_production() -> Self {
        Self::new(LogLevel::Info)
    }

    pub fn new_development() -> Self {
        Self::new(LogLevel::Debug)
    }

    pub fn min_level(&self) -> LogLevel {
        LogLevel::from_repr(self.min_level.load(Ordering::Relaxed))
    }

    pub fn format_log_entry(&self, entry: &LogEntry) -> String {
        let timestamp = format_timestamp(entry.timestamp);
        match &entry.metadata {
            Some(metadata) => format!(
                "[{}] {} {} | {} | {}",
                timestamp, entry.level, entry.component, entry.message, metadata
            ),
            None => format!("[{}] {} {} | {}", timestamp, entry.level, entry.component, entry.message),
        }
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, entry: LogEntry) {
        if entry.level < self.min_level() {
            return;
        }
        let formatted = self.format_log_entry(&entry);
        match entry.level {
            LogLevel::Trace | LogLevel::Debug => gloo::console::debug!(formatted),
            LogLevel::Info => gloo::console::info!(formatted),
            LogLevel::Warn => gloo::console::warn!(formatted),
            LogLevel::Error => gloo::console::error!(formatted),
        }
    }

    fn set_min_level(&self, level: LogLevel) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }
}

/// `HH:MM:SS.mmm` in local time.
#[cfg(target_arch = "wasm32")]
fn format_timestamp(timestamp: u64) -> String {
    let date = js_sys::Date::new(&(timestamp as f64).into());
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        date.get_hours(),
        date.get_minutes(),
        date.get_seconds(),
        date.get_milliseconds()
    )
}

#[cfg(not(target_arch = "wasm32"))]
fn format_timestamp(timestamp: u64) -> String {
    format!("{}.{:03}", crate::time_utils::format_clock_time(timestamp), timestamp % 1000)
}

/// Wall clock for log timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct BrowserTimeProvider;

impl BrowserTimeProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for BrowserTimeProvider {
    fn current_timestamp(&self) -> u64 {
        use crate::time_utils::{Clock, SystemClock};
        SystemClock.now_millis()
    }
}
