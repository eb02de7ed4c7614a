use derive_more::{Constructor, Deref, DerefMut, Display, From, Into};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};

use crate::domain::errors::AppError;

/// Epoch values above this are treated as milliseconds.
const MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Value Object - price
#[derive(
    Debug, Clone, Copy, PartialEq, From, Into, Deref, DerefMut, Constructor, Serialize, Deserialize,
)]
pub struct Price(f64);

impl Price {
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialOrd for Price {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.0.partial_cmp(&other.0)
    }
}

/// Value Object - traded volume
#[derive(
    Debug, Clone, Copy, PartialEq, From, Into, Deref, DerefMut, Constructor, Serialize, Deserialize,
)]
pub struct Volume(f64);

impl Volume {
    pub fn value(&self) -> f64 {
        self.0
    }
}

/// Value Object - open time in epoch seconds
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    From,
    Into,
    Deref,
    Constructor,
    Serialize,
    Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub fn from_millis(millis: u64) -> Self {
        Self(millis / 1000)
    }

    /// Accepts either seconds or milliseconds and folds to seconds.
    pub fn from_epoch(value: u64) -> Self {
        if value >= MILLIS_THRESHOLD { Self::from_millis(value) } else { Self(value) }
    }

    pub fn as_millis(&self) -> u64 {
        self.0 * 1000
    }
}

/// Value Object - OHLCV bar body
#[derive(Debug, Clone, Copy, PartialEq, Constructor, Serialize, Deserialize)]
pub struct OHLCV {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Volume,
}

impl OHLCV {
    /// Flat bar: every price equals `price`.
    pub fn flat(price: f64, volume: f64) -> Self {
        Self::new(Price(price), Price(price), Price(price), Price(price), Volume(volume))
    }

    pub fn is_finite(&self) -> bool {
        [self.open.0, self.high.0, self.low.0, self.close.0, self.volume.0]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn is_valid(&self) -> bool {
        self.is_finite()
            && self.high >= self.open
            && self.high >= self.close
            && self.high >= self.low
            && self.low <= self.open
            && self.low <= self.close
            && self.volume.value() >= 0.0
    }
}

/// Value Object - trading symbol, always upper case
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deref, DerefMut, Display, Serialize, Deserialize)]
#[display(fmt = "{}", _0)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: String) -> Result<Self, AppError> {
        let trimmed = symbol.trim();
        if trimmed.is_empty() {
            return Err(AppError::ValidationError("Symbol cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_uppercase()))
    }

    pub fn value(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.trim().to_uppercase())
    }
}

/// Value Object - gateway connection identifier (the `auth.connectionId`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display(fmt = "{}", _0)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Value Object - candle interval
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    StrumDisplay,
    EnumIter,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum TimeInterval {
    #[strum(serialize = "1m")]
    #[serde(rename = "1m")]
    OneMinute,

    #[strum(serialize = "5m")]
    #[serde(rename = "5m")]
    FiveMinutes,

    #[strum(serialize = "15m")]
    #[serde(rename = "15m")]
    FifteenMinutes,

    #[strum(serialize = "30m")]
    #[serde(rename = "30m")]
    ThirtyMinutes,

    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    OneHour,

    #[strum(serialize = "4h")]
    #[serde(rename = "4h")]
    FourHours,

    #[strum(serialize = "1d")]
    #[serde(rename = "1d")]
    OneDay,

    #[strum(serialize = "1w")]
    #[serde(rename = "1w")]
    OneWeek,

    #[strum(serialize = "1M")]
    #[serde(rename = "1M")]
    OneMonth,
}

impl TimeInterval {
    pub fn as_query_str(&self) -> &str {
        self.as_ref()
    }

    pub fn duration_secs(&self) -> u64 {
        match self {
            Self::OneMinute => 60,
            Self::FiveMinutes => 5 * 60,
            Self::FifteenMinutes => 15 * 60,
            Self::ThirtyMinutes => 30 * 60,
            Self::OneHour => 60 * 60,
            Self::FourHours => 4 * 60 * 60,
            Self::OneDay => 24 * 60 * 60,
            Self::OneWeek => 7 * 24 * 60 * 60,
            Self::OneMonth => 30 * 24 * 60 * 60, // approximate
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_secs() * 1000
    }
}

/// Value Object - visible history span selected in the UI
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    StrumDisplay,
    EnumIter,
    EnumString,
    AsRefStr,
    Serialize,
    Deserialize,
)]
pub enum Timeframe {
    #[strum(serialize = "1D")]
    #[serde(rename = "1D")]
    OneDay,
    #[strum(serialize = "1W")]
    #[serde(rename = "1W")]
    OneWeek,
    #[strum(serialize = "1M")]
    #[serde(rename = "1M")]
    OneMonth,
    #[strum(serialize = "3M")]
    #[serde(rename = "3M")]
    ThreeMonths,
    #[strum(serialize = "1Y")]
    #[serde(rename = "1Y")]
    OneYear,
}

impl Timeframe {
    pub fn span_secs(&self) -> u64 {
        const DAY: u64 = 24 * 60 * 60;
        match self {
            Self::OneDay => DAY,
            Self::OneWeek => 7 * DAY,
            Self::OneMonth => 30 * DAY,
            Self::ThreeMonths => 90 * DAY,
            Self::OneYear => 365 * DAY,
        }
    }

    /// Number of bars of `interval` needed to cover the span, clamped to `[1, max]`.
    pub fn bar_limit(&self, interval: TimeInterval, max: u32) -> u32 {
        let bars = self.span_secs().div_ceil(interval.duration_secs());
        bars.clamp(1, max.max(1) as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_millis_fold_to_seconds() {
        assert_eq!(Timestamp::from_epoch(1_700_000_000).value(), 1_700_000_000);
        assert_eq!(Timestamp::from_epoch(1_700_000_000_123).value(), 1_700_000_000);
    }

    #[test]
    fn symbol_is_trimmed_and_uppercased() {
        assert_eq!(Symbol::from(" btcusdt ").value(), "BTCUSDT");
        assert!(Symbol::new("   ".to_string()).is_err());
    }

    #[test]
    fn interval_parses_from_query_string() {
        assert_eq!("15m".parse::<TimeInterval>().ok(), Some(TimeInterval::FifteenMinutes));
        assert_eq!(TimeInterval::OneMonth.as_query_str(), "1M");
    }

    #[test]
    fn timeframe_bar_limit_is_clamped() {
        assert_eq!(Timeframe::OneDay.bar_limit(TimeInterval::OneHour, 1000), 24);
        assert_eq!(Timeframe::OneYear.bar_limit(TimeInterval::OneMinute, 1000), 1000);
        assert_eq!(Timeframe::OneDay.bar_limit(TimeInterval::OneWeek, 1000), 1);
    }
}
