use super::entities::Candle;
use super::repositories::{NumberLike, RawBar};
use super::value_objects::{OHLCV, Price, Volume};
use crate::time_utils::normalize_epoch_seconds;

/// Why a raw bar was rejected during normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarRejection {
    BadTimestamp,
    NonNumeric,
    InconsistentOhlc,
    NegativeVolume,
}

/// Domain service validating candles coming from the REST boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataValidationService;

impl DataValidationService {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_candle(&self, candle: &Candle) -> Result<(), BarRejection> {
        let ohlcv = &candle.ohlcv;
        if !ohlcv.is_finite() {
            return Err(BarRejection::NonNumeric);
        }
        if ohlcv.volume.value() < 0.0 {
            return Err(BarRejection::NegativeVolume);
        }
        if !ohlcv.is_valid() {
            return Err(BarRejection::InconsistentOhlc);
        }
        Ok(())
    }

    /// Coerce one raw bar into a candle.
    pub fn coerce(&self, raw: &RawBar) -> Result<Candle, BarRejection> {
        let timestamp = raw
            .timestamp
            .as_f64()
            .and_then(normalize_epoch_seconds)
            .ok_or(BarRejection::BadTimestamp)?;
        let field = |n: &NumberLike| n.as_f64().ok_or(BarRejection::NonNumeric);
        let candle = Candle::new(
            timestamp,
            OHLCV::new(
                Price::from(field(&raw.open)?),
                Price::from(field(&raw.high)?),
                Price::from(field(&raw.low)?),
                Price::from(field(&raw.close)?),
                Volume::from(field(&raw.volume)?),
            ),
        );
        self.validate_candle(&candle)?;
        Ok(candle)
    }

    /// Coerce, validate, sort ascending and deduplicate (a later duplicate wins).
    pub fn normalize(&self, raw: &[RawBar]) -> NormalizedBars {
        let mut dropped = 0;
        let mut candles: Vec<Candle> = raw
            .iter()
            .filter_map(|bar| match self.coerce(bar) {
                Ok(candle) => Some(candle),
                Err(_) => {
                    dropped += 1;
                    None
                }
            })
            .collect();
        // stable sort keeps arrival order among equal timestamps
        candles.sort_by_key(|c| c.timestamp);
        let before = candles.len();
        candles = dedup_last_wins(candles);
        NormalizedBars { candles, dropped, duplicates: 0 }.with_duplicates(before)
    }

    /// Normalize already-typed candles (the embedded fast path).
    pub fn normalize_candles(&self, candles: Vec<Candle>) -> NormalizedBars {
        let total = candles.len();
        let mut valid: Vec<Candle> =
            candles.into_iter().filter(|c| self.validate_candle(c).is_ok()).collect();
        let dropped = total - valid.len();
        valid.sort_by_key(|c| c.timestamp);
        let before = valid.len();
        NormalizedBars { candles: dedup_last_wins(valid), dropped, duplicates: 0 }
            .with_duplicates(before)
    }
}

fn dedup_last_wins(sorted: Vec<Candle>) -> Vec<Candle> {
    let mut unique: Vec<Candle> = Vec::with_capacity(sorted.len());
    for candle in sorted {
        match unique.last_mut() {
            Some(prev) if prev.timestamp == candle.timestamp => *prev = candle,
            _ => unique.push(candle),
        }
    }
    unique
}

/// Result of normalizing a batch of bars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBars {
    pub candles: Vec<Candle>,
    /// Bars rejected by coercion or validation.
    pub dropped: usize,
    /// Bars collapsed because they shared an open time.
    pub duplicates: usize,
}

impl NormalizedBars {
    fn with_duplicates(mut self, before_dedup: usize) -> Self {
        self.duplicates = before_dedup - self.candles.len();
        self
    }
}
