use super::value_objects::{OHLCV, Price, TimeInterval, Timestamp};
use crate::time_utils::align_to_interval;
use serde::{Deserialize, Serialize};

/// Domain entity - Candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: Timestamp,
    pub ohlcv: OHLCV,
}

impl Candle {
    pub fn new(timestamp: Timestamp, ohlcv: OHLCV) -> Self {
        Self { timestamp, ohlcv }
    }

    /// Close at or above open. Volume colouring uses the same rule.
    pub fn is_bullish(&self) -> bool {
        self.ohlcv.close >= self.ohlcv.open
    }

    /// Fold a trade price into this (still open) candle.
    pub fn absorb_price(&mut self, price: f64) {
        self.ohlcv.close = Price::from(price);
        if price > self.ohlcv.high.value() {
            self.ohlcv.high = Price::from(price);
        }
        if price < self.ohlcv.low.value() {
            self.ohlcv.low = Price::from(price);
        }
    }

    /// Fold a live-built candle for the same period into this server bar:
    /// open and volume stay, close follows the live candle, the range widens.
    pub fn fold_live(&mut self, live: &Candle) {
        self.ohlcv.close = live.ohlcv.close;
        if live.ohlcv.high > self.ohlcv.high {
            self.ohlcv.high = live.ohlcv.high;
        }
        if live.ohlcv.low < self.ohlcv.low {
            self.ohlcv.low = live.ohlcv.low;
        }
    }
}

/// What a mutation did to a [`CandleSeries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesChange {
    Unchanged,
    /// Candle at `index` was mutated in place.
    Updated(usize),
    /// A candle was appended at `index`; `trimmed` candles fell off the front first.
    Appended { index: usize, trimmed: usize },
    /// Anything else: the whole series must be treated as new.
    Replaced,
}

impl SeriesChange {
    /// Lowest candle index whose value may differ from before.
    pub fn changed_from(&self) -> Option<usize> {
        match self {
            SeriesChange::Unchanged => None,
            SeriesChange::Updated(index) => Some(*index),
            SeriesChange::Appended { index, .. } => Some(*index),
            SeriesChange::Replaced => Some(0),
        }
    }
}

/// Domain entity - candle series, strictly ascending by open time
#[derive(Debug, Clone)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    max_size: usize,
}

impl CandleSeries {
    pub fn new(max_size: usize) -> Self {
        Self { candles: Vec::new(), max_size: max_size.max(1) }
    }

    /// Build from candles that are already sorted and unique.
    pub fn from_sorted(candles: Vec<Candle>, max_size: usize) -> Self {
        let mut series = Self { candles, max_size: max_size.max(1) };
        series.trim_front();
        series
    }

    pub fn add_candle(&mut self, candle: Candle) -> SeriesChange {
        // Check whether to update the existing candle or add a new one
        if let Some(last_candle) = self.candles.last_mut() {
            if last_candle.timestamp == candle.timestamp {
                *last_candle = candle;
                return SeriesChange::Updated(self.candles.len() - 1);
            }

            if candle.timestamp < last_candle.timestamp {
                return self.insert_candle_sorted(candle);
            }
        }

        self.candles.push(candle);
        let trimmed = self.trim_front();
        SeriesChange::Appended { index: self.candles.len() - 1, trimmed }
    }

    /// Insert an older candle while keeping time order
    fn insert_candle_sorted(&mut self, candle: Candle) -> SeriesChange {
        match self.candles.binary_search_by(|c| c.timestamp.cmp(&candle.timestamp)) {
            Ok(pos) => {
                self.candles[pos] = candle;
                SeriesChange::Updated(pos)
            }
            Err(pos) => {
                self.candles.insert(pos, candle);
                self.trim_front();
                SeriesChange::Replaced
            }
        }
    }

    /// Apply a live price tick.
    ///
    /// A tick inside the newest candle's period mutates it; a tick in a later
    /// period opens a new flat candle; a tick older than the newest candle is
    /// stale and ignored.
    pub fn apply_price_tick(
        &mut self,
        price: f64,
        at: Timestamp,
        interval: TimeInterval,
    ) -> SeriesChange {
        if !price.is_finite() || price <= 0.0 {
            return SeriesChange::Unchanged;
        }
        let bucket = align_to_interval(at, interval);
        match self.candles.last_mut() {
            Some(last) if last.timestamp == bucket => {
                last.absorb_price(price);
                SeriesChange::Updated(self.candles.len() - 1)
            }
            Some(last) if last.timestamp > bucket => SeriesChange::Unchanged,
            _ => {
                self.candles.push(Candle::new(bucket, OHLCV::flat(price, 0.0)));
                let trimmed = self.trim_front();
                SeriesChange::Appended { index: self.candles.len() - 1, trimmed }
            }
        }
    }

    /// Merge a block of history (sorted) into the series. History wins for a
    /// shared open time. When `keep_live_tail` is set the newest candle is
    /// still being built by live ticks, and it is folded into the history bar
    /// for its period instead of being dropped.
    pub fn merge_history(&mut self, history: Vec<Candle>, keep_live_tail: bool) -> SeriesChange {
        if history.is_empty() {
            return SeriesChange::Unchanged;
        }
        let live_tail = self.candles.last().cloned().filter(|_| keep_live_tail);
        let mut merged = std::mem::take(&mut self.candles);
        merged.extend(history);
        merged.sort_by_key(|c| c.timestamp);
        // keep the later entry for duplicate open times, except for the live tail
        let mut unique: Vec<Candle> = Vec::with_capacity(merged.len());
        for candle in merged {
            match unique.last_mut() {
                Some(prev) if prev.timestamp == candle.timestamp => {
                    *prev = candle;
                    if let Some(live) = live_tail.as_ref().filter(|t| t.timestamp == prev.timestamp) {
                        prev.fold_live(live);
                    }
                }
                _ => unique.push(candle),
            }
        }
        self.candles = unique;
        self.trim_front();
        SeriesChange::Replaced
    }

    fn trim_front(&mut self) -> usize {
        let excess = self.candles.len().saturating_sub(self.max_size);
        if excess > 0 {
            self.candles.drain(..excess);
        }
        excess
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn latest(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn count(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}
