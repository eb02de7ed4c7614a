use super::entities::{Candle, SeriesChange};
use super::value_objects::Timestamp;
use crate::domain::chart::value_objects::{Color, VolumePalette};
use serde::{Deserialize, Serialize};

/// One defined value of a derived series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedPoint {
    pub time: Timestamp,
    pub value: f64,
}

/// Simple moving average over closes.
///
/// `points[k]` belongs to candle index `k + window - 1`; earlier candles have no
/// entry at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSeries {
    pub window: usize,
    pub points: Vec<DerivedPoint>,
}

impl DerivedSeries {
    pub fn empty(window: usize) -> Self {
        Self { window, points: Vec::new() }
    }

    pub fn label(&self) -> String {
        format!("MA{}", self.window)
    }

    pub fn last(&self) -> Option<&DerivedPoint> {
        self.points.last()
    }

    /// Candle index of the first defined point.
    pub fn first_index(&self) -> usize {
        self.window.saturating_sub(1)
    }
}

/// Volume histogram bar with its colour resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeBar {
    pub time: Timestamp,
    pub value: f64,
    pub color: Color,
}

fn mean_close(candles: &[Candle]) -> f64 {
    candles.iter().map(|c| c.ohlcv.close.value()).sum::<f64>() / candles.len() as f64
}

/// Full moving-average computation.
pub fn compute_moving_average(candles: &[Candle], window: usize) -> DerivedSeries {
    let mut series = DerivedSeries::empty(window);
    if window == 0 || candles.len() < window {
        return series;
    }
    series.points.reserve(candles.len() + 1 - window);

    let mut sum: f64 = candles[..window].iter().map(|c| c.ohlcv.close.value()).sum();
    series.points.push(DerivedPoint {
        time: candles[window - 1].timestamp,
        value: sum / window as f64,
    });
    for i in window..candles.len() {
        sum += candles[i].ohlcv.close.value() - candles[i - window].ohlcv.close.value();
        series.points.push(DerivedPoint { time: candles[i].timestamp, value: sum / window as f64 });
    }
    series
}

/// Recompute only the tail of `series` after candles from `changed_from` onward changed.
///
/// Points for candle indices below `changed_from` are kept as they are;
/// everything after is rebuilt from `candles`.
pub fn recompute_tail(
    candles: &[Candle],
    mut series: DerivedSeries,
    changed_from: usize,
) -> DerivedSeries {
    let window = series.window;
    if window == 0 {
        series.points.clear();
        return series;
    }
    let first = window - 1;
    let keep_points = changed_from.saturating_sub(first).min(series.points.len());
    series.points.truncate(keep_points);

    for i in (first + keep_points)..candles.len() {
        series.points.push(DerivedPoint {
            time: candles[i].timestamp,
            value: mean_close(&candles[i + 1 - window..=i]),
        });
    }
    series
}

/// Colour of a single candle's volume bar; no cross-candle state.
pub fn volume_color(candle: &Candle, palette: &VolumePalette) -> Color {
    if candle.is_bullish() { palette.up } else { palette.down }
}

pub fn volume_bar(candle: &Candle, palette: &VolumePalette) -> VolumeBar {
    VolumeBar {
        time: candle.timestamp,
        value: candle.ohlcv.volume.value(),
        color: volume_color(candle, palette),
    }
}

pub fn volume_bars(candles: &[Candle], palette: &VolumePalette) -> Vec<VolumeBar> {
    candles.iter().map(|c| volume_bar(c, palette)).collect()
}

/// Engine maintaining a set of moving averages over one candle series.
#[derive(Debug, Clone)]
pub struct DerivedSeriesEngine {
    series: Vec<DerivedSeries>,
    palette: VolumePalette,
}

impl DerivedSeriesEngine {
    pub fn new(windows: &[usize], palette: VolumePalette) -> Self {
        Self {
            series: windows.iter().filter(|w| **w > 0).map(|w| DerivedSeries::empty(*w)).collect(),
            palette,
        }
    }

    pub fn compute_historical(&mut self, candles: &[Candle]) {
        for series in &mut self.series {
            *series = compute_moving_average(candles, series.window);
        }
    }

    /// Bring every series in line with `candles` after `change`.
    pub fn apply_change(&mut self, candles: &[Candle], change: SeriesChange) {
        match change {
            SeriesChange::Unchanged => {}
            SeriesChange::Replaced => self.compute_historical(candles),
            SeriesChange::Updated(index) => self.recompute_from(candles, index, 0),
            SeriesChange::Appended { index, trimmed } => {
                self.recompute_from(candles, index, trimmed)
            }
        }
    }

    fn recompute_from(&mut self, candles: &[Candle], changed_from: usize, trimmed: usize) {
        for series in &mut self.series {
            let drop = trimmed.min(series.points.len());
            series.points.drain(..drop);
            let current = std::mem::replace(series, DerivedSeries::empty(series.window));
            *series = recompute_tail(candles, current, changed_from);
        }
    }

    pub fn series(&self) -> &[DerivedSeries] {
        &self.series
    }

    pub fn palette(&self) -> &VolumePalette {
        &self.palette
    }

    pub fn volume_bars(&self, candles: &[Candle]) -> Vec<VolumeBar> {
        volume_bars(candles, &self.palette)
    }

    pub fn volume_bar(&self, candle: &Candle) -> VolumeBar {
        volume_bar(candle, &self.palette)
    }

    /// Latest point of each series, paired with its window.
    pub fn latest_points(&self) -> Vec<(usize, Option<DerivedPoint>)> {
        self.series.iter().map(|s| (s.window, s.last().copied())).collect()
    }
}
