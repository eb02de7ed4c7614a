use crate::domain::market_data::indicator_engine::{DerivedPoint, DerivedSeries, VolumeBar};
use crate::domain::market_data::Candle;

/// Full replacement data for every rendered series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSnapshot {
    pub candles: Vec<Candle>,
    pub volumes: Vec<VolumeBar>,
    pub derived: Vec<DerivedSeries>,
}

impl SeriesSnapshot {
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn derived_for(&self, window: usize) -> Option<&DerivedSeries> {
        self.derived.iter().find(|s| s.window == window)
    }
}

/// Incremental change touching only the newest candle and the tail of each
/// derived series.
#[derive(Debug, Clone, PartialEq)]
pub struct TailUpdate {
    pub candle: Candle,
    pub volume: VolumeBar,
    /// `(window, point)` for every series that has a defined point at the tail.
    pub derived: Vec<(usize, DerivedPoint)>,
}

/// What a view pushes to its chart after each change.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesUpdate {
    Loading,
    Replaced(SeriesSnapshot),
    Tail(TailUpdate),
    /// History could not be loaded; the chart shows its "no data" state.
    Failed(String),
}
