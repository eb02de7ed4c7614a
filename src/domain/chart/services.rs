//! Ports the chart lifecycle drives: the host container and the charting library.

use crate::domain::errors::ChartResult;
use crate::domain::market_data::indicator_engine::{DerivedPoint, DerivedSeries, VolumeBar};
use crate::domain::market_data::Candle;

/// Removes a registered listener when dropped or when `remove` is called.
pub struct ListenerHandle {
    release: Option<Box<dyn FnOnce()>>,
}

impl ListenerHandle {
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    /// Handle with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    pub fn remove(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("armed", &self.release.is_some()).finish()
    }
}

/// DOM node (or stand-in) hosting the chart.
pub trait ChartContainer {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Observe size changes; the callback receives the new width.
    fn observe_resize(&self, on_resize: Box<dyn Fn(u32)>) -> ChartResult<ListenerHandle>;
}

/// Factory for chart-library instances.
pub trait ChartBackend {
    fn create(&self, width: u32, height: u32) -> ChartResult<Box<dyn ChartInstance>>;
}

/// One live chart-library instance with candle, volume and line series.
pub trait ChartInstance {
    fn set_candles(&mut self, candles: &[Candle]) -> ChartResult<()>;
    fn set_volumes(&mut self, volumes: &[VolumeBar]) -> ChartResult<()>;
    fn set_line(&mut self, series: &DerivedSeries) -> ChartResult<()>;
    fn update_candle(&mut self, candle: &Candle) -> ChartResult<()>;
    fn update_volume(&mut self, volume: &VolumeBar) -> ChartResult<()>;
    fn update_line(&mut self, window: usize, point: &DerivedPoint) -> ChartResult<()>;
    fn apply_width(&mut self, width: u32);
    /// Release the library instance. Called exactly once.
    fn remove(&mut self);
}
