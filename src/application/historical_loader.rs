use crate::config::HistoryConfig;
use crate::domain::errors::AppError;
use crate::domain::events::{EventDispatcher, MarketDataEvent, SharedDispatcher};
use crate::domain::logging::LogComponent;
use crate::domain::market_data::{
    BarQuery, BarSource, Candle, DataValidationService, NormalizedBars, Symbol, TimeInterval,
    Timeframe, Timestamp,
};
use crate::{log_info, log_warn};
use std::rc::Rc;

const COMPONENT: LogComponent = LogComponent::Application("HistoricalLoader");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Network,
    /// Caller-supplied candles; no request was made.
    Prefetched,
}

/// Result of a history load. Failures are carried in `error`, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub candles: Vec<Candle>,
    pub error: Option<AppError>,
    pub source: LoadSource,
    /// Bars rejected during normalization.
    pub dropped: usize,
}

impl LoadOutcome {
    fn failed(error: AppError) -> Self {
        Self { candles: Vec::new(), error: Some(error), source: LoadSource::Network, dropped: 0 }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Fetches and normalizes OHLCV history.
pub struct HistoricalSeriesLoader {
    source: Rc<dyn BarSource>,
    config: HistoryConfig,
    validator: DataValidationService,
    dispatcher: Option<SharedDispatcher>,
}

impl HistoricalSeriesLoader {
    pub fn new(source: Rc<dyn BarSource>, config: HistoryConfig) -> Self {
        Self { source, config, validator: DataValidationService::new(), dispatcher: None }
    }

    pub fn with_dispatcher(mut self, dispatcher: SharedDispatcher) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub async fn load_bars(&self, symbol: &Symbol, interval: TimeInterval, limit: u32) -> LoadOutcome {
        self.load_bars_with(symbol, interval, limit, None).await
    }

    /// Like [`load_bars`](Self::load_bars), but prefetched candles skip the network.
    pub async fn load_bars_with(
        &self,
        symbol: &Symbol,
        interval: TimeInterval,
        limit: u32,
        prefetched: Option<Vec<Candle>>,
    ) -> LoadOutcome {
        let limit = self.config.clamp_limit(limit);
        if let Some(candles) = prefetched {
            let normalized = self.validator.normalize_candles(candles);
            log_info!(
                COMPONENT,
                "📦 Using {} prefetched candles for {} {}",
                normalized.candles.len(),
                symbol,
                interval
            );
            return self.finish(symbol, interval, normalized, limit, LoadSource::Prefetched);
        }
        self.fetch(BarQuery::new(symbol.clone(), interval, limit)).await
    }

    /// History strictly before `end_time`, used to backfill a gap.
    pub async fn load_bars_before(
        &self,
        symbol: &Symbol,
        interval: TimeInterval,
        limit: u32,
        end_time: Timestamp,
    ) -> LoadOutcome {
        let limit = self.config.clamp_limit(limit);
        let mut outcome =
            self.fetch(BarQuery::new(symbol.clone(), interval, limit).before(end_time)).await;
        outcome.candles.retain(|candle| candle.timestamp < end_time);
        outcome
    }

    /// Enough bars of `interval` to cover `timeframe`.
    pub async fn load_timeframe(
        &self,
        symbol: &Symbol,
        interval: TimeInterval,
        timeframe: Timeframe,
    ) -> LoadOutcome {
        let limit = timeframe.bar_limit(interval, self.config.max_limit);
        self.load_bars(symbol, interval, limit).await
    }

    async fn fetch(&self, query: BarQuery) -> LoadOutcome {
        log_info!(
            COMPONENT,
            "📈 Fetching {} {} bars for {}",
            query.limit,
            query.interval,
            query.symbol
        );
        match self.source.fetch_bars(&query).await {
            Ok(raw) => {
                let normalized = self.validator.normalize(&raw);
                self.finish(&query.symbol, query.interval, normalized, query.limit, LoadSource::Network)
            }
            Err(err) => {
                log_warn!(COMPONENT, "❌ History for {} unavailable: {}", query.symbol, err);
                self.publish(MarketDataEvent::HistoricalDataFailed {
                    symbol: query.symbol.clone(),
                    interval: query.interval,
                    reason: err.to_string(),
                });
                LoadOutcome::failed(err)
            }
        }
    }

    fn finish(
        &self,
        symbol: &Symbol,
        interval: TimeInterval,
        normalized: NormalizedBars,
        limit: u32,
        source: LoadSource,
    ) -> LoadOutcome {
        let NormalizedBars { mut candles, dropped, duplicates } = normalized;
        if dropped > 0 {
            log_warn!(COMPONENT, "⚠️ Dropped {} invalid bars for {}", dropped, symbol);
            self.publish(MarketDataEvent::DataValidationFailed {
                symbol: symbol.clone(),
                reason: format!("{dropped} invalid bars dropped"),
            });
        }
        if duplicates > 0 {
            log_warn!(COMPONENT, "⚠️ Collapsed {} duplicate bars for {}", duplicates, symbol);
        }
        let excess = candles.len().saturating_sub(limit as usize);
        candles.drain(..excess);
        self.publish(MarketDataEvent::HistoricalDataLoaded {
            symbol: symbol.clone(),
            interval,
            candle_count: candles.len(),
        });
        LoadOutcome { candles, error: None, source, dropped }
    }

    fn publish(&self, event: MarketDataEvent) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.borrow().publish_market_data_event(event);
        }
    }
}
