//! Per-view candlestick pipeline: seed history, live price ticks folded into
//! the open candle, derived series kept in step, and the
//! `idle → subscribed → suspended → torn-down` view state machine.

use super::historical_loader::{HistoricalSeriesLoader, LoadOutcome};
use super::market_feed::{MarketFeed, StreamWatch};
use crate::config::ChartConfig;
use crate::domain::chart::{SeriesSnapshot, SeriesUpdate, TailUpdate, VolumePalette};
use crate::domain::errors::AppError;
use crate::domain::logging::LogComponent;
use crate::domain::market_data::{
    Candle, CandleSeries, DerivedSeriesEngine, SeriesChange, Symbol, TimeInterval, Timeframe,
    Timestamp,
};
use crate::domain::stream::{StreamKind, SubscriptionParams};
use crate::time_utils::Clock;
use crate::{log_debug, log_info, log_warn};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

const COMPONENT: LogComponent = LogComponent::Application("CandlestickSession");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewPhase {
    #[default]
    Idle,
    Subscribed,
    /// Tab hidden; the live stream is released, data is kept.
    Suspended,
    TornDown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub interval: TimeInterval,
    pub timeframe: Timeframe,
    pub max_candles: usize,
    pub windows: Vec<usize>,
    pub palette: VolumePalette,
}

impl SessionSettings {
    pub fn new(interval: TimeInterval, timeframe: Timeframe, chart: &ChartConfig) -> Self {
        Self {
            interval,
            timeframe,
            max_candles: chart.max_candles.max(1),
            windows: chart.moving_average_windows.clone(),
            palette: chart.volume_palette(),
        }
    }

    fn history_limit(&self) -> u32 {
        let cap = u32::try_from(self.max_candles).unwrap_or(u32::MAX);
        self.timeframe.bar_limit(self.interval, cap)
    }
}

struct SessionState {
    phase: ViewPhase,
    series: CandleSeries,
    engine: DerivedSeriesEngine,
    watch: Option<StreamWatch>,
    /// A seed, reload or backfill request is in flight.
    loading: bool,
    error: Option<AppError>,
    /// Bumped by every load of its kind; a result carrying an older value is discarded.
    seed_generation: u64,
    older_generation: u64,
    /// The newest candle was touched by a tick since the stream was (re)subscribed.
    live_tail: bool,
}

impl SessionState {
    fn snapshot(&self) -> SeriesSnapshot {
        let candles = self.series.candles().to_vec();
        SeriesSnapshot {
            volumes: self.engine.volume_bars(&candles),
            derived: self.engine.series().to_vec(),
            candles,
        }
    }

    fn update_for(&self, change: SeriesChange) -> Option<SeriesUpdate> {
        let last_index = self.series.count().checked_sub(1)?;
        let is_tail = match change {
            SeriesChange::Unchanged => return None,
            SeriesChange::Updated(index) => index == last_index,
            SeriesChange::Appended { index, trimmed } => index == last_index && trimmed == 0,
            SeriesChange::Replaced => false,
        };
        if !is_tail {
            return Some(SeriesUpdate::Replaced(self.snapshot()));
        }
        let candle = self.series.latest()?.clone();
        let derived = self
            .engine
            .latest_points()
            .into_iter()
            .filter_map(|(window, point)| point.map(|point| (window, point)))
            .filter(|(_, point)| point.time == candle.timestamp)
            .collect();
        Some(SeriesUpdate::Tail(TailUpdate {
            volume: self.engine.volume_bar(&candle),
            candle,
            derived,
        }))
    }
}

/// Seed-style loads (start, reload, backfill) and older-history pages are
/// tracked separately so neither cancels the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadKind {
    Seed,
    Older,
}

struct SessionInner {
    symbol: Symbol,
    settings: SessionSettings,
    feed: MarketFeed,
    loader: Rc<HistoricalSeriesLoader>,
    clock: Rc<dyn Clock>,
    state: RefCell<SessionState>,
    disposed: Cell<bool>,
    on_update: Box<dyn Fn(&SeriesUpdate)>,
}

impl SessionInner {
    fn emit(&self, update: Option<SeriesUpdate>) {
        if let Some(update) = update {
            (self.on_update)(&update);
        }
    }

    fn on_price(&self, price: f64) {
        if self.disposed.get() {
            return;
        }
        let update = {
            let mut state = self.state.borrow_mut();
            if state.phase != ViewPhase::Subscribed {
                return;
            }
            let change =
                state.series.apply_price_tick(price, self.clock.now(), self.settings.interval);
            if change != SeriesChange::Unchanged {
                state.live_tail = true;
            }
            let SessionState { series, engine, .. } = &mut *state;
            engine.apply_change(series.candles(), change);
            state.update_for(change)
        };
        self.emit(update);
    }

    fn begin_load(&self, kind: LoadKind) -> u64 {
        let mut state = self.state.borrow_mut();
        match kind {
            LoadKind::Seed => {
                state.loading = true;
                state.seed_generation += 1;
                state.seed_generation
            }
            LoadKind::Older => {
                state.older_generation += 1;
                state.older_generation
            }
        }
    }

    /// Merge a finished load unless the view moved on meanwhile. A candle
    /// built from live ticks is folded into the history bar for its period.
    fn finish_load(&self, kind: LoadKind, generation: u64, outcome: LoadOutcome) {
        if self.disposed.get() {
            log_debug!(COMPONENT, "discarding history for disposed {}", self.symbol);
            return;
        }
        let update = {
            let mut state = self.state.borrow_mut();
            let current = match kind {
                LoadKind::Seed => state.seed_generation,
                LoadKind::Older => state.older_generation,
            };
            if current != generation {
                return;
            }
            if kind == LoadKind::Seed {
                state.loading = false;
            }
            match outcome.error {
                Some(err) => {
                    state.error = Some(err.clone());
                    if state.series.is_empty() {
                        Some(SeriesUpdate::Failed(err.user_message()))
                    } else {
                        // keep showing what we have
                        None
                    }
                }
                None => {
                    if kind == LoadKind::Seed {
                        state.error = None;
                    }
                    let keep_live_tail = state.live_tail;
                    let change = state.series.merge_history(outcome.candles, keep_live_tail);
                    let SessionState { series, engine, .. } = &mut *state;
                    engine.apply_change(series.candles(), change);
                    Some(SeriesUpdate::Replaced(state.snapshot()))
                }
            }
        };
        self.emit(update);
    }
}

fn subscribe_live(inner: &Rc<SessionInner>) -> StreamWatch {
    let weak: Weak<SessionInner> = Rc::downgrade(inner);
    inner.feed.watch(
        inner.symbol.clone(),
        StreamKind::Price,
        SubscriptionParams::default(),
        move |entry| {
            let Some(inner) = weak.upgrade() else { return };
            if let Some(price) = entry.ticker().and_then(|ticker| ticker.price) {
                inner.on_price(price);
            }
        },
    )
}

/// Candles plus derived series for one `(connection, symbol, interval)` view.
#[derive(Clone)]
pub struct CandlestickSession {
    inner: Rc<SessionInner>,
}

impl CandlestickSession {
    pub fn new(
        feed: MarketFeed,
        loader: Rc<HistoricalSeriesLoader>,
        clock: Rc<dyn Clock>,
        symbol: Symbol,
        settings: SessionSettings,
        on_update: impl Fn(&SeriesUpdate) + 'static,
    ) -> Self {
        let state = SessionState {
            phase: ViewPhase::Idle,
            series: CandleSeries::new(settings.max_candles),
            engine: DerivedSeriesEngine::new(&settings.windows, settings.palette),
            watch: None,
            loading: false,
            error: None,
            seed_generation: 0,
            older_generation: 0,
            live_tail: false,
        };
        Self {
            inner: Rc::new(SessionInner {
                symbol,
                settings,
                feed,
                loader,
                clock,
                state: RefCell::new(state),
                disposed: Cell::new(false),
                on_update: Box::new(on_update),
            }),
        }
    }

    /// Subscribe to live prices and load seed history. Ticks that arrive while
    /// the history is in flight are folded into the history bar for their period.
    pub async fn start(&self, prefetched: Option<Vec<Candle>>) {
        let inner = &self.inner;
        {
            let mut state = inner.state.borrow_mut();
            if inner.disposed.get() || state.phase != ViewPhase::Idle {
                return;
            }
            state.phase = ViewPhase::Subscribed;
        }
        // may deliver a cached price synchronously
        let watch = subscribe_live(inner);
        inner.state.borrow_mut().watch = Some(watch);
        let generation = inner.begin_load(LoadKind::Seed);
        log_info!(
            COMPONENT,
            "🕯️ Starting {} {} ({})",
            inner.symbol,
            inner.settings.interval,
            inner.settings.timeframe
        );
        inner.emit(Some(SeriesUpdate::Loading));

        let limit = inner.settings.history_limit();
        let outcome = inner
            .loader
            .load_bars_with(&inner.symbol, inner.settings.interval, limit, prefetched)
            .await;
        inner.finish_load(LoadKind::Seed, generation, outcome);
    }

    /// Retry the seed load after a failure.
    pub async fn reload(&self) {
        let inner = &self.inner;
        if inner.disposed.get() {
            return;
        }
        let generation = inner.begin_load(LoadKind::Seed);
        inner.emit(Some(SeriesUpdate::Loading));
        let outcome = inner
            .loader
            .load_bars(&inner.symbol, inner.settings.interval, inner.settings.history_limit())
            .await;
        inner.finish_load(LoadKind::Seed, generation, outcome);
    }

    /// Tab hidden: release the live stream, keep the candles on screen.
    pub fn suspend(&self) {
        let watch = {
            let mut state = self.inner.state.borrow_mut();
            if state.phase != ViewPhase::Subscribed {
                return;
            }
            state.phase = ViewPhase::Suspended;
            // the open candle goes stale while hidden
            state.live_tail = false;
            state.watch.take()
        };
        log_debug!(COMPONENT, "suspending {}", self.inner.symbol);
        drop(watch);
    }

    /// Tab visible again: resubscribe and backfill the bars missed meanwhile.
    pub async fn resume(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.borrow_mut();
            if inner.disposed.get() || state.phase != ViewPhase::Suspended {
                return;
            }
            state.phase = ViewPhase::Subscribed;
        }
        let watch = subscribe_live(inner);
        let (generation, limit) = {
            let mut state = inner.state.borrow_mut();
            state.watch = Some(watch);
            let interval_ms = inner.settings.interval.duration_ms().max(1);
            let limit = match state.series.latest() {
                Some(last) => {
                    let gap = inner.clock.now_millis().saturating_sub(last.timestamp.as_millis());
                    (gap / interval_ms + 2).min(u64::from(inner.settings.history_limit()))
                }
                None => u64::from(inner.settings.history_limit()),
            };
            drop(state);
            (inner.begin_load(LoadKind::Seed), u32::try_from(limit).unwrap_or(u32::MAX))
        };
        log_info!(COMPONENT, "🔄 Backfilling {} bars for {}", limit, inner.symbol);
        let end_time = inner.clock.now_millis() + inner.settings.interval.duration_ms();
        let outcome = inner
            .loader
            .load_bars_before(
                &inner.symbol,
                inner.settings.interval,
                limit,
                Timestamp::from_millis(end_time),
            )
            .await;
        if let Some(err) = &outcome.error {
            log_warn!(COMPONENT, "⚠️ Backfill failed, keeping stale candles: {}", err);
        }
        inner.finish_load(LoadKind::Seed, generation, outcome);
    }

    /// Prepend `count` bars older than the first loaded candle.
    pub async fn load_older(&self, count: u32) {
        let inner = &self.inner;
        let Some(first) = inner.state.borrow().series.candles().first().map(|c| c.timestamp) else {
            return;
        };
        if inner.disposed.get() {
            return;
        }
        let generation = inner.begin_load(LoadKind::Older);
        let outcome = inner
            .loader
            .load_bars_before(&inner.symbol, inner.settings.interval, count, first)
            .await;
        inner.finish_load(LoadKind::Older, generation, outcome);
    }

    /// Stop everything. Safe to call more than once; later async results are dropped.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        let watch = {
            let mut state = self.inner.state.borrow_mut();
            state.phase = ViewPhase::TornDown;
            state.loading = false;
            state.watch.take()
        };
        log_info!(COMPONENT, "🧹 Tearing down {}", self.inner.symbol);
        drop(watch);
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        self.inner.state.borrow().snapshot()
    }

    pub fn candles(&self) -> Vec<Candle> {
        self.inner.state.borrow().series.candles().to_vec()
    }

    pub fn phase(&self) -> ViewPhase {
        self.inner.state.borrow().phase
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn error(&self) -> Option<AppError> {
        self.inner.state.borrow().error.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    pub fn symbol(&self) -> &Symbol {
        &self.inner.symbol
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    pub fn downgrade(&self) -> WeakCandlestickSession {
        WeakCandlestickSession(Rc::downgrade(&self.inner))
    }
}

#[derive(Clone, Default)]
pub struct WeakCandlestickSession(Weak<SessionInner>);

impl WeakCandlestickSession {
    pub fn upgrade(&self) -> Option<CandlestickSession> {
        self.0.upgrade().map(|inner| CandlestickSession { inner })
    }
}
