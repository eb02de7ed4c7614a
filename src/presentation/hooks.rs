use super::use_market_store;
use crate::application::{CandlestickSession, ChartBinding, ChartLifecycleController, MarketFeed};
use crate::domain::chart::SeriesUpdate;
use crate::domain::logging::LogComponent;
use crate::domain::market_data::{
    Candle, ConnectionId, DerivedSeries, OrderBook, Symbol, TimeInterval, Timeframe,
};
use crate::domain::stream::StreamKind;
use crate::log_debug;
use leptos::*;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

const COMPONENT: LogComponent = LogComponent::Presentation("Hooks");

/// Result of [`use_live_order_book`].
#[derive(Clone, Copy)]
pub struct LiveOrderBook {
    pub order_book: ReadSignal<Option<OrderBook>>,
    pub is_connected: ReadSignal<bool>,
    pub error: ReadSignal<Option<String>>,
}

/// Result of [`use_live_price`].
#[derive(Clone, Copy)]
pub struct LivePrice {
    pub price: ReadSignal<Option<f64>>,
    pub change_24h: ReadSignal<Option<f64>>,
    pub change_percent_24h: ReadSignal<Option<f64>>,
    pub is_connected: ReadSignal<bool>,
}

/// Result of [`use_candlestick_series`].
#[derive(Clone)]
pub struct CandlestickSeries {
    pub candles: ReadSignal<Vec<Candle>>,
    pub derived_series: ReadSignal<Vec<DerivedSeries>>,
    pub is_loading: ReadSignal<bool>,
    pub error: ReadSignal<Option<String>>,
    session: CandlestickSession,
    chart: Rc<RefCell<Option<ChartBinding>>>,
}

impl CandlestickSeries {
    /// Push this series into `controller` from now on, including a full
    /// refresh whenever the chart (re)mounts.
    pub fn attach_chart(&self, controller: ChartLifecycleController) {
        let weak = self.session.downgrade();
        let binding = ChartBinding::new(controller, move || weak.upgrade().map(|s| s.snapshot()));
        let snapshot = self.session.snapshot();
        if binding.controller().is_mounted() && !snapshot.is_empty() {
            binding.apply(&SeriesUpdate::Replaced(snapshot));
        }
        *self.chart.borrow_mut() = Some(binding);
    }

    pub fn reload(&self) {
        let session = self.session.clone();
        spawn_local(async move { session.reload().await });
    }

    pub fn load_older(&self, count: u32) {
        let session = self.session.clone();
        spawn_local(async move { session.load_older(count).await });
    }

    pub fn session(&self) -> &CandlestickSession {
        &self.session
    }
}

fn watch_connection(
    feed: &MarketFeed,
    set_connected: WriteSignal<bool>,
    set_error: Option<WriteSignal<Option<String>>>,
) {
    let status = feed.watch_status(move |status| {
        set_connected.set(status.connected);
        if let Some(set_error) = set_error {
            set_error.set(status.error.clone());
        }
    });
    on_cleanup(move || drop(status));
}

/// Live order book for `symbol`. Unsubscribes when the owning scope is
/// disposed.
pub fn use_live_order_book(
    connection_id: impl Into<ConnectionId>,
    symbol: impl Into<Symbol>,
) -> LiveOrderBook {
    let feed = use_market_store().feed(connection_id);
    let (order_book, set_order_book) = create_signal(None::<OrderBook>);
    let (is_connected, set_connected) = create_signal(feed.status().connected);
    let (error, set_error) = create_signal(None::<String>);

    watch_connection(&feed, set_connected, Some(set_error));
    let watch = feed.watch(
        symbol,
        StreamKind::OrderBook,
        feed.default_params(StreamKind::OrderBook),
        move |entry| {
            if let Some(book) = entry.order_book() {
                set_order_book.set(Some(book.clone()));
            }
        },
    );
    on_cleanup(move || watch.release());

    LiveOrderBook { order_book, is_connected, error }
}

/// Latest price and 24h change for `symbol`, starting from `initial_price`
/// until the first update arrives.
pub fn use_live_price(
    connection_id: impl Into<ConnectionId>,
    symbol: impl Into<Symbol>,
    initial_price: Option<f64>,
) -> LivePrice {
    let feed = use_market_store().feed(connection_id);
    let (price, set_price) = create_signal(initial_price);
    let (change_24h, set_change) = create_signal(None::<f64>);
    let (change_percent_24h, set_change_percent) = create_signal(None::<f64>);
    let (is_connected, set_connected) = create_signal(feed.status().connected);

    watch_connection(&feed, set_connected, None);
    let watch = feed.watch(
        symbol,
        StreamKind::Price,
        feed.default_params(StreamKind::Price),
        move |entry| {
            let Some(ticker) = entry.ticker() else { return };
            if ticker.price.is_some() {
                set_price.set(ticker.price);
            }
            if ticker.change_24h.is_some() {
                set_change.set(ticker.change_24h);
            }
            if ticker.change_percent_24h.is_some() {
                set_change_percent.set(ticker.change_percent_24h);
            }
        },
    );
    on_cleanup(move || watch.release());

    LivePrice { price, change_24h, change_percent_24h, is_connected }
}

/// History plus live candles with their moving averages.
pub fn use_candlestick_series(
    connection_id: impl Into<ConnectionId>,
    symbol: impl Into<Symbol>,
    interval: TimeInterval,
    timeframe: Timeframe,
) -> CandlestickSeries {
    let store = use_market_store();
    let (candles, set_candles) = create_signal(Vec::<Candle>::new());
    let (derived_series, set_derived) = create_signal(Vec::<DerivedSeries>::new());
    let (is_loading, set_loading) = create_signal(true);
    let (error, set_error) = create_signal(None::<String>);
    let chart: Rc<RefCell<Option<ChartBinding>>> = Rc::new(RefCell::new(None));
    let disposed = Rc::new(Cell::new(false));

    let on_update = {
        let chart = chart.clone();
        let disposed = disposed.clone();
        move |update: &SeriesUpdate| {
            if disposed.get() {
                return;
            }
            match update {
                SeriesUpdate::Loading => set_loading.set(true),
                SeriesUpdate::Replaced(snapshot) => {
                    set_candles.set(snapshot.candles.clone());
                    set_derived.set(snapshot.derived.clone());
                    set_loading.set(false);
                    set_error.set(None);
                }
                SeriesUpdate::Tail(tail) => {
                    set_candles.update(|list| match list.last_mut() {
                        Some(last) if last.timestamp == tail.candle.timestamp => {
                            *last = tail.candle.clone();
                        }
                        _ => list.push(tail.candle.clone()),
                    });
                    set_derived.update(|series| {
                        for (window, point) in &tail.derived {
                            let Some(target) = series.iter_mut().find(|s| s.window == *window) else {
                                continue;
                            };
                            match target.points.last_mut() {
                                Some(last) if last.time == point.time => *last = point.clone(),
                                _ => target.points.push(point.clone()),
                            }
                        }
                    });
                }
                SeriesUpdate::Failed(message) => {
                    set_candles.set(Vec::new());
                    set_derived.set(Vec::new());
                    set_loading.set(false);
                    set_error.set(Some(message.clone()));
                }
            }
            if let Some(binding) = chart.borrow().as_ref() {
                binding.apply(update);
            }
        }
    };

    let session = store.candlestick_session(connection_id, symbol, interval, timeframe, on_update);
    log_debug!(COMPONENT, "📈 series hook for {} {}", session.symbol(), interval);

    spawn_local({
        let session = session.clone();
        let disposed = disposed.clone();
        async move {
            session.start(None).await;
            if disposed.get() {
                return;
            }
            // history errors after live data arrived do not emit Failed
            set_loading.set(session.is_loading());
            set_error.set(session.error().map(|e| e.user_message()));
        }
    });

    on_cleanup({
        let session = session.clone();
        let chart = chart.clone();
        move || {
            disposed.set(true);
            session.dispose();
            chart.borrow_mut().take();
        }
    });

    CandlestickSeries { candles, derived_series, is_loading, error, session, chart }
}
