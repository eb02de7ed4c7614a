use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::{LocalPool, block_on};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use live_chart_wasm::application::{CandlestickSession, MarketStore, StoreDeps, ViewPhase};
use live_chart_wasm::config::AppConfig;
use live_chart_wasm::domain::chart::SeriesUpdate;
use live_chart_wasm::domain::errors::{AppError, NetworkResult};
use live_chart_wasm::domain::market_data::{
    BarQuery, BarSource, Candle, PriceTicker, RawBar, TimeInterval, Timeframe, Timestamp,
};
use live_chart_wasm::domain::stream::{GatewayEvent, StreamTarget};
use live_chart_wasm::testing::{
    FakeConnector, ManualClock, ManualScheduler, StaticBarSource, StoreHarness, minute_candle,
    raw_bar,
};
use std::cell::RefCell;
use std::rc::Rc;

const START: u64 = 1_699_999_980;

type Updates = Rc<RefCell<Vec<SeriesUpdate>>>;

fn history(count: u64) -> Vec<Candle> {
    (0..count).map(|i| minute_candle(START, i, 100.0 + i as f64)).collect()
}

/// Half a minute into the last of `count` history candles.
fn inside_last_candle(count: u64) -> u64 {
    (START + (count - 1) * 60 + 30) * 1000
}

fn open_session(store: &MarketStore) -> (CandlestickSession, Updates) {
    let updates: Updates = Rc::new(RefCell::new(Vec::new()));
    let sink = updates.clone();
    let session = store.candlestick_session(
        "conn-1",
        "btcusdt",
        TimeInterval::OneMinute,
        Timeframe::OneDay,
        move |update| sink.borrow_mut().push(update.clone()),
    );
    (session, updates)
}

fn tick(price: f64) -> GatewayEvent {
    GatewayEvent::PriceUpdate { target: StreamTarget::new("btcusdt"), ticker: PriceTicker::with_price(price) }
}

#[test]
fn start_subscribes_and_loads_history() {
    let harness = StoreHarness::new(AppConfig::default(), StaticBarSource::from_candles(&history(10)), inside_last_candle(10));
    let (session, updates) = open_session(&harness.store);

    block_on(session.start(None));

    let updates = updates.borrow();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0], SeriesUpdate::Loading);
    let SeriesUpdate::Replaced(snapshot) = &updates[1] else {
        panic!("expected a full replacement, got {:?}", updates[1]);
    };
    assert_eq!(snapshot.candles, history(10));
    assert_eq!(snapshot.volumes.len(), 10);
    assert_eq!(snapshot.derived_for(5).map(|s| s.points.len()), Some(6));
    assert_eq!(snapshot.derived_for(10).map(|s| s.points.len()), Some(1));

    assert_eq!(session.phase(), ViewPhase::Subscribed);
    assert!(!session.is_loading());
    assert_eq!(harness.connector.sent_names(), vec!["subscribe:price"]);
    // one day of minute bars, capped by the REST maximum
    assert_eq!(harness.bars.queries()[0].limit, 1_000);
}

#[test]
fn ticks_update_the_open_candle_then_open_a_new_one() {
    let harness = StoreHarness::new(AppConfig::default(), StaticBarSource::from_candles(&history(10)), inside_last_candle(10));
    let (session, updates) = open_session(&harness.store);
    block_on(session.start(None));
    updates.borrow_mut().clear();

    harness.connector.deliver(tick(150.0));
    harness.clock.advance(60_000);
    harness.connector.deliver(tick(151.0));

    let updates = updates.borrow();
    assert_eq!(updates.len(), 2);
    let SeriesUpdate::Tail(same) = &updates[0] else {
        panic!("expected a tail update, got {:?}", updates[0]);
    };
    assert_eq!(same.candle.timestamp, Timestamp::from_secs(START + 9 * 60));
    assert_eq!(same.candle.ohlcv.close.value(), 150.0);
    assert_eq!(same.candle.ohlcv.high.value(), 150.0);
    assert_eq!(same.candle.ohlcv.open.value(), 109.0);
    let windows: Vec<usize> = same.derived.iter().map(|(window, _)| *window).collect();
    assert_eq!(windows, vec![5, 10]);

    let SeriesUpdate::Tail(next) = &updates[1] else {
        panic!("expected a tail update, got {:?}", updates[1]);
    };
    assert_eq!(next.candle.timestamp, Timestamp::from_secs(START + 10 * 60));
    assert_eq!(next.candle.ohlcv.open.value(), 151.0);
    assert_eq!(session.candles().len(), 11);

    let ma5 = session.snapshot().derived_for(5).and_then(|s| s.last().copied());
    assert_eq!(ma5.map(|p| p.value), Some((106.0 + 107.0 + 108.0 + 150.0 + 151.0) / 5.0));
}

#[test]
fn failed_history_emits_failed_and_reload_recovers() {
    let harness = StoreHarness::new(AppConfig::default(), StaticBarSource::failing(500), inside_last_candle(10));
    let (session, updates) = open_session(&harness.store);

    block_on(session.start(None));

    assert_eq!(
        *updates.borrow(),
        vec![SeriesUpdate::Loading, SeriesUpdate::Failed("HTTP Error: status 500".into())]
    );
    assert_eq!(session.error(), Some(AppError::HttpStatus(500)));
    assert!(session.candles().is_empty());
    assert!(!session.is_loading());

    harness.bars.set_bars(history(3).iter().map(raw_bar).collect());
    block_on(session.reload());

    assert!(matches!(updates.borrow().last(), Some(SeriesUpdate::Replaced(s)) if s.candles.len() == 3));
    assert_eq!(session.error(), None);
}

#[test]
fn prefetched_candles_are_used_without_a_request() {
    let harness = StoreHarness::new(AppConfig::default(), StaticBarSource::failing(500), inside_last_candle(4));
    let (session, updates) = open_session(&harness.store);

    block_on(session.start(Some(history(4))));

    assert!(harness.bars.queries().is_empty());
    assert!(matches!(updates.borrow().last(), Some(SeriesUpdate::Replaced(s)) if s.candles.len() == 4));
}

#[test]
fn dispose_releases_the_stream_and_is_idempotent() {
    let harness = StoreHarness::new(AppConfig::default(), StaticBarSource::from_candles(&history(5)), inside_last_candle(5));
    let (session, updates) = open_session(&harness.store);
    block_on(session.start(None));
    updates.borrow_mut().clear();

    session.dispose();
    session.dispose();
    harness.connector.deliver(tick(150.0));

    assert_eq!(session.phase(), ViewPhase::TornDown);
    assert!(updates.borrow().is_empty());
    assert_eq!(harness.connector.live_handles(), 0);
    assert_eq!(harness.store.feed("conn-1").subscription_count(), 0);
}

/// Bar source whose responses are released by hand.
#[derive(Default)]
struct GatedBarSource {
    pending: RefCell<Vec<oneshot::Sender<Vec<RawBar>>>>,
}

impl GatedBarSource {
    fn release(&self, bars: Vec<RawBar>) {
        for sender in self.pending.borrow_mut().drain(..) {
            let _ = sender.send(bars.clone());
        }
    }

    /// Answer the oldest outstanding request only.
    fn release_oldest(&self, bars: Vec<RawBar>) {
        let mut pending = self.pending.borrow_mut();
        if !pending.is_empty() {
            let _ = pending.remove(0).send(bars);
        }
    }

    fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl BarSource for GatedBarSource {
    fn fetch_bars<'a>(&'a self, _query: &'a BarQuery) -> LocalBoxFuture<'a, NetworkResult<Vec<RawBar>>> {
        let (sender, receiver) = oneshot::channel();
        self.pending.borrow_mut().push(sender);
        async move { receiver.await.map_err(|_| AppError::NetworkError("request dropped".into())) }
            .boxed_local()
    }
}

struct GatedRig {
    store: MarketStore,
    connector: FakeConnector,
    clock: ManualClock,
    bars: Rc<GatedBarSource>,
}

fn gated_rig(now_millis: u64) -> GatedRig {
    let clock = ManualClock::new(now_millis);
    let connector = FakeConnector::new();
    let bars = Rc::new(GatedBarSource::default());
    let store = MarketStore::new(
        AppConfig::default(),
        StoreDeps {
            connector: Rc::new(connector.clone()),
            scheduler: Rc::new(ManualScheduler::with_clock(clock.clone())),
            clock: Rc::new(clock.clone()),
            bars: bars.clone(),
            markets: None,
        },
    );
    GatedRig { store, connector, clock, bars }
}

#[test]
fn ticks_during_the_history_load_fold_into_the_history_bar() {
    let rig = gated_rig(inside_last_candle(5));
    let (session, updates) = open_session(&rig.store);
    let mut pool = LocalPool::new();
    let starting = session.clone();
    pool.spawner().spawn_local(async move { starting.start(None).await }).expect("spawn");
    pool.run_until_stalled();
    assert!(session.is_loading());

    rig.connector.deliver(tick(250.0));
    rig.connector.deliver(tick(90.0));
    rig.connector.deliver(tick(120.0));
    assert!(matches!(updates.borrow().last(), Some(SeriesUpdate::Tail(_))));

    rig.bars.release(history(5).iter().map(raw_bar).collect());
    pool.run_until_stalled();

    let candles = session.candles();
    assert_eq!(candles.len(), 5);
    // server bar 104: open 104, high 105, low 103, volume 10
    let open = &candles[4].ohlcv;
    assert_eq!(open.open.value(), 104.0);
    assert_eq!(open.high.value(), 250.0);
    assert_eq!(open.low.value(), 90.0);
    assert_eq!(open.close.value(), 120.0);
    assert_eq!(open.volume.value(), 10.0);
    assert_eq!(candles[3].ohlcv.close.value(), 103.0);
    assert!(!session.is_loading());
}

#[test]
fn paging_older_history_does_not_cancel_the_seed_load() {
    let rig = gated_rig(inside_last_candle(5));
    let (session, _updates) = open_session(&rig.store);
    let mut pool = LocalPool::new();
    let starting = session.clone();
    pool.spawner().spawn_local(async move { starting.start(None).await }).expect("spawn");
    pool.run_until_stalled();

    rig.connector.deliver(tick(250.0));
    assert_eq!(session.candles().len(), 1);
    let paging = session.clone();
    pool.spawner().spawn_local(async move { paging.load_older(10).await }).expect("spawn");
    pool.run_until_stalled();
    assert_eq!(rig.bars.pending_count(), 2);

    rig.bars.release_oldest(history(5).iter().map(raw_bar).collect());
    pool.run_until_stalled();
    rig.bars.release_oldest(Vec::new());
    pool.run_until_stalled();

    let candles = session.candles();
    assert_eq!(candles.len(), 5);
    assert_eq!(candles[4].ohlcv.close.value(), 250.0);
    assert!(!session.is_loading());
}

#[test]
fn ticks_during_the_resume_backfill_fold_into_the_open_bar() {
    let rig = gated_rig(inside_last_candle(5));
    let (session, _updates) = open_session(&rig.store);
    block_on(session.start(Some(history(5))));

    block_on(rig.store.set_visible(false));
    rig.clock.advance(3 * 60_000);

    let mut pool = LocalPool::new();
    let store = rig.store.clone();
    pool.spawner().spawn_local(async move { store.set_visible(true).await }).expect("spawn");
    pool.run_until_stalled();
    assert_eq!(rig.bars.pending_count(), 1);

    rig.connector.deliver(tick(300.0));
    rig.bars.release(history(8).iter().map(raw_bar).collect());
    pool.run_until_stalled();

    let candles = session.candles();
    assert_eq!(candles.len(), 8);
    let open = &candles[7].ohlcv;
    assert_eq!(open.open.value(), 107.0);
    assert_eq!(open.close.value(), 300.0);
    assert_eq!(open.high.value(), 300.0);
    assert_eq!(open.volume.value(), 10.0);
    // bars from before the hidden period come from the server unchanged
    assert_eq!(candles[4].ohlcv.close.value(), 104.0);
}

#[test]
fn history_arriving_after_dispose_is_discarded() {
    let rig = gated_rig(inside_last_candle(5));
    let (session, updates) = open_session(&rig.store);
    let mut pool = LocalPool::new();
    let starting = session.clone();
    pool.spawner().spawn_local(async move { starting.start(None).await }).expect("spawn");
    pool.run_until_stalled();

    session.dispose();
    rig.bars.release(history(5).iter().map(raw_bar).collect());
    pool.run_until_stalled();

    assert_eq!(*updates.borrow(), vec![SeriesUpdate::Loading]);
    assert!(session.candles().is_empty());
    assert!(session.is_disposed());
}
