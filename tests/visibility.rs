use futures::executor::block_on;
use live_chart_wasm::application::ViewPhase;
use live_chart_wasm::config::AppConfig;
use live_chart_wasm::domain::chart::SeriesUpdate;
use live_chart_wasm::domain::market_data::{Candle, PriceTicker, TimeInterval, Timeframe, Timestamp};
use live_chart_wasm::domain::stream::{
    ConnectionState, GatewayEvent, StreamKind, StreamTarget, SubscriptionParams,
};
use live_chart_wasm::testing::{StaticBarSource, StoreHarness, minute_candle, raw_bar};
use std::cell::RefCell;
use std::rc::Rc;

const START: u64 = 1_699_999_980;

fn history(count: u64) -> Vec<Candle> {
    (0..count).map(|i| minute_candle(START, i, 100.0 + i as f64)).collect()
}

fn harness() -> StoreHarness {
    StoreHarness::new(
        AppConfig::default(),
        StaticBarSource::from_candles(&history(10)),
        (START + 9 * 60 + 30) * 1000,
    )
}

#[test]
fn hiding_releases_every_stream_and_showing_replays_them() {
    let harness = harness();
    let feed = harness.store.feed("conn-1");
    let _book = feed.watch("btcusdt", StreamKind::OrderBook, SubscriptionParams::with_limit(20), |_| {});
    let _price = feed.watch("ethusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    harness.connector.take_sent();

    block_on(harness.store.set_visible(false));

    assert!(!harness.store.is_visible());
    assert_eq!(harness.connector.sent_names(), vec!["unsubscribe:orderbook", "unsubscribe:price"]);
    assert_eq!(harness.connector.live_handles(), 0);
    assert_eq!(feed.connection().state(), ConnectionState::Disconnected);
    assert_eq!(feed.subscription_count(), 2);
    assert_eq!(harness.scheduler.active_count(), 0);
    harness.connector.take_sent();

    block_on(harness.store.set_visible(true));

    assert_eq!(harness.connector.live_handles(), 1);
    assert!(feed.status().connected);
    assert_eq!(harness.connector.sent_names(), vec!["subscribe:orderbook", "subscribe:price"]);
}

#[test]
fn repeated_visibility_changes_are_ignored() {
    let harness = harness();
    let feed = harness.store.feed("conn-1");
    let _price = feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});

    block_on(harness.store.set_visible(true));
    assert_eq!(harness.connector.open_count(), 1);

    block_on(harness.store.set_visible(false));
    block_on(harness.store.set_visible(false));
    harness.connector.take_sent();
    block_on(harness.store.set_visible(true));
    block_on(harness.store.set_visible(true));

    assert_eq!(harness.connector.open_count(), 2);
    assert_eq!(harness.connector.sent_names(), vec!["subscribe:price"]);
}

#[test]
fn feeds_created_while_hidden_wait_for_visibility() {
    let harness = harness();
    block_on(harness.store.set_visible(false));

    let feed = harness.store.feed("conn-2");
    assert_eq!(harness.store.feed("conn-2").connection_id(), feed.connection_id());
    assert_eq!(harness.store.feed_count(), 1);
    let _watch = feed.watch("btcusdt", StreamKind::Trades, SubscriptionParams::with_limit(50), |_| {});
    assert!(!feed.is_visible());
    assert_eq!(harness.connector.open_count(), 0);

    block_on(harness.store.set_visible(true));
    assert_eq!(harness.connector.open_count(), 1);
    assert_eq!(harness.connector.sent_names(), vec!["subscribe:trades"]);
}

#[test]
fn charts_are_suspended_and_backfilled_across_a_hidden_period() {
    let harness = harness();
    let updates = Rc::new(RefCell::new(Vec::<SeriesUpdate>::new()));
    let sink = updates.clone();
    let session = harness.store.candlestick_session(
        "conn-1",
        "btcusdt",
        TimeInterval::OneMinute,
        Timeframe::OneDay,
        move |update| sink.borrow_mut().push(update.clone()),
    );
    block_on(session.start(None));

    block_on(harness.store.set_visible(false));
    assert_eq!(session.phase(), ViewPhase::Suspended);
    assert_eq!(harness.connector.live_handles(), 0);
    // candles stay on screen while hidden
    assert_eq!(session.candles().len(), 10);

    // five minutes pass; the server keeps producing bars
    harness.clock.advance(5 * 60_000);
    harness.bars.set_bars(history(15).iter().map(raw_bar).collect());
    harness.connector.deliver(GatewayEvent::PriceUpdate {
        target: StreamTarget::new("btcusdt"),
        ticker: PriceTicker::with_price(999.0),
    });
    updates.borrow_mut().clear();

    block_on(harness.store.set_visible(true));

    assert_eq!(session.phase(), ViewPhase::Subscribed);
    assert_eq!(harness.connector.live_handles(), 1);
    assert!(harness.connector.sent_names().ends_with(&["subscribe:price".to_string()]));

    let backfill = harness.bars.queries().last().cloned();
    let backfill = backfill.as_ref();
    assert_eq!(backfill.map(|q| q.limit), Some(7));
    assert_eq!(
        backfill.and_then(|q| q.end_time),
        Some(Timestamp::from_secs(START + 9 * 60 + 30 + 5 * 60 + 60))
    );

    let candles = session.candles();
    assert_eq!(candles.len(), 15);
    assert!(candles.iter().all(|c| c.ohlcv.close.value() < 999.0));
    assert!(matches!(updates.borrow().last(), Some(SeriesUpdate::Replaced(s)) if s.candles.len() == 15));
}

#[test]
fn feeds_left_without_consumers_are_evicted() {
    let harness = harness();
    {
        let feed = harness.store.feed("conn-1");
        let watch = feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
        watch.release();
        assert_eq!(feed.connection().state(), ConnectionState::Disconnected);
    }
    assert_eq!(harness.store.feed_count(), 1);

    let other = harness.store.feed("conn-2");
    assert_eq!(harness.store.feed_count(), 1);
    assert_eq!(other.connection_id().value(), "conn-2");
}

#[test]
fn feeds_with_live_subscriptions_are_kept() {
    let harness = harness();
    let watch = harness
        .store
        .feed("conn-1")
        .watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});

    assert_eq!(harness.store.prune_idle_feeds(), 0);
    let _other = harness.store.feed("conn-2");
    assert_eq!(harness.store.feed_count(), 2);
    drop(watch);
    assert_eq!(harness.store.prune_idle_feeds(), 1);
}
