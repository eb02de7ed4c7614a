use live_chart_wasm::application::{CacheEntry, ConnectionPorts, FeedStatus, MarketFeed};
use live_chart_wasm::config::StreamConfig;
use live_chart_wasm::domain::errors::AppError;
use live_chart_wasm::domain::events::{InMemoryEventDispatcher, MarketDataEvent, SharedDispatcher};
use live_chart_wasm::domain::market_data::{
    ConnectionId, OrderBook, PriceLevel, PriceTicker, Timestamp, Trade,
};
use live_chart_wasm::domain::stream::{
    ConnectionState, GatewayEvent, StreamKind, StreamTarget, SubscriptionParams,
};
use live_chart_wasm::testing::{FakeConnector, ManualClock, ManualScheduler};
use std::cell::RefCell;
use std::rc::Rc;

struct Rig {
    feed: MarketFeed,
    connector: FakeConnector,
    scheduler: ManualScheduler,
    clock: ManualClock,
    events: Rc<RefCell<Vec<MarketDataEvent>>>,
}

fn rig() -> Rig {
    let clock = ManualClock::new(5_000_000);
    let scheduler = ManualScheduler::with_clock(clock.clone());
    let connector = FakeConnector::new();
    let dispatcher: SharedDispatcher = Rc::new(RefCell::new(InMemoryEventDispatcher::new()));
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    dispatcher
        .borrow_mut()
        .subscribe_to_market_data_events(move |event| sink.borrow_mut().push(event.clone()));
    let feed = MarketFeed::new(
        ConnectionId::from("conn-1"),
        StreamConfig::default(),
        ConnectionPorts {
            connector: Rc::new(connector.clone()),
            scheduler: Rc::new(scheduler.clone()),
            clock: Rc::new(clock.clone()),
        },
        dispatcher,
    );
    Rig { feed, connector, scheduler, clock, events }
}

fn recorder() -> (Rc<RefCell<Vec<CacheEntry>>>, impl Fn(&CacheEntry) + 'static) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    (seen, move |entry: &CacheEntry| sink.borrow_mut().push(entry.clone()))
}

fn book_snapshot(symbol: &str, bid: f64, ask: f64) -> GatewayEvent {
    GatewayEvent::OrderBookSnapshot {
        target: StreamTarget::new(symbol),
        book: OrderBook {
            bids: vec![PriceLevel::new(bid, 1.0)],
            asks: vec![PriceLevel::new(ask, 1.0)],
        },
    }
}

fn price_update(symbol: &str, ticker: PriceTicker) -> GatewayEvent {
    GatewayEvent::PriceUpdate { target: StreamTarget::new(symbol), ticker }
}

#[test]
fn first_watch_connects_and_subscribes() {
    let rig = rig();
    assert_eq!(rig.connector.open_count(), 0);

    let _watch = rig.feed.watch("btcusdt", StreamKind::OrderBook, SubscriptionParams::with_limit(20), |_| {});

    assert_eq!(rig.connector.open_count(), 1);
    assert_eq!(rig.connector.sent_names(), vec!["subscribe:orderbook"]);
    assert_eq!(rig.feed.subscription_count(), 1);
    assert!(rig.feed.status().connected);
}

#[test]
fn events_are_routed_to_the_matching_watcher_only() {
    let rig = rig();
    let (btc, on_btc) = recorder();
    let _watch = rig.feed.watch("btcusdt", StreamKind::OrderBook, SubscriptionParams::with_limit(20), on_btc);

    rig.connector.deliver(book_snapshot("btcusdt", 99.0, 101.0));
    rig.connector.deliver(book_snapshot("ethusdt", 9.0, 11.0));

    assert_eq!(btc.borrow().len(), 1);
    let book = btc.borrow()[0].order_book().cloned().unwrap_or_default();
    assert_eq!(book.best_bid(), Some(PriceLevel::new(99.0, 1.0)));
    assert!(rig.feed.entry(&rig.feed.key("ethusdt", StreamKind::OrderBook)).is_none());
}

#[test]
fn ticker_and_price_updates_merge_into_one_entry() {
    let rig = rig();
    let (seen, on_price) = recorder();
    let _watch = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), on_price);

    rig.connector.deliver(GatewayEvent::TickerUpdate {
        target: StreamTarget::new("btcusdt"),
        ticker: PriceTicker {
            price: Some(100.0),
            change_24h: Some(4.0),
            change_percent_24h: Some(4.2),
            ..PriceTicker::default()
        },
    });
    rig.connector.deliver(price_update("btcusdt", PriceTicker::with_price(101.5)));

    let last = seen.borrow().last().and_then(|e| e.ticker()).cloned().unwrap_or_default();
    assert_eq!(last.price, Some(101.5));
    assert_eq!(last.change_24h, Some(4.0));
    assert_eq!(last.change_percent_24h, Some(4.2));
}

#[test]
fn trade_list_respects_watch_limit() {
    let rig = rig();
    let _watch = rig.feed.watch("btcusdt", StreamKind::Trades, SubscriptionParams::with_limit(2), |_| {});
    let trades = (1..=3)
        .map(|i| Trade {
            id: Some(format!("t{i}")),
            price: 100.0 + i as f64,
            quantity: 0.5,
            side: None,
            timestamp: Timestamp::from_secs(1_700_000_000 + i),
        })
        .collect();
    rig.connector.deliver(GatewayEvent::TradesSnapshot { target: StreamTarget::new("btcusdt"), trades });

    let entry = rig.feed.entry(&rig.feed.key("btcusdt", StreamKind::Trades));
    let ids: Vec<String> = entry
        .as_ref()
        .and_then(|e| e.trades())
        .map(|list| list.trades().iter().filter_map(|t| t.id.clone()).collect())
        .unwrap_or_default();
    assert_eq!(ids, vec!["t3", "t2"]);
}

#[test]
fn late_watcher_gets_the_cached_value_without_resubscribing() {
    let rig = rig();
    let _first = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    rig.connector.deliver(price_update("btcusdt", PriceTicker::with_price(42.0)));

    let (seen, on_price) = recorder();
    let _second = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), on_price);

    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(seen.borrow()[0].ticker().and_then(|t| t.price), Some(42.0));
    assert_eq!(rig.connector.sent_names(), vec!["subscribe:price"]);
}

#[test]
fn releasing_the_last_watch_unsubscribes_and_disconnects() {
    let rig = rig();
    let first = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    let second = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    rig.connector.deliver(price_update("btcusdt", PriceTicker::with_price(42.0)));
    rig.connector.take_sent();

    first.release();
    assert!(rig.connector.sent().is_empty());
    assert_eq!(rig.connector.live_handles(), 1);

    drop(second);
    assert_eq!(rig.connector.sent_names(), vec!["unsubscribe:price"]);
    assert_eq!(rig.feed.connection().state(), ConnectionState::Disconnected);
    assert_eq!(rig.connector.live_handles(), 0);
    assert_eq!(rig.scheduler.active_count(), 0);
    assert!(rig.feed.entry(&rig.feed.key("btcusdt", StreamKind::Price)).is_none());
    assert_eq!(rig.feed.listener_count(), 0);
}

#[test]
fn entries_go_stale_without_updates() {
    let rig = rig();
    let _watch = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    let key = rig.feed.key("btcusdt", StreamKind::Price);
    assert!(rig.feed.is_stale(&key, 10_000));

    rig.connector.deliver(price_update("btcusdt", PriceTicker::with_price(1.0)));
    assert!(!rig.feed.is_stale(&key, 10_000));

    rig.clock.advance(10_001);
    assert!(rig.feed.is_stale(&key, 10_000));
}

#[test]
fn gateway_error_reaches_status_watchers_verbatim() {
    let rig = rig();
    let statuses = Rc::new(RefCell::new(Vec::<FeedStatus>::new()));
    let sink = statuses.clone();
    let _status = rig.feed.watch_status(move |status| sink.borrow_mut().push(status.clone()));
    assert_eq!(statuses.borrow().len(), 1);
    assert!(!statuses.borrow()[0].connected);

    let _watch = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    rig.connector.deliver(GatewayEvent::Error(AppError::gateway("Unknown symbol BTCUSDT", None)));

    let last = statuses.borrow().last().cloned();
    assert_eq!(last.as_ref().and_then(|s| s.error.clone()).as_deref(), Some("Unknown symbol BTCUSDT"));
    assert_eq!(last.map(|s| s.connected), Some(true));
}

#[test]
fn connection_lifecycle_is_published_on_the_dispatcher() {
    let rig = rig();
    let _watch = rig.feed.watch("btcusdt", StreamKind::Price, SubscriptionParams::default(), |_| {});
    rig.connector.drop_connection("network gone");

    let events = rig.events.borrow();
    let established = events.iter().find_map(|event| match event {
        MarketDataEvent::MarketDataConnectionEstablished { replayed, .. } => Some(*replayed),
        _ => None,
    });
    assert_eq!(established, Some(1));
    assert!(events.iter().any(|event| matches!(
        event,
        MarketDataEvent::MarketDataConnectionLost { connection_id, .. }
            if connection_id == &ConnectionId::from("conn-1")
    )));
    let states: Vec<ConnectionState> = events
        .iter()
        .filter_map(|event| match event {
            MarketDataEvent::ConnectionStateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![ConnectionState::Connecting, ConnectionState::Connected, ConnectionState::Reconnecting]
    );
}

#[test]
fn retry_reconnects_after_a_rate_limit_halt() {
    let rig = rig();
    let _watch = rig.feed.watch("btcusdt", StreamKind::OrderBook, SubscriptionParams::with_limit(20), |_| {});
    rig.connector.deliver(GatewayEvent::Error(AppError::gateway(
        "Too many subscriptions",
        Some("RATE_LIMIT".into()),
    )));
    rig.connector.drop_connection("server closed");
    assert_eq!(rig.feed.status().state, ConnectionState::Failed);
    assert!(!rig.feed.connection_status().is_connected());
    rig.connector.take_sent();

    rig.feed.retry();

    assert!(rig.feed.status().connected);
    assert_eq!(rig.feed.connection_status().attempts, 0);
    assert_eq!(rig.connector.sent_names(), vec!["subscribe:orderbook"]);
}
