use live_chart_wasm::application::{ConnectionPorts, StreamConnection, SubscriptionManager};
use live_chart_wasm::config::StreamConfig;
use live_chart_wasm::domain::stream::{
    AuthContext, ClientCommand, StreamKind, SubscriptionKey, SubscriptionParams,
};
use live_chart_wasm::testing::{FakeConnector, ManualClock, ManualScheduler};
use std::rc::Rc;

struct Rig {
    connection: StreamConnection,
    manager: SubscriptionManager,
    connector: FakeConnector,
    scheduler: ManualScheduler,
}

fn rig() -> Rig {
    let clock = ManualClock::new(0);
    let scheduler = ManualScheduler::with_clock(clock.clone());
    let connector = FakeConnector::new();
    let connection = StreamConnection::from_config(
        &StreamConfig::default(),
        ConnectionPorts {
            connector: Rc::new(connector.clone()),
            scheduler: Rc::new(scheduler.clone()),
            clock: Rc::new(clock),
        },
    );
    let manager = SubscriptionManager::new(&connection);
    Rig { connection, manager, connector, scheduler }
}

fn key(symbol: &str, kind: StreamKind) -> SubscriptionKey {
    SubscriptionKey::new("conn-1", symbol, kind)
}

fn subscribed_keys(commands: &[ClientCommand]) -> Vec<SubscriptionKey> {
    commands
        .iter()
        .filter_map(|command| match command {
            ClientCommand::Subscribe { key, .. } => Some(key.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn duplicate_subscribe_sends_one_wire_subscription() {
    let rig = rig();
    rig.connection.connect(AuthContext::new("conn-1"));
    let book = key("btcusdt", StreamKind::OrderBook);

    rig.manager.subscribe(book.clone(), SubscriptionParams::with_limit(20));
    rig.manager.subscribe(book.clone(), SubscriptionParams::with_limit(20));

    assert_eq!(rig.connector.sent_names(), vec!["subscribe:orderbook"]);
    assert_eq!(rig.manager.interest(&book), 2);
    assert_eq!(rig.manager.len(), 1);
}

#[test]
fn unsubscribe_waits_for_the_last_consumer() {
    let rig = rig();
    rig.connection.connect(AuthContext::new("conn-1"));
    let trades = key("ethusdt", StreamKind::Trades);
    rig.manager.subscribe(trades.clone(), SubscriptionParams::with_limit(50));
    rig.manager.subscribe(trades.clone(), SubscriptionParams::with_limit(50));
    rig.connector.take_sent();

    assert!(!rig.manager.unsubscribe(&trades));
    assert!(rig.connector.sent().is_empty());

    assert!(rig.manager.unsubscribe(&trades));
    assert_eq!(rig.connector.sent_names(), vec!["unsubscribe:trades"]);
    assert!(rig.manager.is_empty());
    assert!(!rig.manager.unsubscribe(&trades));
}

#[test]
fn changed_params_are_resent() {
    let rig = rig();
    rig.connection.connect(AuthContext::new("conn-1"));
    let book = key("btcusdt", StreamKind::OrderBook);
    rig.manager.subscribe(book.clone(), SubscriptionParams::with_limit(20));
    rig.manager.subscribe(book.clone(), SubscriptionParams::with_limit(50));

    let sent = rig.connector.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1],
        ClientCommand::Subscribe { key: book.clone(), params: SubscriptionParams::with_limit(50) }
    );
    assert_eq!(rig.manager.params(&book), Some(SubscriptionParams::with_limit(50)));
}

#[test]
fn subscriptions_made_offline_are_sent_on_connect_in_order() {
    let rig = rig();
    let keys = [
        key("btcusdt", StreamKind::OrderBook),
        key("ethusdt", StreamKind::Price),
        key("solusdt", StreamKind::Trades),
    ];
    for k in &keys {
        rig.manager.subscribe(k.clone(), SubscriptionParams::default());
    }
    assert!(rig.connector.sent().is_empty());
    assert!(keys.iter().all(|k| !rig.manager.is_active(k)));

    rig.connection.connect(AuthContext::new("conn-1"));

    assert_eq!(subscribed_keys(&rig.connector.sent()), keys.to_vec());
    assert!(keys.iter().all(|k| rig.manager.is_active(k)));
}

#[test]
fn reconnect_replays_in_registration_order() {
    let rig = rig();
    rig.connection.connect(AuthContext::new("conn-1"));
    let keys = [
        key("xrpusdt", StreamKind::Price),
        key("btcusdt", StreamKind::OrderBook),
        key("adausdt", StreamKind::Trades),
    ];
    for k in &keys {
        rig.manager.subscribe(k.clone(), SubscriptionParams::default());
    }
    rig.connector.take_sent();

    rig.connector.drop_connection("network gone");
    assert!(keys.iter().all(|k| !rig.manager.is_active(k)));
    rig.scheduler.advance(1_000);

    assert_eq!(subscribed_keys(&rig.connector.take_sent()), keys.to_vec());
}

#[test]
fn unsubscribed_streams_are_not_replayed() {
    let rig = rig();
    rig.connection.connect(AuthContext::new("conn-1"));
    let kept = key("btcusdt", StreamKind::Price);
    let gone = key("ethusdt", StreamKind::Price);
    rig.manager.subscribe(kept.clone(), SubscriptionParams::default());
    rig.manager.subscribe(gone.clone(), SubscriptionParams::default());
    rig.manager.unsubscribe(&gone);
    rig.connector.take_sent();

    rig.connector.drop_connection("network gone");
    rig.scheduler.advance(1_000);

    assert_eq!(subscribed_keys(&rig.connector.sent()), vec![kept]);
}

#[test]
fn suspend_unsubscribes_on_the_wire_but_keeps_records() {
    let rig = rig();
    rig.connection.connect(AuthContext::new("conn-1"));
    let book = key("btcusdt", StreamKind::OrderBook);
    rig.manager.subscribe(book.clone(), SubscriptionParams::with_limit(20));
    rig.connector.take_sent();

    rig.manager.suspend();

    assert_eq!(rig.connector.sent_names(), vec!["unsubscribe:orderbook"]);
    assert!(rig.manager.contains(&book));
    assert!(!rig.manager.is_active(&book));
    assert_eq!(rig.manager.replay(), 1);
    assert!(rig.manager.is_active(&book));
}
