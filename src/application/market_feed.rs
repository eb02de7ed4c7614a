//! One gateway connection plus its subscriptions and cache, shared by every
//! view that streams data for the same `connectionId`.

use super::connection::{ConnectionPorts, HandlerRegistration, StreamConnection};
use super::live_data_cache::{CacheEntry, LiveDataCache, LiveDelta, LivePayload};
use super::subscription_manager::SubscriptionManager;
use crate::config::StreamConfig;
use crate::domain::events::{EventDispatcher, MarketDataEvent, SharedDispatcher};
use crate::domain::logging::LogComponent;
use crate::domain::market_data::live::TradeList;
use crate::domain::market_data::{ConnectionId, Symbol};
use crate::domain::stream::{
    AuthContext, ConnectionState, ConnectionStatus, EventKind, GatewayEvent, StreamKind,
    SubscriptionKey, SubscriptionParams,
};
use crate::{log_debug, log_info, log_trace};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use strum::IntoEnumIterator;

const COMPONENT: LogComponent = LogComponent::Application("MarketFeed");

/// Connection state as the UI sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub error: Option<String>,
}

impl From<&ConnectionStatus> for FeedStatus {
    fn from(status: &ConnectionStatus) -> Self {
        Self {
            state: status.state,
            connected: status.is_connected(),
            error: status.error_message(),
        }
    }
}

type EntryListener = Rc<dyn Fn(&CacheEntry)>;
type StatusListener = Rc<dyn Fn(&FeedStatus)>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: HashMap<SubscriptionKey, Vec<(u64, EntryListener)>>,
    status: Vec<(u64, StatusListener)>,
}

impl Listeners {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn count(&self) -> usize {
        self.entries.values().map(Vec::len).sum::<usize>() + self.status.len()
    }
}

struct FeedInner {
    auth: AuthContext,
    connection: StreamConnection,
    manager: SubscriptionManager,
    cache: RefCell<LiveDataCache>,
    listeners: RefCell<Listeners>,
    registrations: RefCell<Vec<HandlerRegistration>>,
    config: StreamConfig,
    visible: Cell<bool>,
    last_state: Cell<ConnectionState>,
    dispatcher: SharedDispatcher,
}

impl FeedInner {
    fn connection_id(&self) -> &ConnectionId {
        &self.auth.connection_id
    }

    fn route(&self, event: &GatewayEvent) {
        let (Some(target), Some(kind)) = (event.target(), event.stream_kind()) else {
            return;
        };
        let key = target.key(self.connection_id(), kind);
        if !self.manager.contains(&key) {
            log_trace!(COMPONENT, "dropping {} for unsubscribed {}", event.kind(), key);
            return;
        }
        let applied = {
            let mut cache = self.cache.borrow_mut();
            let now = cache.now_millis();
            match event.clone() {
                GatewayEvent::OrderBookSnapshot { book, .. } => {
                    cache.apply_snapshot(&key, LivePayload::OrderBook(book), now)
                }
                GatewayEvent::OrderBookUpdate { delta, .. } => {
                    cache.apply_update(&key, LiveDelta::OrderBook(delta), now)
                }
                GatewayEvent::TradesSnapshot { trades, .. } => {
                    let list = TradeList::from_trades(trades, cache.limit(&key));
                    cache.apply_snapshot(&key, LivePayload::Trades(list), now)
                }
                GatewayEvent::TradesUpdate { trades, .. } => {
                    cache.apply_update(&key, LiveDelta::Trades(trades), now)
                }
                // both shapes merge field-wise in arrival order
                GatewayEvent::PriceUpdate { ticker, .. } | GatewayEvent::TickerUpdate { ticker, .. } => {
                    cache.apply_update(&key, LiveDelta::Price(ticker), now)
                }
                GatewayEvent::Error(_) | GatewayEvent::Pong => false,
            }
        };
        if applied {
            self.notify_entry(&key);
        }
    }

    fn notify_entry(&self, key: &SubscriptionKey) {
        let Some(entry) = self.cache.borrow().get(key).cloned() else {
            return;
        };
        let listeners: Vec<EntryListener> = self
            .listeners
            .borrow()
            .entries
            .get(key)
            .map(|list| list.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(&entry);
        }
    }

    fn status(&self) -> FeedStatus {
        FeedStatus::from(&self.connection.status())
    }

    fn notify_status(&self) {
        let status = self.status();
        let listeners: Vec<StatusListener> =
            self.listeners.borrow().status.iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&status);
        }
    }

    fn on_state(&self, state: ConnectionState) {
        let previous = self.last_state.replace(state);
        let connection_id = self.connection_id().clone();
        let dispatcher = self.dispatcher.borrow();
        dispatcher.publish_market_data_event(MarketDataEvent::ConnectionStateChanged {
            connection_id: connection_id.clone(),
            state,
        });
        match state {
            ConnectionState::Connected => {
                dispatcher.publish_market_data_event(
                    MarketDataEvent::MarketDataConnectionEstablished {
                        connection_id,
                        replayed: self.manager.len(),
                    },
                );
            }
            ConnectionState::Reconnecting | ConnectionState::Failed
                if previous == ConnectionState::Connected =>
            {
                let reason = self.status().error.unwrap_or_else(|| "transport closed".to_string());
                dispatcher.publish_market_data_event(MarketDataEvent::MarketDataConnectionLost {
                    connection_id,
                    reason,
                });
            }
            _ => {}
        }
        drop(dispatcher);
        self.notify_status();
    }

    fn ensure_connected(&self) {
        if !self.visible.get() {
            return;
        }
        if self.connection.state() == ConnectionState::Disconnected {
            self.connection.connect(self.auth.clone());
        }
    }

    fn release(&self, key: &SubscriptionKey, listener_id: u64) {
        {
            let mut listeners = self.listeners.borrow_mut();
            if let Some(list) = listeners.entries.get_mut(key) {
                list.retain(|(id, _)| *id != listener_id);
                if list.is_empty() {
                    listeners.entries.remove(key);
                }
            }
        }
        if self.manager.unsubscribe(key) {
            self.cache.borrow_mut().clear(key);
        }
        if self.manager.is_empty() && self.connection.state() != ConnectionState::Disconnected {
            log_info!(COMPONENT, "💤 No subscriptions left on {}, disconnecting", self.connection_id());
            self.connection.disconnect();
        }
    }
}

/// Shared handle; clones refer to the same connection.
#[derive(Clone)]
pub struct MarketFeed {
    inner: Rc<FeedInner>,
}

impl MarketFeed {
    pub fn new(
        connection_id: ConnectionId,
        config: StreamConfig,
        ports: ConnectionPorts,
        dispatcher: SharedDispatcher,
    ) -> Self {
        let clock = ports.clock.clone();
        let connection = StreamConnection::from_config(&config, ports);
        let manager = SubscriptionManager::new(&connection);
        let cache = LiveDataCache::new(
            clock,
            config.order_book_depth as usize,
            config.trade_limit as usize,
        );
        let inner = Rc::new(FeedInner {
            auth: AuthContext::new(connection_id),
            connection,
            manager,
            cache: RefCell::new(cache),
            listeners: RefCell::new(Listeners::default()),
            registrations: RefCell::new(Vec::new()),
            config,
            visible: Cell::new(true),
            last_state: Cell::new(ConnectionState::Disconnected),
            dispatcher,
        });

        let mut registrations = Vec::new();
        for kind in EventKind::iter() {
            let weak = Rc::downgrade(&inner);
            registrations.push(inner.connection.on_message(kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    match event {
                        GatewayEvent::Error(_) => inner.notify_status(),
                        GatewayEvent::Pong => {}
                        _ => inner.route(event),
                    }
                }
            }));
        }
        let weak: Weak<FeedInner> = Rc::downgrade(&inner);
        registrations.push(inner.connection.on_state_change(move |state| {
            if let Some(inner) = weak.upgrade() {
                inner.on_state(state);
            }
        }));
        *inner.registrations.borrow_mut() = registrations;

        Self { inner }
    }

    pub fn connection_id(&self) -> &ConnectionId {
        self.inner.connection_id()
    }

    /// Nothing subscribed, nobody watching status, socket closed and no handle
    /// held outside the store.
    pub(crate) fn is_idle(&self) -> bool {
        Rc::strong_count(&self.inner) == 1
            && self.inner.manager.is_empty()
            && self.inner.listeners.borrow().status.is_empty()
            && self.inner.connection.state() == ConnectionState::Disconnected
    }

    pub fn key(&self, symbol: impl Into<Symbol>, kind: StreamKind) -> SubscriptionKey {
        SubscriptionKey::new(self.connection_id().clone(), symbol, kind)
    }

    /// Default parameters for a stream kind.
    pub fn default_params(&self, kind: StreamKind) -> SubscriptionParams {
        match kind {
            StreamKind::OrderBook => SubscriptionParams::with_limit(self.inner.config.order_book_depth),
            StreamKind::Trades => SubscriptionParams::with_limit(self.inner.config.trade_limit),
            StreamKind::Price => SubscriptionParams::default(),
        }
    }

    /// Subscribe and receive every new value for `symbol`/`kind`. The
    /// subscription lives as long as the returned watch.
    pub fn watch(
        &self,
        symbol: impl Into<Symbol>,
        kind: StreamKind,
        params: SubscriptionParams,
        on_entry: impl Fn(&CacheEntry) + 'static,
    ) -> StreamWatch {
        let key = self.key(symbol, kind);
        let on_entry: EntryListener = Rc::new(on_entry);
        let id = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let id = listeners.allocate();
            listeners.entries.entry(key.clone()).or_default().push((id, on_entry.clone()));
            id
        };
        if let Some(limit) = params.limit.filter(|_| kind.takes_limit()) {
            self.inner.cache.borrow_mut().set_limit(&key, limit as usize);
        }
        log_debug!(COMPONENT, "watch {}", key);
        self.inner.manager.subscribe(key.clone(), params);
        self.inner.ensure_connected();

        let current = self.inner.cache.borrow().get(&key).cloned();
        if let Some(entry) = current {
            on_entry(&entry);
        }
        StreamWatch { feed: Rc::downgrade(&self.inner), key, id, released: false }
    }

    /// Observe connection status; called once immediately.
    pub fn watch_status(&self, on_status: impl Fn(&FeedStatus) + 'static) -> StatusWatch {
        let on_status: StatusListener = Rc::new(on_status);
        let id = {
            let mut listeners = self.inner.listeners.borrow_mut();
            let id = listeners.allocate();
            listeners.status.push((id, on_status.clone()));
            id
        };
        on_status(&self.inner.status());
        StatusWatch { feed: Rc::downgrade(&self.inner), id }
    }

    pub fn status(&self) -> FeedStatus {
        self.inner.status()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    pub fn entry(&self, key: &SubscriptionKey) -> Option<CacheEntry> {
        self.inner.cache.borrow().get(key).cloned()
    }

    pub fn is_stale(&self, key: &SubscriptionKey, threshold_ms: u64) -> bool {
        self.inner.cache.borrow().is_stale(key, threshold_ms)
    }

    /// Tab hidden: unsubscribe on the wire, drop the socket, keep the records.
    pub fn suspend(&self) {
        if !self.inner.visible.replace(false) {
            return;
        }
        log_info!(COMPONENT, "🙈 Suspending {}", self.connection_id());
        self.inner.manager.suspend();
        self.inner.connection.disconnect();
        let connection_id = self.connection_id().clone();
        self.inner.cache.borrow_mut().clear_connection(&connection_id);
    }

    /// Tab visible again: reconnect; the manager replays on connect.
    pub fn resume(&self) {
        if self.inner.visible.replace(true) {
            return;
        }
        log_info!(COMPONENT, "👀 Resuming {}", self.connection_id());
        if !self.inner.manager.is_empty() {
            self.inner.ensure_connected();
        }
    }

    /// Manual retry after `failed`.
    pub fn retry(&self) {
        if self.inner.visible.get() && !self.inner.manager.is_empty() {
            self.inner.connection.connect(self.inner.auth.clone());
        }
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.get()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.manager.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().count()
    }

    pub fn connection(&self) -> &StreamConnection {
        &self.inner.connection
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.manager
    }
}

/// Live subscription for one consumer. Dropping it unregisters the callback,
/// releases the consumer's interest and clears the cache entry once nobody is
/// left.
#[must_use = "dropping the watch unsubscribes"]
pub struct StreamWatch {
    feed: Weak<FeedInner>,
    key: SubscriptionKey,
    id: u64,
    released: bool,
}

impl StreamWatch {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn release(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(feed) = self.feed.upgrade() {
            feed.release(&self.key, self.id);
        }
    }
}

impl Drop for StreamWatch {
    fn drop(&mut self) {
        self.release_now();
    }
}

#[must_use = "dropping the watch stops status updates"]
pub struct StatusWatch {
    feed: Weak<FeedInner>,
    id: u64,
}

impl Drop for StatusWatch {
    fn drop(&mut self) {
        if let Some(feed) = self.feed.upgrade() {
            feed.listeners.borrow_mut().status.retain(|(id, _)| *id != self.id);
        }
    }
}
