use crate::domain::logging::LogComponent;
use crate::domain::market_data::live::{
    OrderBook, OrderBookDelta, PriceTicker, Trade, TradeList,
};
use crate::domain::market_data::ConnectionId;
use crate::domain::stream::{StreamKind, SubscriptionKey};
use crate::log_warn;
use crate::time_utils::Clock;
use std::collections::HashMap;
use std::rc::Rc;

const COMPONENT: LogComponent = LogComponent::Application("LiveDataCache");

/// Latest full value of one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LivePayload {
    OrderBook(OrderBook),
    Trades(TradeList),
    Price(PriceTicker),
}

impl LivePayload {
    pub fn kind(&self) -> StreamKind {
        match self {
            LivePayload::OrderBook(_) => StreamKind::OrderBook,
            LivePayload::Trades(_) => StreamKind::Trades,
            LivePayload::Price(_) => StreamKind::Price,
        }
    }
}

/// Incremental message for one stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveDelta {
    OrderBook(OrderBookDelta),
    Trades(Vec<Trade>),
    Price(PriceTicker),
}

impl LiveDelta {
    pub fn kind(&self) -> StreamKind {
        match self {
            LiveDelta::OrderBook(_) => StreamKind::OrderBook,
            LiveDelta::Trades(_) => StreamKind::Trades,
            LiveDelta::Price(_) => StreamKind::Price,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: LivePayload,
    /// Epoch millis of the last applied message.
    pub last_update: u64,
    pub updates: u64,
}

impl CacheEntry {
    pub fn order_book(&self) -> Option<&OrderBook> {
        match &self.payload {
            LivePayload::OrderBook(book) => Some(book),
            _ => None,
        }
    }

    pub fn trades(&self) -> Option<&TradeList> {
        match &self.payload {
            LivePayload::Trades(trades) => Some(trades),
            _ => None,
        }
    }

    pub fn ticker(&self) -> Option<&PriceTicker> {
        match &self.payload {
            LivePayload::Price(ticker) => Some(ticker),
            _ => None,
        }
    }
}

/// Latest known value per subscription key.
///
/// Snapshots replace an entry; updates merge into it and never erase fields
/// the update does not carry. Messages are applied in the order they are
/// handed in.
pub struct LiveDataCache {
    entries: HashMap<SubscriptionKey, CacheEntry>,
    limits: HashMap<SubscriptionKey, usize>,
    default_depth: usize,
    default_trade_limit: usize,
    clock: Rc<dyn Clock>,
}

impl LiveDataCache {
    pub fn new(clock: Rc<dyn Clock>, default_depth: usize, default_trade_limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            limits: HashMap::new(),
            default_depth: default_depth.max(1),
            default_trade_limit: default_trade_limit.max(1),
            clock,
        }
    }

    /// Depth or list size used for `key`'s payload.
    pub fn set_limit(&mut self, key: &SubscriptionKey, limit: usize) {
        let limit = limit.max(1);
        self.limits.insert(key.clone(), limit);
        if let Some(entry) = self.entries.get_mut(key) {
            match &mut entry.payload {
                LivePayload::OrderBook(book) => {
                    book.bids.truncate(limit);
                    book.asks.truncate(limit);
                }
                LivePayload::Trades(trades) => trades.set_limit(limit),
                LivePayload::Price(_) => {}
            }
        }
    }

    pub fn limit(&self, key: &SubscriptionKey) -> usize {
        self.limits.get(key).copied().unwrap_or(match key.kind {
            StreamKind::Trades => self.default_trade_limit,
            _ => self.default_depth,
        })
    }

    /// Merge an incremental message. Returns `false` if it does not fit the key.
    pub fn apply_update(&mut self, key: &SubscriptionKey, delta: LiveDelta, timestamp: u64) -> bool {
        if delta.kind() != key.kind {
            log_warn!(COMPONENT, "⚠️ {} update routed to {}", delta.kind(), key);
            return false;
        }
        let limit = self.limit(key);
        match self.entries.get_mut(key) {
            Some(entry) => {
                match (&mut entry.payload, delta) {
                    (LivePayload::OrderBook(book), LiveDelta::OrderBook(delta)) => {
                        book.apply_delta(&delta, limit)
                    }
                    (LivePayload::Trades(trades), LiveDelta::Trades(incoming)) => {
                        trades.prepend(incoming)
                    }
                    (LivePayload::Price(ticker), LiveDelta::Price(update)) => ticker.merge(&update),
                    (payload, delta) => {
                        log_warn!(
                            COMPONENT,
                            "⚠️ {} entry cannot take a {} update",
                            payload.kind(),
                            delta.kind()
                        );
                        return false;
                    }
                }
                entry.last_update = timestamp;
                entry.updates += 1;
            }
            None => {
                let payload = match delta {
                    LiveDelta::OrderBook(delta) => {
                        LivePayload::OrderBook(OrderBook::from_levels(delta.bids, delta.asks, limit))
                    }
                    LiveDelta::Trades(trades) => {
                        let mut list = TradeList::new(limit);
                        list.prepend(trades);
                        LivePayload::Trades(list)
                    }
                    LiveDelta::Price(update) => {
                        let mut ticker = PriceTicker::default();
                        ticker.merge(&update);
                        LivePayload::Price(ticker)
                    }
                };
                self.entries
                    .insert(key.clone(), CacheEntry { payload, last_update: timestamp, updates: 1 });
            }
        }
        true
    }

    /// Replace the entry wholesale.
    pub fn apply_snapshot(
        &mut self,
        key: &SubscriptionKey,
        payload: LivePayload,
        timestamp: u64,
    ) -> bool {
        if payload.kind() != key.kind {
            log_warn!(COMPONENT, "⚠️ {} snapshot routed to {}", payload.kind(), key);
            return false;
        }
        let limit = self.limit(key);
        let payload = match payload {
            LivePayload::OrderBook(book) => {
                LivePayload::OrderBook(OrderBook::from_levels(book.bids, book.asks, limit))
            }
            LivePayload::Trades(mut trades) => {
                trades.set_limit(limit);
                LivePayload::Trades(trades)
            }
            price @ LivePayload::Price(_) => price,
        };
        let updates = self.entries.get(key).map(|entry| entry.updates + 1).unwrap_or(1);
        self.entries.insert(key.clone(), CacheEntry { payload, last_update: timestamp, updates });
        true
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// True when the entry is absent or older than `threshold_ms`.
    pub fn is_stale(&self, key: &SubscriptionKey, threshold_ms: u64) -> bool {
        match self.entries.get(key) {
            Some(entry) => self.clock.now_millis().saturating_sub(entry.last_update) > threshold_ms,
            None => true,
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    pub fn clear(&mut self, key: &SubscriptionKey) {
        self.entries.remove(key);
        self.limits.remove(key);
    }

    pub fn clear_connection(&mut self, connection_id: &ConnectionId) {
        self.entries.retain(|key, _| &key.connection_id != connection_id);
        self.limits.retain(|key, _| &key.connection_id != connection_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
