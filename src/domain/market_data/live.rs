//! Live stream payloads: order book ladders, recent trades and price tickers.

use super::value_objects::Timestamp;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum::{AsRefStr, Display as StrumDisplay};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub quantity: f64,
}

impl PriceLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }

    fn is_usable(&self) -> bool {
        self.price.is_finite() && self.quantity.is_finite() && self.price > 0.0
    }
}

/// Changed levels; a zero quantity removes the level.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBookDelta {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Bid ladder descending, ask ladder ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl OrderBook {
    pub fn from_levels(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, depth: usize) -> Self {
        let mut book = Self::default();
        book.apply_delta(&OrderBookDelta { bids, asks }, depth);
        book
    }

    /// Upsert the delta's levels, drop zero-quantity levels and truncate to `depth`.
    pub fn apply_delta(&mut self, delta: &OrderBookDelta, depth: usize) {
        merge_side(&mut self.bids, &delta.bids, |a, b| b.total_cmp(&a));
        merge_side(&mut self.asks, &delta.asks, |a, b| a.total_cmp(&b));
        if depth > 0 {
            self.bids.truncate(depth);
            self.asks.truncate(depth);
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    pub fn mid_price(&self) -> Option<f64> {
        Some((self.best_ask()?.price + self.best_bid()?.price) / 2.0)
    }
}

fn merge_side(
    side: &mut Vec<PriceLevel>,
    changes: &[PriceLevel],
    order: impl Fn(f64, f64) -> Ordering,
) {
    for change in changes.iter().filter(|level| level.is_usable()) {
        match side.binary_search_by(|level| order(level.price, change.price)) {
            Ok(pos) if change.quantity <= 0.0 => {
                side.remove(pos);
            }
            Ok(pos) => side[pos].quantity = change.quantity,
            Err(_) if change.quantity <= 0.0 => {}
            Err(pos) => side.insert(pos, *change),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, AsRefStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<String>,
    pub price: f64,
    pub quantity: f64,
    pub side: Option<TradeSide>,
    pub timestamp: Timestamp,
}

/// Bounded list of recent trades, newest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeList {
    trades: Vec<Trade>,
    limit: usize,
}

impl TradeList {
    pub fn new(limit: usize) -> Self {
        Self { trades: Vec::new(), limit: limit.max(1) }
    }

    pub fn from_trades(trades: Vec<Trade>, limit: usize) -> Self {
        let mut list = Self::new(limit);
        list.replace(trades);
        list
    }

    /// Snapshot semantics: the given trades become the whole list.
    pub fn replace(&mut self, mut trades: Vec<Trade>) {
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        self.trades = trades;
        self.trades.truncate(self.limit);
    }

    /// Incremental semantics: prepend unseen trades, keep newest first.
    pub fn prepend(&mut self, incoming: Vec<Trade>) {
        let mut fresh: Vec<Trade> = incoming
            .into_iter()
            .filter(|trade| match &trade.id {
                Some(id) => !self.trades.iter().any(|t| t.id.as_deref() == Some(id)),
                None => true,
            })
            .collect();
        fresh.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        fresh.append(&mut self.trades);
        self.trades = fresh;
        self.trades.truncate(self.limit);
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        self.trades.truncate(self.limit);
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn latest(&self) -> Option<&Trade> {
        self.trades.first()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Price scalar plus 24h statistics. Every field is optional so the same type
/// carries both full tickers and partial updates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceTicker {
    pub price: Option<f64>,
    pub change_24h: Option<f64>,
    pub change_percent_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub volume_24h: Option<f64>,
}

impl PriceTicker {
    pub fn with_price(price: f64) -> Self {
        Self { price: Some(price), ..Self::default() }
    }

    /// Field-wise merge: fields present in `update` win, absent fields keep
    /// their previous value.
    pub fn merge(&mut self, update: &PriceTicker) {
        fn take(slot: &mut Option<f64>, incoming: Option<f64>) {
            if let Some(value) = incoming.filter(|v| v.is_finite()) {
                *slot = Some(value);
            }
        }
        take(&mut self.price, update.price);
        take(&mut self.change_24h, update.change_24h);
        take(&mut self.change_percent_24h, update.change_percent_24h);
        take(&mut self.high_24h, update.high_24h);
        take(&mut self.low_24h, update.low_24h);
        take(&mut self.volume_24h, update.volume_24h);
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Row of the `/markets` listing snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketSummary {
    pub id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub price_change_24h: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lvl(price: f64, quantity: f64) -> PriceLevel {
        PriceLevel::new(price, quantity)
    }

    #[test]
    fn delta_upserts_and_removes_levels() {
        let mut book = OrderBook::from_levels(
            vec![lvl(99.0, 1.0), lvl(100.0, 2.0)],
            vec![lvl(102.0, 1.0), lvl(101.0, 3.0)],
            10,
        );
        assert_eq!(book.best_bid(), Some(lvl(100.0, 2.0)));
        assert_eq!(book.best_ask(), Some(lvl(101.0, 3.0)));

        book.apply_delta(
            &OrderBookDelta {
                bids: vec![lvl(100.0, 0.0), lvl(99.5, 4.0)],
                asks: vec![lvl(101.0, 5.0)],
            },
            10,
        );
        assert_eq!(book.bids, vec![lvl(99.5, 4.0), lvl(99.0, 1.0)]);
        assert_eq!(book.asks, vec![lvl(101.0, 5.0), lvl(102.0, 1.0)]);
        assert_eq!(book.spread(), Some(1.5));
    }

    #[test]
    fn depth_truncates_each_side() {
        let book = OrderBook::from_levels(
            vec![lvl(1.0, 1.0), lvl(2.0, 1.0), lvl(3.0, 1.0)],
            vec![lvl(4.0, 1.0), lvl(5.0, 1.0)],
            2,
        );
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.bids[0].price, 3.0);
        assert_eq!(book.asks.len(), 2);
    }

    #[test]
    fn trade_updates_prepend_and_dedup_by_id() {
        let trade = |id: &str, ts: u64| Trade {
            id: Some(id.to_string()),
            price: 1.0,
            quantity: 1.0,
            side: Some(TradeSide::Buy),
            timestamp: Timestamp::from_secs(ts),
        };
        let mut list = TradeList::from_trades(vec![trade("a", 1), trade("b", 2)], 3);
        list.prepend(vec![trade("b", 2), trade("c", 3), trade("d", 4)]);
        let ids: Vec<&str> = list.trades().iter().filter_map(|t| t.id.as_deref()).collect();
        assert_eq!(ids, vec!["d", "c", "b"]);
    }

    #[test]
    fn ticker_merge_keeps_absent_fields() {
        let mut ticker = PriceTicker { price: Some(100.0), high_24h: Some(110.0), ..Default::default() };
        ticker.merge(&PriceTicker::with_price(105.0));
        assert_eq!(ticker.price, Some(105.0));
        assert_eq!(ticker.high_24h, Some(110.0));
    }
}
