//! Gateway vocabulary shared by the connection, the subscription manager and
//! the cache: stream keys, connection states, typed client commands, decoded
//! server events and the transport seam.

use crate::domain::errors::{AppError, NetworkResult};
use crate::domain::market_data::live::{OrderBook, OrderBookDelta, PriceTicker, Trade};
use crate::domain::market_data::{ConnectionId, Symbol};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};

/// Logical stream multiplexed over one gateway connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    StrumDisplay,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    OrderBook,
    Trades,
    Price,
}

impl StreamKind {
    pub fn subscribe_event(&self) -> String {
        format!("subscribe:{}", self.as_ref())
    }

    pub fn unsubscribe_event(&self) -> String {
        format!("unsubscribe:{}", self.as_ref())
    }

    /// Whether the subscribe payload carries a `limit` field.
    pub fn takes_limit(&self) -> bool {
        !matches!(self, StreamKind::Price)
    }
}

/// `(connectionId, symbol, streamKind)`: identity of one subscription and one cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub connection_id: ConnectionId,
    pub symbol: Symbol,
    pub kind: StreamKind,
}

impl SubscriptionKey {
    pub fn new(connection_id: impl Into<ConnectionId>, symbol: impl Into<Symbol>, kind: StreamKind) -> Self {
        Self { connection_id: connection_id.into(), symbol: symbol.into(), kind }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.connection_id, self.symbol, self.kind)
    }
}

/// Desired subscription parameters (order-book depth or trade-list size).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionParams {
    pub limit: Option<u32>,
}

impl SubscriptionParams {
    pub fn with_limit(limit: u32) -> Self {
        Self { limit: Some(limit) }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, StrumDisplay, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until a manual `connect()`.
    Failed,
}

impl ConnectionState {
    /// States in which a transport is open or being opened.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }
}

/// Connection-level handshake parameters (`auth: { connectionId }`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthContext {
    #[serde(rename = "connectionId")]
    pub connection_id: ConnectionId,
}

impl AuthContext {
    pub fn new(connection_id: impl Into<ConnectionId>) -> Self {
        Self { connection_id: connection_id.into() }
    }
}

/// Client to gateway message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Subscribe { key: SubscriptionKey, params: SubscriptionParams },
    Unsubscribe { key: SubscriptionKey },
    Ping,
}

impl ClientCommand {
    pub fn event_name(&self) -> String {
        match self {
            ClientCommand::Subscribe { key, .. } => key.kind.subscribe_event(),
            ClientCommand::Unsubscribe { key } => key.kind.unsubscribe_event(),
            ClientCommand::Ping => "ping".to_string(),
        }
    }
}

/// Server to client event names, used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, StrumDisplay, EnumString, EnumIter, AsRefStr)]
pub enum EventKind {
    #[strum(serialize = "orderbook:snapshot")]
    OrderBookSnapshot,
    #[strum(serialize = "orderbook:update")]
    OrderBookUpdate,
    #[strum(serialize = "trades:snapshot")]
    TradesSnapshot,
    #[strum(serialize = "trades:update")]
    TradesUpdate,
    #[strum(serialize = "price:update")]
    PriceUpdate,
    #[strum(serialize = "ticker:update")]
    TickerUpdate,
    #[strum(serialize = "error")]
    Error,
    #[strum(serialize = "pong")]
    Pong,
}

/// Which stream a server event belongs to. The gateway may omit the
/// connection id, in which case the receiving connection's own id applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub connection_id: Option<ConnectionId>,
    pub symbol: Symbol,
}

impl StreamTarget {
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        Self { connection_id: None, symbol: symbol.into() }
    }

    pub fn key(&self, fallback: &ConnectionId, kind: StreamKind) -> SubscriptionKey {
        SubscriptionKey {
            connection_id: self.connection_id.clone().unwrap_or_else(|| fallback.clone()),
            symbol: self.symbol.clone(),
            kind,
        }
    }
}

/// Server event after validation and coercion at the wire boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    OrderBookSnapshot { target: StreamTarget, book: OrderBook },
    OrderBookUpdate { target: StreamTarget, delta: OrderBookDelta },
    TradesSnapshot { target: StreamTarget, trades: Vec<Trade> },
    TradesUpdate { target: StreamTarget, trades: Vec<Trade> },
    PriceUpdate { target: StreamTarget, ticker: PriceTicker },
    TickerUpdate { target: StreamTarget, ticker: PriceTicker },
    Error(AppError),
    Pong,
}

impl GatewayEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GatewayEvent::OrderBookSnapshot { .. } => EventKind::OrderBookSnapshot,
            GatewayEvent::OrderBookUpdate { .. } => EventKind::OrderBookUpdate,
            GatewayEvent::TradesSnapshot { .. } => EventKind::TradesSnapshot,
            GatewayEvent::TradesUpdate { .. } => EventKind::TradesUpdate,
            GatewayEvent::PriceUpdate { .. } => EventKind::PriceUpdate,
            GatewayEvent::TickerUpdate { .. } => EventKind::TickerUpdate,
            GatewayEvent::Error(_) => EventKind::Error,
            GatewayEvent::Pong => EventKind::Pong,
        }
    }

    pub fn target(&self) -> Option<&StreamTarget> {
        match self {
            GatewayEvent::OrderBookSnapshot { target, .. }
            | GatewayEvent::OrderBookUpdate { target, .. }
            | GatewayEvent::TradesSnapshot { target, .. }
            | GatewayEvent::TradesUpdate { target, .. }
            | GatewayEvent::PriceUpdate { target, .. }
            | GatewayEvent::TickerUpdate { target, .. } => Some(target),
            GatewayEvent::Error(_) | GatewayEvent::Pong => None,
        }
    }

    pub fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            GatewayEvent::OrderBookSnapshot { .. } | GatewayEvent::OrderBookUpdate { .. } => {
                Some(StreamKind::OrderBook)
            }
            GatewayEvent::TradesSnapshot { .. } | GatewayEvent::TradesUpdate { .. } => {
                Some(StreamKind::Trades)
            }
            GatewayEvent::PriceUpdate { .. } | GatewayEvent::TickerUpdate { .. } => {
                Some(StreamKind::Price)
            }
            GatewayEvent::Error(_) | GatewayEvent::Pong => None,
        }
    }
}

/// Bounded exponential backoff: `base * 2^attempt`, capped at `ceiling`,
/// giving up after `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub ceiling_ms: u64,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (zero-based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<u64> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Some(self.base_ms.saturating_mul(factor).min(self.ceiling_ms))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { base_ms: 1_000, ceiling_ms: 30_000, max_attempts: 5 }
    }
}

/// Snapshot of a connection for UI indicators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub attempts: u32,
    pub last_error: Option<AppError>,
    pub last_pong: Option<u64>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn error_message(&self) -> Option<String> {
        self.last_error.as_ref().map(AppError::user_message)
    }
}

/// What a transport reports back to its owning connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Handshake finished; commands can flow.
    Opened,
    Message(GatewayEvent),
    /// Socket closed by the peer or the network.
    Closed { reason: String },
    Error(String),
}

/// Callback a transport uses to report events. Cheap to clone.
#[derive(Clone)]
pub struct TransportSink(Rc<dyn Fn(TransportEvent)>);

impl TransportSink {
    pub fn new(f: impl Fn(TransportEvent) + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn emit(&self, event: TransportEvent) {
        (self.0)(event)
    }
}

impl std::fmt::Debug for TransportSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransportSink")
    }
}

/// Everything a transport needs to open one socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub namespace: String,
    pub auth: AuthContext,
}

/// Exclusively owned by one connection.
pub trait TransportHandle {
    fn send(&mut self, command: &ClientCommand) -> NetworkResult<()>;
    fn close(&mut self);
}

/// Opens transports. Failures to even start opening are returned; anything
/// later arrives through the sink.
pub trait Connector {
    fn open(
        &self,
        request: &ConnectRequest,
        sink: TransportSink,
    ) -> NetworkResult<Box<dyn TransportHandle>>;
}
