//! Gateway wire format.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": <payload>}`.
//! Incoming payloads are coerced leniently: numbers may arrive as strings,
//! order-book levels as `[price, qty]` pairs or `{price, quantity}` objects.

use crate::domain::errors::{AppError, NetworkResult};
use crate::domain::logging::LogComponent;
use crate::domain::market_data::live::{
    OrderBook, OrderBookDelta, PriceLevel, PriceTicker, Trade, TradeSide,
};
use crate::domain::market_data::{ConnectionId, Timestamp};
use crate::domain::stream::{AuthContext, ClientCommand, EventKind, GatewayEvent, StreamTarget};
use crate::log_debug;
use crate::time_utils::normalize_epoch_seconds;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::str::FromStr;

const COMPONENT: LogComponent = LogComponent::Infrastructure("GatewayDto");

/// Event name of the handshake frame.
pub const AUTH_EVENT: &str = "auth";

#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

fn envelope(event: &str, data: Value) -> NetworkResult<String> {
    Ok(serde_json::to_string(&Envelope { event: event.to_string(), data })?)
}

/// Handshake sent first on every new socket.
pub fn encode_auth(auth: &AuthContext) -> NetworkResult<String> {
    envelope(AUTH_EVENT, json!({ "connectionId": auth.connection_id.value() }))
}

pub fn encode_command(command: &ClientCommand) -> NetworkResult<String> {
    let data = match command {
        ClientCommand::Subscribe { key, params } => {
            let mut data = json!({
                "connectionId": key.connection_id.value(),
                "symbol": key.symbol.value(),
            });
            if let (Some(limit), true) = (params.limit, key.kind.takes_limit()) {
                data["limit"] = json!(limit);
            }
            data
        }
        ClientCommand::Unsubscribe { key } => json!({
            "connectionId": key.connection_id.value(),
            "symbol": key.symbol.value(),
        }),
        ClientCommand::Ping => Value::Null,
    };
    envelope(&command.event_name(), data)
}

/// Decode one text frame. Unknown event names yield `Ok(None)`.
pub fn decode_event(text: &str) -> NetworkResult<Option<GatewayEvent>> {
    let Envelope { event, data } = serde_json::from_str(text)?;
    let Ok(kind) = EventKind::from_str(&event) else {
        log_debug!(COMPONENT, "ignoring unknown event '{}'", event);
        return Ok(None);
    };
    let empty = Map::new();
    let payload = data.as_object().unwrap_or(&empty);

    let event = match kind {
        EventKind::Pong => GatewayEvent::Pong,
        EventKind::Error => GatewayEvent::Error(error_payload(&data)),
        EventKind::OrderBookSnapshot => GatewayEvent::OrderBookSnapshot {
            target: target(payload)?,
            book: OrderBook { bids: levels(payload.get("bids")), asks: levels(payload.get("asks")) },
        },
        EventKind::OrderBookUpdate => GatewayEvent::OrderBookUpdate {
            target: target(payload)?,
            delta: OrderBookDelta {
                bids: levels(payload.get("bids")),
                asks: levels(payload.get("asks")),
            },
        },
        EventKind::TradesSnapshot => {
            GatewayEvent::TradesSnapshot { target: target(payload)?, trades: trades(payload) }
        }
        EventKind::TradesUpdate => {
            GatewayEvent::TradesUpdate { target: target(payload)?, trades: trades(payload) }
        }
        EventKind::PriceUpdate => {
            GatewayEvent::PriceUpdate { target: target(payload)?, ticker: ticker(payload) }
        }
        EventKind::TickerUpdate => {
            GatewayEvent::TickerUpdate { target: target(payload)?, ticker: ticker(payload) }
        }
    };
    Ok(Some(event))
}

fn number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// First of `names` present in `object`, as a number.
fn field(object: &Map<String, Value>, names: &[&str]) -> Option<f64> {
    names.iter().find_map(|name| object.get(*name).and_then(number))
}

fn target(payload: &Map<String, Value>) -> NetworkResult<StreamTarget> {
    let symbol = payload
        .get("symbol")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::ParseError("payload without symbol".into()))?;
    let mut target = StreamTarget::new(symbol);
    target.connection_id =
        payload.get("connectionId").and_then(text).map(ConnectionId::from);
    Ok(target)
}

fn level(value: &Value) -> Option<PriceLevel> {
    match value {
        Value::Array(pair) => {
            Some(PriceLevel::new(number(pair.first()?)?, number(pair.get(1)?)?))
        }
        Value::Object(object) => Some(PriceLevel::new(
            field(object, &["price", "p"])?,
            field(object, &["quantity", "qty", "amount", "size", "q"])?,
        )),
        _ => None,
    }
}

/// Malformed levels are skipped.
fn levels(value: Option<&Value>) -> Vec<PriceLevel> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(level).collect())
        .unwrap_or_default()
}

fn trade(value: &Value) -> Option<Trade> {
    let object = value.as_object()?;
    let price = field(object, &["price", "p"])?;
    let quantity = field(object, &["quantity", "qty", "amount", "size", "q"])?;
    let timestamp = field(object, &["timestamp", "time", "ts", "T"])
        .and_then(normalize_epoch_seconds)
        .unwrap_or(Timestamp::from_secs(0));
    let side = object
        .get("side")
        .and_then(Value::as_str)
        .and_then(|side| match side.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(TradeSide::Buy),
            "sell" | "ask" => Some(TradeSide::Sell),
            _ => None,
        });
    Some(Trade { id: object.get("id").and_then(text), price, quantity, side, timestamp })
}

fn trades(payload: &Map<String, Value>) -> Vec<Trade> {
    match (payload.get("trades"), payload.get("trade")) {
        (Some(Value::Array(items)), _) => items.iter().filter_map(trade).collect(),
        (_, Some(single)) => trade(single).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn ticker(payload: &Map<String, Value>) -> PriceTicker {
    PriceTicker {
        price: field(payload, &["price", "lastPrice", "last"]),
        change_24h: field(payload, &["change24h", "priceChange", "change"]),
        change_percent_24h: field(
            payload,
            &["changePercent24h", "priceChangePercent", "changePercent"],
        ),
        high_24h: field(payload, &["high24h", "highPrice", "high"]),
        low_24h: field(payload, &["low24h", "lowPrice", "low"]),
        volume_24h: field(payload, &["volume24h", "volume"]),
    }
}

fn error_payload(data: &Value) -> AppError {
    match data {
        Value::String(message) => AppError::gateway(message.clone(), None),
        Value::Object(object) => AppError::gateway(
            object
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown gateway error")
                .to_string(),
            object.get("code").and_then(text),
        ),
        _ => AppError::gateway("unknown gateway error", None),
    }
}
