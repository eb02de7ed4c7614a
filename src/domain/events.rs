use crate::domain::market_data::{ConnectionId, Symbol, TimeInterval};
use crate::domain::stream::ConnectionState;
use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

/// Base trait for all domain events
pub trait DomainEvent: Debug + Clone {
    fn event_type(&self) -> &'static str;
    fn timestamp(&self) -> u64 {
        use crate::domain::logging::get_time_provider;
        get_time_provider().current_timestamp()
    }
}

/// Events related to market data
#[derive(Debug, Clone, PartialEq)]
pub enum MarketDataEvent {
    ConnectionStateChanged {
        connection_id: ConnectionId,
        state: ConnectionState,
    },
    MarketDataConnectionEstablished {
        connection_id: ConnectionId,
        replayed: usize,
    },
    MarketDataConnectionLost {
        connection_id: ConnectionId,
        reason: String,
    },
    HistoricalDataLoaded {
        symbol: Symbol,
        interval: TimeInterval,
        candle_count: usize,
    },
    HistoricalDataFailed {
        symbol: Symbol,
        interval: TimeInterval,
        reason: String,
    },
    DataValidationFailed {
        symbol: Symbol,
        reason: String,
    },
}

impl DomainEvent for MarketDataEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MarketDataEvent::ConnectionStateChanged { .. } => "ConnectionStateChanged",
            MarketDataEvent::MarketDataConnectionEstablished { .. } => {
                "MarketDataConnectionEstablished"
            }
            MarketDataEvent::MarketDataConnectionLost { .. } => "MarketDataConnectionLost",
            MarketDataEvent::HistoricalDataLoaded { .. } => "HistoricalDataLoaded",
            MarketDataEvent::HistoricalDataFailed { .. } => "HistoricalDataFailed",
            MarketDataEvent::DataValidationFailed { .. } => "DataValidationFailed",
        }
    }
}

/// Event dispatcher for publishing events
pub trait EventDispatcher {
    fn publish_market_data_event(&self, event: MarketDataEvent);
}

/// Dispatcher shared by everything created from one store.
pub type SharedDispatcher = Rc<RefCell<InMemoryEventDispatcher>>;

/// Simple in-memory event dispatcher
#[derive(Default)]
pub struct InMemoryEventDispatcher {
    market_data_handlers: Vec<Box<dyn Fn(&MarketDataEvent)>>,
}

impl InMemoryEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_to_market_data_events<F>(&mut self, handler: F)
    where
        F: Fn(&MarketDataEvent) + 'static,
    {
        self.market_data_handlers.push(Box::new(handler));
    }

    pub fn handler_count(&self) -> usize {
        self.market_data_handlers.len()
    }
}

impl EventDispatcher for InMemoryEventDispatcher {
    fn publish_market_data_event(&self, event: MarketDataEvent) {
        for handler in &self.market_data_handlers {
            handler(&event);
        }
    }
}
