use super::candlestick_session::{CandlestickSession, SessionSettings, WeakCandlestickSession};
use super::connection::ConnectionPorts;
use super::historical_loader::HistoricalSeriesLoader;
use super::market_feed::MarketFeed;
use crate::config::AppConfig;
use crate::domain::chart::SeriesUpdate;
use crate::domain::errors::{AppError, NetworkResult};
use crate::domain::events::{InMemoryEventDispatcher, SharedDispatcher};
use crate::domain::logging::{LogComponent, get_logger};
use crate::domain::market_data::{
    BarSource, ConnectionId, MarketQuery, MarketSnapshotSource, MarketSummary, Symbol,
    TimeInterval, Timeframe,
};
use crate::domain::stream::Connector;
use crate::{log_debug, log_info};
use crate::time_utils::{Clock, Scheduler};
use futures::future::join_all;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

const COMPONENT: LogComponent = LogComponent::Application("MarketStore");

/// Everything the store talks to outside the process.
#[derive(Clone)]
pub struct StoreDeps {
    pub connector: Rc<dyn Connector>,
    pub scheduler: Rc<dyn Scheduler>,
    pub clock: Rc<dyn Clock>,
    pub bars: Rc<dyn BarSource>,
    pub markets: Option<Rc<dyn MarketSnapshotSource>>,
}

struct StoreInner {
    config: AppConfig,
    ports: ConnectionPorts,
    loader: Rc<HistoricalSeriesLoader>,
    markets: Option<Rc<dyn MarketSnapshotSource>>,
    feeds: RefCell<HashMap<ConnectionId, MarketFeed>>,
    sessions: RefCell<Vec<WeakCandlestickSession>>,
    dispatcher: SharedDispatcher,
    visible: Cell<bool>,
}

/// Application-root state container: one feed per connection id, the shared
/// history loader and the event dispatcher. Created once and handed down.
#[derive(Clone)]
pub struct MarketStore {
    inner: Rc<StoreInner>,
}

impl MarketStore {
    pub fn new(config: AppConfig, deps: StoreDeps) -> Self {
        let dispatcher: SharedDispatcher = Rc::new(RefCell::new(InMemoryEventDispatcher::new()));
        let loader = HistoricalSeriesLoader::new(deps.bars, config.history.clone())
            .with_dispatcher(dispatcher.clone());
        get_logger().info(COMPONENT, "🏪 Market store created");
        Self {
            inner: Rc::new(StoreInner {
                ports: ConnectionPorts {
                    connector: deps.connector,
                    scheduler: deps.scheduler,
                    clock: deps.clock,
                },
                loader: Rc::new(loader),
                markets: deps.markets,
                feeds: RefCell::new(HashMap::new()),
                sessions: RefCell::new(Vec::new()),
                dispatcher,
                visible: Cell::new(true),
                config,
            }),
        }
    }

    /// Feed for `connection_id`, created on first use.
    pub fn feed(&self, connection_id: impl Into<ConnectionId>) -> MarketFeed {
        let connection_id = connection_id.into();
        self.prune_idle_feeds();
        if let Some(feed) = self.inner.feeds.borrow().get(&connection_id) {
            return feed.clone();
        }
        log_info!(COMPONENT, "🔌 New feed for {}", connection_id);
        let feed = MarketFeed::new(
            connection_id.clone(),
            self.inner.config.stream.clone(),
            self.inner.ports.clone(),
            self.inner.dispatcher.clone(),
        );
        if !self.inner.visible.get() {
            feed.suspend();
        }
        self.inner.feeds.borrow_mut().insert(connection_id, feed.clone());
        feed
    }

    /// Drop feeds nobody uses any more. Returns how many were evicted.
    pub fn prune_idle_feeds(&self) -> usize {
        let mut feeds = self.inner.feeds.borrow_mut();
        let before = feeds.len();
        feeds.retain(|_, feed| !feed.is_idle());
        let evicted = before - feeds.len();
        if evicted > 0 {
            log_debug!(COMPONENT, "evicted {} idle feeds", evicted);
        }
        evicted
    }

    /// New candlestick pipeline for one view. Call `start` on the result.
    pub fn candlestick_session(
        &self,
        connection_id: impl Into<ConnectionId>,
        symbol: impl Into<Symbol>,
        interval: TimeInterval,
        timeframe: Timeframe,
        on_update: impl Fn(&SeriesUpdate) + 'static,
    ) -> CandlestickSession {
        let session = CandlestickSession::new(
            self.feed(connection_id),
            self.inner.loader.clone(),
            self.inner.ports.clock.clone(),
            symbol.into(),
            SessionSettings::new(interval, timeframe, &self.inner.config.chart),
            on_update,
        );
        let mut sessions = self.inner.sessions.borrow_mut();
        sessions.retain(|weak| weak.upgrade().is_some_and(|s| !s.is_disposed()));
        sessions.push(session.downgrade());
        session
    }

    /// Tab visibility. Hiding releases live streams everywhere; showing
    /// reconnects, replays subscriptions and backfills every live chart.
    pub async fn set_visible(&self, visible: bool) {
        if self.inner.visible.replace(visible) == visible {
            return;
        }
        let sessions: Vec<CandlestickSession> = self
            .inner
            .sessions
            .borrow()
            .iter()
            .filter_map(WeakCandlestickSession::upgrade)
            .filter(|session| !session.is_disposed())
            .collect();
        let feeds: Vec<MarketFeed> = self.inner.feeds.borrow().values().cloned().collect();

        if visible {
            log_info!(COMPONENT, "👀 Tab visible: resuming {} feeds", feeds.len());
            for feed in &feeds {
                feed.resume();
            }
            join_all(sessions.iter().map(|session| session.resume())).await;
        } else {
            log_info!(COMPONENT, "🙈 Tab hidden: suspending {} feeds", feeds.len());
            for session in &sessions {
                session.suspend();
            }
            for feed in &feeds {
                feed.suspend();
            }
        }
    }

    pub async fn fetch_markets(&self, ids: Vec<String>, per_page: u32) -> NetworkResult<Vec<MarketSummary>> {
        let source = self
            .inner
            .markets
            .clone()
            .ok_or_else(|| AppError::NetworkError("no market listing source configured".into()))?;
        source.fetch_markets(&MarketQuery { ids, per_page }).await
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.get()
    }

    pub fn dispatcher(&self) -> SharedDispatcher {
        self.inner.dispatcher.clone()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn loader(&self) -> Rc<HistoricalSeriesLoader> {
        self.inner.loader.clone()
    }

    pub fn clock(&self) -> Rc<dyn Clock> {
        self.inner.ports.clock.clone()
    }

    pub fn scheduler(&self) -> Rc<dyn Scheduler> {
        self.inner.ports.scheduler.clone()
    }

    pub fn feed_count(&self) -> usize {
        self.inner.feeds.borrow().len()
    }
}
