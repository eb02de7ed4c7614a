//! In-memory doubles for the ports: clock, timers, gateway, REST, chart
//! library and container. Used by unit tests, integration tests and demos.

use crate::domain::chart::{ChartBackend, ChartContainer, ChartInstance, ListenerHandle};
use crate::domain::errors::{AppError, ChartResult, NetworkResult};
use crate::domain::market_data::indicator_engine::{DerivedPoint, DerivedSeries, VolumeBar};
use crate::domain::market_data::{
    BarQuery, BarSource, Candle, MarketQuery, MarketSnapshotSource, MarketSummary, RawBar,
    Timestamp,
};
use crate::domain::stream::{
    ClientCommand, ConnectRequest, Connector, GatewayEvent, TransportEvent, TransportHandle,
    TransportSink,
};
use crate::time_utils::{Clock, Scheduler, TimerHandle};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

// ---------------------------------------------------------------------------
// Clock

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(now_millis: u64) -> Self {
        Self { now: Rc::new(Cell::new(now_millis)) }
    }

    pub fn advance(&self, millis: u64) {
        self.now.set(self.now.get() + millis);
    }

    pub fn set(&self, now_millis: u64) {
        self.now.set(now_millis);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.get()
    }
}

// ---------------------------------------------------------------------------
// Scheduler

enum TimerTask {
    Once(Box<dyn FnOnce()>),
    Repeat { period: u64, callback: Rc<RefCell<Box<dyn FnMut()>>> },
}

struct PendingTimer {
    id: u64,
    due: u64,
    task: TimerTask,
}

#[derive(Default)]
struct SchedulerState {
    now: u64,
    next_id: u64,
    timers: Vec<PendingTimer>,
}

struct CancelOnDrop {
    state: Weak<RefCell<SchedulerState>>,
    id: u64,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            if let Ok(mut state) = state.try_borrow_mut() {
                state.timers.retain(|timer| timer.id != self.id);
            }
        }
    }
}

/// Timer queue driven by [`advance`](Self::advance). Optionally moves a
/// [`ManualClock`] along with it.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<SchedulerState>>,
    clock: Option<ManualClock>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        let state = SchedulerState { now: clock.now_millis(), ..SchedulerState::default() };
        Self { state: Rc::new(RefCell::new(state)), clock: Some(clock) }
    }

    fn schedule(&self, delay: u64, task: TimerTask) -> TimerHandle {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = state.next_id;
        let due = state.now + delay;
        state.timers.push(PendingTimer { id, due, task });
        TimerHandle::new(CancelOnDrop { state: Rc::downgrade(&self.state), id })
    }

    /// Fire every timer due within the next `millis`, in due order.
    pub fn advance(&self, millis: u64) {
        let target = self.state.borrow().now + millis;
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                let Some(position) = state
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.id))
                    .map(|(position, _)| position)
                else {
                    break;
                };
                let due = state.timers[position].due;
                state.now = due;
                let run: Box<dyn FnOnce()> =
                    if matches!(state.timers[position].task, TimerTask::Once(_)) {
                        match state.timers.remove(position).task {
                            TimerTask::Once(callback) => callback,
                            TimerTask::Repeat { .. } => Box::new(|| {}),
                        }
                    } else {
                        let timer = &mut state.timers[position];
                        let TimerTask::Repeat { period, callback } = &timer.task else {
                            break;
                        };
                        let callback = callback.clone();
                        timer.due = due + (*period).max(1);
                        Box::new(move || (callback.borrow_mut())())
                    };
                (due, run)
            };
            let (due, run) = next;
            self.sync_clock(due);
            run();
        }
        self.state.borrow_mut().now = target;
        self.sync_clock(target);
    }

    fn sync_clock(&self, now: u64) {
        if let Some(clock) = &self.clock {
            clock.set(now);
        }
    }

    /// Timers scheduled and not yet cancelled (intervals stay counted).
    pub fn active_count(&self) -> usize {
        self.state.borrow().timers.len()
    }

    pub fn now(&self) -> u64 {
        self.state.borrow().now
    }
}

impl Scheduler for ManualScheduler {
    fn timeout(&self, delay_ms: u32, callback: Box<dyn FnOnce()>) -> TimerHandle {
        self.schedule(u64::from(delay_ms), TimerTask::Once(callback))
    }

    fn interval(&self, period_ms: u32, callback: Box<dyn FnMut()>) -> TimerHandle {
        let period = u64::from(period_ms);
        self.schedule(period, TimerTask::Repeat { period, callback: Rc::new(RefCell::new(callback)) })
    }
}

// ---------------------------------------------------------------------------
// Gateway

#[derive(Default)]
struct ConnectorState {
    manual_open: bool,
    fail_opens: u32,
    requests: Vec<ConnectRequest>,
    sinks: Vec<TransportSink>,
    sent: Vec<ClientCommand>,
    live: usize,
}

/// Connector whose sockets live in memory. Opens succeed immediately and
/// report `Opened` unless configured otherwise; tests push server events with
/// [`deliver`](Self::deliver).
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Rc<RefCell<ConnectorState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens stay pending until [`open_current`](Self::open_current).
    pub fn manual() -> Self {
        let connector = Self::default();
        connector.state.borrow_mut().manual_open = true;
        connector
    }

    /// Make the next `count` open attempts fail outright.
    pub fn fail_opens(&self, count: u32) {
        self.state.borrow_mut().fail_opens = count;
    }

    fn current_sink(&self) -> Option<TransportSink> {
        self.state.borrow().sinks.last().cloned()
    }

    fn push(&self, event: TransportEvent) {
        if let Some(sink) = self.current_sink() {
            sink.emit(event);
        }
    }

    pub fn open_current(&self) {
        self.push(TransportEvent::Opened);
    }

    pub fn deliver(&self, event: GatewayEvent) {
        self.push(TransportEvent::Message(event));
    }

    /// Simulate the network dropping the socket.
    pub fn drop_connection(&self, reason: &str) {
        self.push(TransportEvent::Closed { reason: reason.to_string() });
    }

    pub fn transport_error(&self, message: &str) {
        self.push(TransportEvent::Error(message.to_string()));
    }

    pub fn open_count(&self) -> usize {
        self.state.borrow().requests.len()
    }

    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.state.borrow().requests.clone()
    }

    pub fn sent(&self) -> Vec<ClientCommand> {
        self.state.borrow().sent.clone()
    }

    /// Wire event names of every command sent so far.
    pub fn sent_names(&self) -> Vec<String> {
        self.state.borrow().sent.iter().map(ClientCommand::event_name).collect()
    }

    pub fn take_sent(&self) -> Vec<ClientCommand> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    /// Transports opened and not yet closed.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().live
    }
}

impl Connector for FakeConnector {
    fn open(
        &self,
        request: &ConnectRequest,
        sink: TransportSink,
    ) -> NetworkResult<Box<dyn TransportHandle>> {
        let auto_open = {
            let mut state = self.state.borrow_mut();
            state.requests.push(request.clone());
            if state.fail_opens > 0 {
                state.fail_opens -= 1;
                return Err(AppError::NetworkError("connection refused".into()));
            }
            state.sinks.push(sink.clone());
            state.live += 1;
            !state.manual_open
        };
        if auto_open {
            sink.emit(TransportEvent::Opened);
        }
        Ok(Box::new(FakeTransport { state: self.state.clone(), closed: false }))
    }
}

struct FakeTransport {
    state: Rc<RefCell<ConnectorState>>,
    closed: bool,
}

impl FakeTransport {
    fn close_once(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            let mut state = self.state.borrow_mut();
            state.live = state.live.saturating_sub(1);
        }
    }
}

impl TransportHandle for FakeTransport {
    fn send(&mut self, command: &ClientCommand) -> NetworkResult<()> {
        if self.closed {
            return Err(AppError::NetworkError("transport closed".into()));
        }
        self.state.borrow_mut().sent.push(command.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.close_once();
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.close_once();
    }
}

// ---------------------------------------------------------------------------
// REST

/// Bar source answering every query with the same bars (or the same error).
pub struct StaticBarSource {
    response: RefCell<NetworkResult<Vec<RawBar>>>,
    queries: RefCell<Vec<BarQuery>>,
}

impl StaticBarSource {
    pub fn new(bars: Vec<RawBar>) -> Self {
        Self { response: RefCell::new(Ok(bars)), queries: RefCell::new(Vec::new()) }
    }

    pub fn from_candles(candles: &[Candle]) -> Self {
        Self::new(candles.iter().map(raw_bar).collect())
    }

    /// Every request fails with `status`.
    pub fn failing(status: u16) -> Self {
        Self { response: RefCell::new(Err(AppError::HttpStatus(status))), queries: RefCell::new(Vec::new()) }
    }

    pub fn set_bars(&self, bars: Vec<RawBar>) {
        *self.response.borrow_mut() = Ok(bars);
    }

    pub fn set_error(&self, error: AppError) {
        *self.response.borrow_mut() = Err(error);
    }

    pub fn queries(&self) -> Vec<BarQuery> {
        self.queries.borrow().clone()
    }
}

impl BarSource for StaticBarSource {
    fn fetch_bars<'a>(&'a self, query: &'a BarQuery) -> LocalBoxFuture<'a, NetworkResult<Vec<RawBar>>> {
        self.queries.borrow_mut().push(query.clone());
        let response = self.response.borrow().clone();
        let response = response.map(|bars| match query.end_time {
            Some(end) => bars
                .into_iter()
                .filter(|bar| {
                    bar.timestamp.as_f64().is_some_and(|t| (t as u64) < end.as_millis())
                })
                .collect(),
            None => bars,
        });
        futures::future::ready(response).boxed_local()
    }
}

/// `RawBar` in the REST shape (millisecond open time) for `candle`.
pub fn raw_bar(candle: &Candle) -> RawBar {
    RawBar::new(
        candle.timestamp.as_millis() as f64,
        candle.ohlcv.open.value(),
        candle.ohlcv.high.value(),
        candle.ohlcv.low.value(),
        candle.ohlcv.close.value(),
        candle.ohlcv.volume.value(),
    )
}

#[derive(Default)]
pub struct StaticMarketSource {
    markets: Vec<MarketSummary>,
}

impl StaticMarketSource {
    pub fn new(markets: Vec<MarketSummary>) -> Self {
        Self { markets }
    }
}

impl MarketSnapshotSource for StaticMarketSource {
    fn fetch_markets<'a>(
        &'a self,
        query: &'a MarketQuery,
    ) -> LocalBoxFuture<'a, NetworkResult<Vec<MarketSummary>>> {
        let markets: Vec<MarketSummary> = self
            .markets
            .iter()
            .filter(|m| query.ids.is_empty() || query.ids.contains(&m.id))
            .take(query.per_page as usize)
            .cloned()
            .collect();
        futures::future::ready(Ok(markets)).boxed_local()
    }
}

// ---------------------------------------------------------------------------
// Chart

#[derive(Debug, Clone, PartialEq)]
pub enum ChartOp {
    Created { width: u32, height: u32 },
    SetCandles(usize),
    SetVolumes(usize),
    SetLine { window: usize, points: usize },
    UpdateCandle(Timestamp),
    UpdateVolume(Timestamp),
    UpdateLine { window: usize, time: Timestamp },
    Width(u32),
    Removed,
}

#[derive(Default)]
struct BackendState {
    ops: Vec<ChartOp>,
    live: usize,
    fail_create: bool,
}

/// Chart library stand-in recording every call.
#[derive(Clone, Default)]
pub struct RecordingChartBackend {
    state: Rc<RefCell<BackendState>>,
}

impl RecordingChartBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_create(&self, fail: bool) {
        self.state.borrow_mut().fail_create = fail;
    }

    pub fn ops(&self) -> Vec<ChartOp> {
        self.state.borrow().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.borrow_mut().ops.clear();
    }

    pub fn live_instances(&self) -> usize {
        self.state.borrow().live
    }

    pub fn created(&self) -> usize {
        self.state.borrow().ops.iter().filter(|op| matches!(op, ChartOp::Created { .. })).count()
    }
}

impl ChartBackend for RecordingChartBackend {
    fn create(&self, width: u32, height: u32) -> ChartResult<Box<dyn ChartInstance>> {
        let mut state = self.state.borrow_mut();
        if state.fail_create {
            return Err(AppError::ChartError("library failed to initialize".into()));
        }
        state.ops.push(ChartOp::Created { width, height });
        state.live += 1;
        Ok(Box::new(RecordingInstance { state: self.state.clone() }))
    }
}

struct RecordingInstance {
    state: Rc<RefCell<BackendState>>,
}

impl RecordingInstance {
    fn record(&self, op: ChartOp) -> ChartResult<()> {
        self.state.borrow_mut().ops.push(op);
        Ok(())
    }
}

impl ChartInstance for RecordingInstance {
    fn set_candles(&mut self, candles: &[Candle]) -> ChartResult<()> {
        self.record(ChartOp::SetCandles(candles.len()))
    }

    fn set_volumes(&mut self, volumes: &[VolumeBar]) -> ChartResult<()> {
        self.record(ChartOp::SetVolumes(volumes.len()))
    }

    fn set_line(&mut self, series: &DerivedSeries) -> ChartResult<()> {
        self.record(ChartOp::SetLine { window: series.window, points: series.points.len() })
    }

    fn update_candle(&mut self, candle: &Candle) -> ChartResult<()> {
        self.record(ChartOp::UpdateCandle(candle.timestamp))
    }

    fn update_volume(&mut self, volume: &VolumeBar) -> ChartResult<()> {
        self.record(ChartOp::UpdateVolume(volume.time))
    }

    fn update_line(&mut self, window: usize, point: &DerivedPoint) -> ChartResult<()> {
        self.record(ChartOp::UpdateLine { window, time: point.time })
    }

    fn apply_width(&mut self, width: u32) {
        self.state.borrow_mut().ops.push(ChartOp::Width(width));
    }

    fn remove(&mut self) {
        let mut state = self.state.borrow_mut();
        state.ops.push(ChartOp::Removed);
        state.live = state.live.saturating_sub(1);
    }
}

type ResizeListener = Rc<dyn Fn(u32)>;

#[derive(Default)]
struct ContainerState {
    width: u32,
    height: u32,
    next_id: u64,
    listeners: Vec<(u64, ResizeListener)>,
}

/// Container whose size tests set by hand.
#[derive(Clone, Default)]
pub struct FakeContainer {
    state: Rc<RefCell<ContainerState>>,
}

impl FakeContainer {
    pub fn new(width: u32, height: u32) -> Self {
        let container = Self::default();
        {
            let mut state = container.state.borrow_mut();
            state.width = width;
            state.height = height;
        }
        container
    }

    /// Change the width and notify resize observers.
    pub fn set_width(&self, width: u32) {
        let listeners: Vec<ResizeListener> = {
            let mut state = self.state.borrow_mut();
            state.width = width;
            state.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(width);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }
}

impl ChartContainer for FakeContainer {
    fn width(&self) -> u32 {
        self.state.borrow().width
    }

    fn height(&self) -> u32 {
        self.state.borrow().height
    }

    fn observe_resize(&self, on_resize: Box<dyn Fn(u32)>) -> ChartResult<ListenerHandle> {
        let id = {
            let mut state = self.state.borrow_mut();
            state.next_id += 1;
            let id = state.next_id;
            state.listeners.push((id, Rc::from(on_resize)));
            id
        };
        let weak = Rc::downgrade(&self.state);
        Ok(ListenerHandle::new(move || {
            if let Some(state) = weak.upgrade() {
                state.borrow_mut().listeners.retain(|(listener, _)| *listener != id);
            }
        }))
    }
}

// ---------------------------------------------------------------------------
// Store

/// Minute candle `index` minutes after `start_secs`, closing at `close`.
pub fn minute_candle(start_secs: u64, index: u64, close: f64) -> Candle {
    use crate::domain::market_data::{OHLCV, Price, Volume};
    Candle::new(
        Timestamp::from_secs(start_secs + index * 60),
        OHLCV::new(
            Price::from(close),
            Price::from(close + 1.0),
            Price::from(close - 1.0),
            Price::from(close),
            Volume::from(10.0),
        ),
    )
}

/// A [`MarketStore`](crate::application::MarketStore) wired to in-memory
/// doubles, with the doubles kept at hand for driving and inspection.
pub struct StoreHarness {
    pub store: crate::application::MarketStore,
    pub connector: FakeConnector,
    pub scheduler: ManualScheduler,
    pub clock: ManualClock,
    pub bars: Rc<StaticBarSource>,
}

impl StoreHarness {
    pub fn new(config: crate::config::AppConfig, bars: StaticBarSource, now_millis: u64) -> Self {
        let clock = ManualClock::new(now_millis);
        let scheduler = ManualScheduler::with_clock(clock.clone());
        let connector = FakeConnector::new();
        let bars = Rc::new(bars);
        let store = crate::application::MarketStore::new(
            config,
            crate::application::StoreDeps {
                connector: Rc::new(connector.clone()),
                scheduler: Rc::new(scheduler.clone()),
                clock: Rc::new(clock.clone()),
                bars: bars.clone(),
                markets: None,
            },
        );
        Self { store, connector, scheduler, clock, bars }
    }
}
