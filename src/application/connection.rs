//! One gateway socket per instance: connect, heartbeat, bounded reconnect and
//! fan-out of decoded server events.
//!
//! Everything runs on the single UI event loop. Transport callbacks and timer
//! callbacks only enqueue an [`Inbound`]; the queue is drained with the core
//! borrowed, and the resulting effects (state notifications, message dispatch)
//! run after the borrow is released, so handlers may call back into the
//! connection freely.

use crate::config::StreamConfig;
use crate::domain::errors::AppError;
use crate::domain::logging::{LogComponent, LogLevel, get_logger};
use crate::domain::stream::{
    AuthContext, BackoffPolicy, ClientCommand, ConnectRequest, ConnectionState, ConnectionStatus,
    Connector, EventKind, GatewayEvent, TransportEvent, TransportHandle, TransportSink,
};
use crate::time_utils::{Clock, Scheduler, TimerHandle};
use crate::{log_debug, log_error, log_info, log_trace, log_warn};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::{Rc, Weak};

const COMPONENT: LogComponent = LogComponent::Application("StreamConnection");

/// Static connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSettings {
    pub url: String,
    pub namespace: String,
    pub heartbeat_ms: u32,
    pub backoff: BackoffPolicy,
}

impl From<&StreamConfig> for ConnectionSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            url: config.endpoint(),
            namespace: config.namespace.clone(),
            heartbeat_ms: config.heartbeat_interval_ms,
            backoff: config.backoff(),
        }
    }
}

/// Environment a connection runs against.
#[derive(Clone)]
pub struct ConnectionPorts {
    pub connector: Rc<dyn Connector>,
    pub scheduler: Rc<dyn Scheduler>,
    pub clock: Rc<dyn Clock>,
}

enum Inbound {
    Connect(AuthContext),
    Disconnect,
    Transport { generation: u64, event: TransportEvent },
    ReconnectDue { generation: u64 },
    HeartbeatDue { generation: u64 },
}

enum Effect {
    State(ConnectionState),
    Dispatch(GatewayEvent),
}

type MessageHandler = Rc<dyn Fn(&GatewayEvent)>;
type StateHandler = Rc<dyn Fn(ConnectionState)>;

#[derive(Default)]
struct HandlerTable {
    next_id: u64,
    message: HashMap<EventKind, Vec<(u64, MessageHandler)>>,
    state: Vec<(u64, StateHandler)>,
}

impl HandlerTable {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, slot: Slot, id: u64) {
        match slot {
            Slot::Message(kind) => {
                if let Some(handlers) = self.message.get_mut(&kind) {
                    handlers.retain(|(handler_id, _)| *handler_id != id);
                    if handlers.is_empty() {
                        self.message.remove(&kind);
                    }
                }
            }
            Slot::State => self.state.retain(|(handler_id, _)| *handler_id != id),
        }
    }

    fn len(&self) -> usize {
        self.message.values().map(Vec::len).sum::<usize>() + self.state.len()
    }
}

struct Shared {
    core: RefCell<ConnectionCore>,
    inbox: RefCell<VecDeque<Inbound>>,
    busy: Cell<bool>,
    handlers: RefCell<HandlerTable>,
}

impl Shared {
    fn submit(self: &Rc<Self>, inbound: Inbound) {
        self.inbox.borrow_mut().push_back(inbound);
        self.pump();
    }

    /// Drain the inbox. Nested calls return immediately; the outer loop picks
    /// up whatever they queued, preserving arrival order.
    fn pump(self: &Rc<Self>) {
        if self.busy.replace(true) {
            return;
        }
        loop {
            let next = self.inbox.borrow_mut().pop_front();
            let Some(inbound) = next else { break };
            let effects = self.core.borrow_mut().handle(inbound, self);
            for effect in effects {
                self.run(effect);
            }
        }
        self.busy.set(false);
    }

    fn with_core<R>(self: &Rc<Self>, f: impl FnOnce(&mut ConnectionCore) -> R) -> R {
        let was_busy = self.busy.replace(true);
        let result = f(&mut self.core.borrow_mut());
        self.busy.set(was_busy);
        if !was_busy {
            self.pump();
        }
        result
    }

    fn run(&self, effect: Effect) {
        match effect {
            Effect::State(state) => {
                let handlers: Vec<StateHandler> =
                    self.handlers.borrow().state.iter().map(|(_, h)| h.clone()).collect();
                for handler in handlers {
                    handler(state);
                }
            }
            Effect::Dispatch(event) => {
                let handlers: Vec<MessageHandler> = self
                    .handlers
                    .borrow()
                    .message
                    .get(&event.kind())
                    .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default();
                if handlers.is_empty() {
                    log_trace!(COMPONENT, "no handler for {}", event.kind());
                }
                for handler in handlers {
                    handler(&event);
                }
            }
        }
    }
}

struct ConnectionCore {
    settings: ConnectionSettings,
    ports: ConnectionPorts,
    auth: Option<AuthContext>,
    state: ConnectionState,
    attempts: u32,
    halted: bool,
    last_error: Option<AppError>,
    last_pong: Option<u64>,
    generation: u64,
    transport: Option<Box<dyn TransportHandle>>,
    heartbeat: Option<TimerHandle>,
    reconnect_timer: Option<TimerHandle>,
}

impl ConnectionCore {
    fn new(settings: ConnectionSettings, ports: ConnectionPorts) -> Self {
        Self {
            settings,
            ports,
            auth: None,
            state: ConnectionState::Disconnected,
            attempts: 0,
            halted: false,
            last_error: None,
            last_pong: None,
            generation: 0,
            transport: None,
            heartbeat: None,
            reconnect_timer: None,
        }
    }

    fn handle(&mut self, inbound: Inbound, link: &Rc<Shared>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match inbound {
            Inbound::Connect(auth) => self.connect(auth, link, &mut effects),
            Inbound::Disconnect => self.disconnect(&mut effects),
            Inbound::Transport { generation, event } => {
                if generation != self.generation || self.transport.is_none() {
                    log_trace!(COMPONENT, "ignoring stale transport event {:?}", event);
                } else {
                    self.on_transport(event, link, &mut effects);
                }
            }
            Inbound::ReconnectDue { generation } => {
                if generation == self.generation && self.state == ConnectionState::Reconnecting {
                    self.reconnect_timer = None;
                    log_info!(
                        COMPONENT,
                        "🔄 Reconnect attempt {}/{}",
                        self.attempts,
                        self.settings.backoff.max_attempts
                    );
                    self.open(link, &mut effects);
                }
            }
            Inbound::HeartbeatDue { generation } => {
                if generation == self.generation && self.state == ConnectionState::Connected {
                    if let Some(transport) = self.transport.as_mut() {
                        if let Err(err) = transport.send(&ClientCommand::Ping) {
                            log_warn!(COMPONENT, "💔 Heartbeat ping failed: {}", err);
                        }
                    }
                }
            }
        }
        effects
    }

    fn set_state(&mut self, next: ConnectionState, effects: &mut Vec<Effect>) {
        if self.state != next {
            log_debug!(COMPONENT, "{} -> {}", self.state, next);
            self.state = next;
            effects.push(Effect::State(next));
        }
    }

    fn connect(&mut self, auth: AuthContext, link: &Rc<Shared>, effects: &mut Vec<Effect>) {
        if self.state.is_active() && self.auth.as_ref() == Some(&auth) {
            log_debug!(COMPONENT, "connect() ignored, already {}", self.state);
            return;
        }
        self.teardown();
        log_info!(COMPONENT, "🔌 Connecting to {} as {}", self.settings.url, auth.connection_id);
        self.auth = Some(auth);
        self.attempts = 0;
        self.halted = false;
        self.last_error = None;
        self.set_state(ConnectionState::Connecting, effects);
        self.open(link, effects);
    }

    fn open(&mut self, link: &Rc<Shared>, effects: &mut Vec<Effect>) {
        let Some(auth) = self.auth.clone() else {
            return;
        };
        self.generation += 1;
        let generation = self.generation;
        let weak = Rc::downgrade(link);
        let sink = TransportSink::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.submit(Inbound::Transport { generation, event });
            }
        });
        let request = ConnectRequest {
            url: self.settings.url.clone(),
            namespace: self.settings.namespace.clone(),
            auth,
        };
        match self.ports.connector.open(&request, sink) {
            Ok(handle) => self.transport = Some(handle),
            Err(err) => {
                log_warn!(COMPONENT, "❌ Failed to open transport: {}", err);
                self.last_error = Some(err);
                self.schedule_reconnect(link, effects);
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent, link: &Rc<Shared>, effects: &mut Vec<Effect>) {
        match event {
            TransportEvent::Opened => {
                self.attempts = 0;
                self.last_error = None;
                self.start_heartbeat(link);
                log_info!(COMPONENT, "✅ Connected to {}", self.settings.url);
                self.set_state(ConnectionState::Connected, effects);
            }
            TransportEvent::Message(event) => {
                match &event {
                    GatewayEvent::Pong => self.last_pong = Some(self.ports.clock.now_millis()),
                    GatewayEvent::Error(err) => {
                        if err.is_rate_limited() {
                            log_warn!(COMPONENT, "🛑 Rate limited, reconnects halted: {}", err);
                            self.halted = true;
                        } else {
                            log_warn!(COMPONENT, "⚠️ Gateway error: {}", err);
                        }
                        self.last_error = Some(err.clone());
                    }
                    _ => {}
                }
                effects.push(Effect::Dispatch(event));
            }
            TransportEvent::Closed { reason } => {
                log_warn!(COMPONENT, "🔌 Transport closed: {}", reason);
                self.on_lost(None, link, effects);
            }
            TransportEvent::Error(message) => {
                log_error!(COMPONENT, "❌ Transport error: {}", message);
                self.on_lost(Some(AppError::NetworkError(message)), link, effects);
            }
        }
    }

    fn start_heartbeat(&mut self, link: &Rc<Shared>) {
        let generation = self.generation;
        let weak = Rc::downgrade(link);
        self.heartbeat = Some(self.ports.scheduler.interval(
            self.settings.heartbeat_ms,
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.submit(Inbound::HeartbeatDue { generation });
                }
            }),
        ));
    }

    fn on_lost(&mut self, error: Option<AppError>, link: &Rc<Shared>, effects: &mut Vec<Effect>) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.heartbeat = None;
        self.generation += 1;
        if let Some(err) = error {
            self.last_error = Some(err);
        }
        self.schedule_reconnect(link, effects);
    }

    fn schedule_reconnect(&mut self, link: &Rc<Shared>, effects: &mut Vec<Effect>) {
        if self.halted {
            log_error!(COMPONENT, "🛑 Not reconnecting: gateway rate limit");
            self.set_state(ConnectionState::Failed, effects);
            return;
        }
        let Some(delay) = self.settings.backoff.delay_for(self.attempts) else {
            log_error!(COMPONENT, "💀 Giving up after {} reconnect attempts", self.attempts);
            if self.last_error.is_none() {
                self.last_error = Some(AppError::NetworkError(format!(
                    "connection lost, gave up after {} attempts",
                    self.attempts
                )));
            }
            self.set_state(ConnectionState::Failed, effects);
            return;
        };
        self.attempts += 1;
        get_logger().log_with_metadata(
            LogLevel::Warn,
            COMPONENT,
            "⏳ Reconnecting",
            &format!("attempt={} delay_ms={} url={}", self.attempts, delay, self.settings.url),
        );
        self.set_state(ConnectionState::Reconnecting, effects);
        let generation = self.generation;
        let weak = Rc::downgrade(link);
        self.reconnect_timer = Some(self.ports.scheduler.timeout(
            u32::try_from(delay).unwrap_or(u32::MAX),
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.submit(Inbound::ReconnectDue { generation });
                }
            }),
        ));
    }

    fn disconnect(&mut self, effects: &mut Vec<Effect>) {
        self.teardown();
        self.attempts = 0;
        self.set_state(ConnectionState::Disconnected, effects);
    }

    /// Close the transport and cancel every timer. Bumping the generation makes
    /// any event still in flight from the old transport a no-op.
    fn teardown(&mut self) {
        self.generation += 1;
        self.reconnect_timer = None;
        self.heartbeat = None;
        if let Some(mut transport) = self.transport.take() {
            log_debug!(COMPONENT, "closing transport");
            transport.close();
        }
    }

    fn emit(&mut self, command: &ClientCommand) -> bool {
        if self.state != ConnectionState::Connected {
            log_debug!(COMPONENT, "dropping {} while {}", command.event_name(), self.state);
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send(command) {
            Ok(()) => {
                log_trace!(COMPONENT, "→ {}", command.event_name());
                true
            }
            Err(err) => {
                log_warn!(COMPONENT, "failed to send {}: {}", command.event_name(), err);
                false
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            last_pong: self.last_pong,
        }
    }
}

impl Drop for ConnectionCore {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Clone, Copy)]
enum Slot {
    Message(EventKind),
    State,
}

/// Keeps a handler registered. Dropping it (or calling `remove`) unregisters
/// the handler synchronously.
#[must_use = "dropping the registration removes the handler"]
pub struct HandlerRegistration {
    shared: Weak<Shared>,
    slot: Slot,
    id: u64,
    armed: bool,
}

impl HandlerRegistration {
    pub fn remove(self) {}

    /// Leave the handler registered for the connection's lifetime.
    pub fn forget(mut self) {
        self.armed = false;
    }
}

impl Drop for HandlerRegistration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            shared.handlers.borrow_mut().remove(self.slot, self.id);
        }
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration").field("id", &self.id).finish()
    }
}

/// Cheap handle to one gateway connection; clones share the same socket.
#[derive(Clone)]
pub struct StreamConnection {
    shared: Rc<Shared>,
}

impl StreamConnection {
    pub fn new(settings: ConnectionSettings, ports: ConnectionPorts) -> Self {
        Self {
            shared: Rc::new(Shared {
                core: RefCell::new(ConnectionCore::new(settings, ports)),
                inbox: RefCell::new(VecDeque::new()),
                busy: Cell::new(false),
                handlers: RefCell::new(HandlerTable::default()),
            }),
        }
    }

    pub fn from_config(config: &StreamConfig, ports: ConnectionPorts) -> Self {
        Self::new(ConnectionSettings::from(config), ports)
    }

    /// Idempotent for the same auth while connecting or connected. Never fails:
    /// transport problems show up as `reconnecting` / `failed`.
    pub fn connect(&self, auth: AuthContext) {
        self.shared.submit(Inbound::Connect(auth));
    }

    /// Tear down transport and timers. Safe to call any number of times.
    pub fn disconnect(&self) {
        self.shared.submit(Inbound::Disconnect);
    }

    /// Send now if connected; otherwise the command is dropped and `false` returned.
    pub fn emit(&self, command: &ClientCommand) -> bool {
        self.shared.with_core(|core| core.emit(command))
    }

    pub fn on_message(
        &self,
        kind: EventKind,
        handler: impl Fn(&GatewayEvent) + 'static,
    ) -> HandlerRegistration {
        let mut table = self.shared.handlers.borrow_mut();
        let id = table.allocate();
        table.message.entry(kind).or_default().push((id, Rc::new(handler)));
        HandlerRegistration {
            shared: Rc::downgrade(&self.shared),
            slot: Slot::Message(kind),
            id,
            armed: true,
        }
    }

    pub fn on_state_change(
        &self,
        handler: impl Fn(ConnectionState) + 'static,
    ) -> HandlerRegistration {
        let mut table = self.shared.handlers.borrow_mut();
        let id = table.allocate();
        table.state.push((id, Rc::new(handler)));
        HandlerRegistration { shared: Rc::downgrade(&self.shared), slot: Slot::State, id, armed: true }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.core.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.core.borrow().status()
    }

    pub fn auth(&self) -> Option<AuthContext> {
        self.shared.core.borrow().auth.clone()
    }

    /// Registered message and state handlers.
    pub fn handler_count(&self) -> usize {
        self.shared.handlers.borrow().len()
    }

    pub fn has_transport(&self) -> bool {
        self.shared.core.borrow().transport.is_some()
    }

    pub fn downgrade(&self) -> WeakStreamConnection {
        WeakStreamConnection { shared: Rc::downgrade(&self.shared) }
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection").field("state", &self.state()).finish()
    }
}

/// Non-owning reference; subscriptions hold this, never the connection itself.
#[derive(Clone, Default)]
pub struct WeakStreamConnection {
    shared: Weak<Shared>,
}

impl WeakStreamConnection {
    pub fn upgrade(&self) -> Option<StreamConnection> {
        self.shared.upgrade().map(|shared| StreamConnection { shared })
    }
}
