use super::connection::{HandlerRegistration, StreamConnection, WeakStreamConnection};
use crate::domain::logging::LogComponent;
use crate::domain::stream::{ClientCommand, ConnectionState, SubscriptionKey, SubscriptionParams};
use crate::{log_debug, log_info};
use std::cell::RefCell;
use std::rc::Rc;

const COMPONENT: LogComponent = LogComponent::Application("Subscriptions");

#[derive(Debug, Clone, PartialEq)]
struct Subscription {
    key: SubscriptionKey,
    params: SubscriptionParams,
    /// Number of consumers interested in this key.
    interest: usize,
    /// Subscribe message sent on the current socket session.
    active: bool,
}

#[derive(Default)]
struct Registry {
    records: Vec<Subscription>,
}

impl Registry {
    fn position(&self, key: &SubscriptionKey) -> Option<usize> {
        self.records.iter().position(|record| &record.key == key)
    }
}

/// Reference-counted subscription bookkeeping over one shared connection.
///
/// Records are kept in registration order; that order is the replay order after
/// every (re)connect.
pub struct SubscriptionManager {
    registry: Rc<RefCell<Registry>>,
    connection: WeakStreamConnection,
    _state_listener: HandlerRegistration,
}

impl SubscriptionManager {
    pub fn new(connection: &StreamConnection) -> Self {
        let registry = Rc::new(RefCell::new(Registry::default()));
        let weak_registry = Rc::downgrade(&registry);
        let weak_connection = connection.downgrade();
        let listener = connection.on_state_change(move |state| {
            let (Some(registry), Some(connection)) =
                (weak_registry.upgrade(), weak_connection.upgrade())
            else {
                return;
            };
            if state == ConnectionState::Connected {
                replay(&registry, &connection);
            } else {
                for record in registry.borrow_mut().records.iter_mut() {
                    record.active = false;
                }
            }
        });
        Self { registry, connection: connection.downgrade(), _state_listener: listener }
    }

    fn live_connection(&self) -> Option<StreamConnection> {
        self.connection.upgrade().filter(StreamConnection::is_connected)
    }

    /// Register interest in `key`. Only a new key, a parameter change or a
    /// not-yet-acknowledged record produces a wire message.
    pub fn subscribe(&self, key: SubscriptionKey, params: SubscriptionParams) {
        let send = {
            let mut registry = self.registry.borrow_mut();
            match registry.position(&key) {
                Some(index) => {
                    let record = &mut registry.records[index];
                    record.interest += 1;
                    let changed = record.params != params;
                    record.params = params;
                    if changed {
                        log_debug!(COMPONENT, "params refreshed for {}", key);
                    }
                    changed || !record.active
                }
                None => {
                    log_info!(COMPONENT, "➕ {}", key);
                    registry.records.push(Subscription {
                        key: key.clone(),
                        params,
                        interest: 1,
                        active: false,
                    });
                    true
                }
            }
        };
        if !send {
            return;
        }
        let Some(connection) = self.live_connection() else {
            log_debug!(COMPONENT, "{} queued until connected", key);
            return;
        };
        if connection.emit(&ClientCommand::Subscribe { key: key.clone(), params }) {
            let mut registry = self.registry.borrow_mut();
            if let Some(index) = registry.position(&key) {
                registry.records[index].active = true;
            }
        }
    }

    /// Drop one unit of interest. Returns `true` when the record was removed.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> bool {
        let removed = {
            let mut registry = self.registry.borrow_mut();
            let Some(index) = registry.position(key) else {
                return false;
            };
            let record = &mut registry.records[index];
            record.interest = record.interest.saturating_sub(1);
            if record.interest > 0 {
                return false;
            }
            registry.records.remove(index)
        };
        log_info!(COMPONENT, "➖ {}", key);
        if removed.active {
            if let Some(connection) = self.live_connection() {
                connection.emit(&ClientCommand::Unsubscribe { key: removed.key });
            }
        }
        true
    }

    /// Unsubscribe on the wire but keep every record for the next replay.
    pub fn suspend(&self) {
        let keys: Vec<SubscriptionKey> = {
            let mut registry = self.registry.borrow_mut();
            registry
                .records
                .iter_mut()
                .filter(|record| record.active)
                .map(|record| {
                    record.active = false;
                    record.key.clone()
                })
                .collect()
        };
        if let Some(connection) = self.live_connection() {
            for key in keys {
                connection.emit(&ClientCommand::Unsubscribe { key });
            }
        }
    }

    /// Remove every record, unsubscribing the active ones.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut self.registry.borrow_mut().records);
        if let Some(connection) = self.live_connection() {
            for record in removed.into_iter().filter(|record| record.active) {
                connection.emit(&ClientCommand::Unsubscribe { key: record.key });
            }
        }
    }

    /// Re-issue every registered subscribe message in registration order.
    pub fn replay(&self) -> usize {
        match self.connection.upgrade() {
            Some(connection) => replay(&self.registry, &connection),
            None => 0,
        }
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.registry.borrow().position(key).is_some()
    }

    pub fn interest(&self, key: &SubscriptionKey) -> usize {
        let registry = self.registry.borrow();
        registry.position(key).map(|index| registry.records[index].interest).unwrap_or(0)
    }

    pub fn params(&self, key: &SubscriptionKey) -> Option<SubscriptionParams> {
        let registry = self.registry.borrow();
        registry.position(key).map(|index| registry.records[index].params)
    }

    pub fn is_active(&self, key: &SubscriptionKey) -> bool {
        let registry = self.registry.borrow();
        registry.position(key).is_some_and(|index| registry.records[index].active)
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.registry.borrow().records.iter().map(|record| record.key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.registry.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.borrow().records.is_empty()
    }
}

fn replay(registry: &Rc<RefCell<Registry>>, connection: &StreamConnection) -> usize {
    if !connection.is_connected() {
        return 0;
    }
    let pending: Vec<(SubscriptionKey, SubscriptionParams)> = registry
        .borrow()
        .records
        .iter()
        .map(|record| (record.key.clone(), record.params))
        .collect();
    let mut replayed = 0;
    for (key, params) in pending {
        if !connection.emit(&ClientCommand::Subscribe { key: key.clone(), params }) {
            continue;
        }
        replayed += 1;
        let mut registry = registry.borrow_mut();
        if let Some(index) = registry.position(&key) {
            registry.records[index].active = true;
        }
    }
    if replayed > 0 {
        log_info!(COMPONENT, "🔁 Replayed {} subscriptions", replayed);
    }
    replayed
}
