//! Event dispatch from the link layer to per-connection components
//!
//! One dispatcher exists per adapter. The RPC transport's event-processing
//! thread calls [`EventDispatcher::dispatch`] for every decoded event;
//! components register handlers keyed by [`EventKind`] and tear them down
//! explicitly when their connection goes away.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::events::{BleEvent, EventKind};

/// Handler invoked on the event-processing thread
pub type EventHandler = Arc<dyn Fn(&BleEvent) + Send + Sync>;

/// Token returned by [`EventDispatcher::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct EventDispatcher {
    subscribers: Mutex<HashMap<EventKind, Vec<(SubscriptionId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a handler for one event kind
    pub fn subscribe(&self, kind: EventKind, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Register the same handler for several event kinds at once
    pub fn subscribe_all(&self, kinds: &[EventKind], handler: EventHandler) -> Vec<SubscriptionId> {
        kinds
            .iter()
            .map(|kind| self.subscribe(*kind, Arc::clone(&handler)))
            .collect()
    }

    /// Remove a previously registered handler. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subscribers = self.subscribers.lock().unwrap();
        for handlers in subscribers.values_mut() {
            handlers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Deliver an event to every handler registered for its kind.
    ///
    /// The handler list is snapshotted before invocation so a handler may
    /// subscribe or unsubscribe (itself included) without deadlocking or
    /// invalidating the iteration.
    pub fn dispatch(&self, event: &BleEvent) {
        let handlers: Vec<EventHandler> = {
            let subscribers = self.subscribers.lock().unwrap();
            match subscribers.get(&event.kind()) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in handlers {
            handler(event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::events::{ConnectedEvent, DisconnectedEvent};
    use std::sync::atomic::AtomicUsize;

    fn connected(conn_handle: u16) -> BleEvent {
        BleEvent::Connected(ConnectedEvent { conn_handle })
    }

    #[test]
    fn dispatches_to_matching_kind_only() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        dispatcher.subscribe(
            EventKind::Connected,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&connected(1));
        dispatcher.dispatch(&BleEvent::Disconnected(DisconnectedEvent {
            conn_handle: 1,
            reason: 0x13,
        }));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let id = dispatcher.subscribe(
            EventKind::Connected,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        dispatcher.dispatch(&connected(1));
        dispatcher.unsubscribe(id);
        dispatcher.dispatch(&connected(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_unsubscribe_during_dispatch() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let id_slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let counter = Arc::clone(&hits);
        let dispatcher_ref = Arc::clone(&dispatcher);
        let slot = Arc::clone(&id_slot);
        let id = dispatcher.subscribe(
            EventKind::Connected,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Some(id) = *slot.lock().unwrap() {
                    dispatcher_ref.unsubscribe(id);
                }
            }),
        );
        *id_slot.lock().unwrap() = Some(id);

        dispatcher.dispatch(&connected(1));
        dispatcher.dispatch(&connected(1));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
