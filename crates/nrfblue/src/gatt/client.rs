//! Client-side GATT database
//!
//! [`GattcDatabase`] is the view of a remote server's attribute table built
//! by [`DatabaseDiscoverer`]. It routes reads and writes through the
//! per-connection operation manager, mirrors confirmed values in the shared
//! cache, and tracks CCCD subscriptions so inbound handle value pushes reach
//! the right handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::driver::events::{BleEvent, EventKind, HvxReceivedEvent};
use crate::driver::{BleDriver, EventDispatcher, SubscriptionId};
use crate::error::GattError;
use crate::peer::Peer;
use crate::uuid::{Uuid, UuidRegistry};

use super::cache::ValueCache;
use super::discovery::{DatabaseDiscoverer, DiscoveryCallback};
use super::managers::{GattcOperationManager, ReadCallback, WriteCallback};
use super::types::{Characteristic, Service, SubscriptionState};

/// Handler invoked for every notification/indication received on a
/// subscribed characteristic's value handle
pub type NotificationHandler = Box<dyn FnMut(u16, &[u8]) + Send>;

pub struct GattcDatabase {
    weak: Weak<GattcDatabase>,
    peer: Arc<Peer>,
    manager: Arc<GattcOperationManager>,
    discoverer: Arc<DatabaseDiscoverer>,
    cache: Arc<ValueCache>,
    services: RwLock<Vec<Service>>,
    notification_handlers: Mutex<HashMap<u16, NotificationHandler>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl GattcDatabase {
    pub fn new(
        driver: Arc<dyn BleDriver>,
        peer: Arc<Peer>,
        registry: Arc<UuidRegistry>,
        dispatcher: &EventDispatcher,
        write_cmd_queue_depth: usize,
    ) -> Arc<Self> {
        let cache = Arc::new(ValueCache::new());
        let manager = GattcOperationManager::new(
            Arc::clone(&driver),
            Arc::clone(&peer),
            Arc::clone(&cache),
            dispatcher,
            write_cmd_queue_depth,
        );
        let discoverer =
            DatabaseDiscoverer::new(driver, Arc::clone(&peer), registry, dispatcher);
        let database = Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            peer,
            manager,
            discoverer,
            cache,
            services: RwLock::new(Vec::new()),
            notification_handlers: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&database);
        let ids = dispatcher.subscribe_all(
            &[EventKind::HvxReceived, EventKind::Disconnected],
            Arc::new(move |event| {
                if let Some(database) = weak.upgrade() {
                    database.handle_event(event);
                }
            }),
        );
        *database.subscriptions.lock().unwrap() = ids;
        database
    }

    /// Removes every event handler this database and its manager installed
    pub fn detach(&self, dispatcher: &EventDispatcher) {
        self.manager.detach(dispatcher);
        self.discoverer.detach(dispatcher);
        for id in self.subscriptions.lock().unwrap().drain(..) {
            dispatcher.unsubscribe(id);
        }
    }

    /// Runs database discovery and installs the resulting tree before
    /// reporting completion. On failure the installed tree is whatever
    /// partial result the pipeline assembled and must be treated as
    /// unreliable.
    pub fn discover(&self, on_complete: DiscoveryCallback) -> Result<(), GattError> {
        let database = self.weak.upgrade().ok_or(GattError::InvalidState)?;
        self.discoverer.start(Box::new(move |result| {
            database.install(result.services.clone());
            on_complete(result);
        }))
    }

    /// Replaces the installed service tree
    pub fn install(&self, services: Vec<Service>) {
        *self.services.write().unwrap() = services;
    }

    pub fn services(&self) -> Vec<Service> {
        self.services.read().unwrap().clone()
    }

    pub fn find_service(&self, uuid: Uuid) -> Option<Service> {
        self.services
            .read()
            .unwrap()
            .iter()
            .find(|s| s.uuid == uuid)
            .cloned()
    }

    /// The first characteristic matching `uuid` across all services
    pub fn find_characteristic(&self, uuid: Uuid) -> Option<Characteristic> {
        self.services
            .read()
            .unwrap()
            .iter()
            .flat_map(|s| s.characteristics.iter())
            .find(|c| c.uuid == uuid)
            .cloned()
    }

    /// The last confirmed value for `handle`, if any
    pub fn cached_value(&self, handle: u16) -> Option<Vec<u8>> {
        self.cache.get(handle)
    }

    /// Queues a read of the attribute at `handle`
    pub fn read(&self, handle: u16, callback: ReadCallback) -> u64 {
        self.manager.read(handle, callback)
    }

    /// Queues a write of `value` to the attribute at `handle`
    pub fn write(
        &self,
        handle: u16,
        value: &[u8],
        callback: WriteCallback,
        with_response: bool,
    ) -> Result<u64, GattError> {
        self.manager.write(handle, value, callback, with_response)
    }

    /// Subscribes to a characteristic by writing its CCCD. `handler` runs
    /// for every notification/indication received on the value handle until
    /// [`unsubscribe`](Self::unsubscribe) or disconnect.
    pub fn subscribe(
        &self,
        characteristic: &Characteristic,
        prefer_indications: bool,
        handler: NotificationHandler,
        callback: WriteCallback,
    ) -> Result<u64, GattError> {
        let properties = characteristic.properties;
        if !properties.can_subscribe() {
            return Err(GattError::OperationNotSupported);
        }
        let cccd = characteristic
            .cccd_handle()
            .ok_or(GattError::OperationNotSupported)?;
        let state = if (prefer_indications && properties.can_indicate()) || !properties.can_notify()
        {
            SubscriptionState::Indication
        } else {
            SubscriptionState::Notification
        };
        self.notification_handlers
            .lock()
            .unwrap()
            .insert(characteristic.value_handle, handler);
        self.manager
            .write(cccd, &state.to_le_bytes(), callback, true)
    }

    /// Clears a characteristic's CCCD and drops its notification handler
    pub fn unsubscribe(
        &self,
        characteristic: &Characteristic,
        callback: WriteCallback,
    ) -> Result<u64, GattError> {
        let cccd = characteristic
            .cccd_handle()
            .ok_or(GattError::OperationNotSupported)?;
        self.notification_handlers
            .lock()
            .unwrap()
            .remove(&characteristic.value_handle);
        self.manager.write(
            cccd,
            &SubscriptionState::NotSubscribed.to_le_bytes(),
            callback,
            true,
        )
    }

    fn handle_event(&self, event: &BleEvent) {
        match event {
            BleEvent::HvxReceived(e) => self.on_hvx_received(e),
            BleEvent::Disconnected(e) => {
                if self.peer.matches(e.conn_handle) {
                    self.cache.clear();
                    self.services.write().unwrap().clear();
                    self.notification_handlers.lock().unwrap().clear();
                }
            }
            _ => {}
        }
    }

    fn on_hvx_received(&self, event: &HvxReceivedEvent) {
        if !self.peer.matches(event.conn_handle) {
            return;
        }
        self.cache.update(event.handle, &event.data);
        log::debug!(
            "hvx received on handle {}: {}",
            event.handle,
            hex::encode(&event.data)
        );
        let mut handlers = self.notification_handlers.lock().unwrap();
        if let Some(handler) = handlers.get_mut(&event.handle) {
            handler(event.handle, &event.data);
        }
    }
}
