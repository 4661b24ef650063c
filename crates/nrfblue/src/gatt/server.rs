//! Server-side characteristics and notification plumbing
//!
//! [`GattsDatabase`] owns the locally hosted characteristics for one
//! connection. Client CCCD writes arriving from the link layer update each
//! characteristic's subscription state; value pushes go out through the
//! [`GattsOperationManager`] so only the hardware queue depth worth of
//! notifications is ever outstanding.

use std::sync::{Arc, Mutex, RwLock};

use crate::driver::events::{BleEvent, EventKind, WriteReceivedEvent};
use crate::driver::{BleDriver, EventDispatcher, SubscriptionId};
use crate::error::GattError;
use crate::peer::Peer;
use crate::uuid::Uuid;

use super::cache::ValueCache;
use super::managers::{GattsOperationManager, NotifyCallback};
use super::types::{CharacteristicProperties, SubscriptionState};

/// Handler invoked when the client changes a characteristic's CCCD
pub type SubscriptionChangeHandler = Box<dyn FnMut(SubscriptionState) + Send>;

/// A characteristic hosted by the local GATT server
pub struct GattsCharacteristic {
    uuid: Uuid,
    value_handle: u16,
    cccd_handle: Option<u16>,
    properties: CharacteristicProperties,
    subscription: Mutex<SubscriptionState>,
    on_subscription_change: Mutex<Option<SubscriptionChangeHandler>>,
}

impl GattsCharacteristic {
    fn new(
        uuid: Uuid,
        value_handle: u16,
        cccd_handle: Option<u16>,
        properties: CharacteristicProperties,
    ) -> Arc<Self> {
        Arc::new(Self {
            uuid,
            value_handle,
            cccd_handle,
            properties,
            subscription: Mutex::new(SubscriptionState::NotSubscribed),
            on_subscription_change: Mutex::new(None),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn value_handle(&self) -> u16 {
        self.value_handle
    }

    pub fn cccd_handle(&self) -> Option<u16> {
        self.cccd_handle
    }

    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// The client's current subscription state
    pub fn subscription(&self) -> SubscriptionState {
        *self.subscription.lock().unwrap()
    }

    pub fn client_subscribed(&self) -> bool {
        self.subscription().is_subscribed()
    }

    /// Whether the characteristic supports notifications or indications at
    /// all
    pub fn notifiable(&self) -> bool {
        self.properties.can_subscribe()
    }

    pub fn set_on_subscription_change(&self, handler: SubscriptionChangeHandler) {
        *self.on_subscription_change.lock().unwrap() = Some(handler);
    }

    fn set_subscription(&self, state: SubscriptionState) {
        let changed = {
            let mut subscription = self.subscription.lock().unwrap();
            let changed = *subscription != state;
            *subscription = state;
            changed
        };
        if changed {
            log::info!(
                "Characteristic {} subscription changed: {:?}",
                self.uuid,
                state
            );
            if let Some(handler) = self.on_subscription_change.lock().unwrap().as_mut() {
                handler(state);
            }
        }
    }
}

/// The local server's characteristic set for one connection
pub struct GattsDatabase {
    peer: Arc<Peer>,
    manager: Arc<GattsOperationManager>,
    cache: Arc<ValueCache>,
    characteristics: RwLock<Vec<Arc<GattsCharacteristic>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl GattsDatabase {
    pub fn new(
        driver: Arc<dyn BleDriver>,
        peer: Arc<Peer>,
        dispatcher: &EventDispatcher,
        notification_hardware_queue_size: usize,
    ) -> Arc<Self> {
        let cache = Arc::new(ValueCache::new());
        let manager = GattsOperationManager::new(
            driver,
            Arc::clone(&peer),
            Arc::clone(&cache),
            dispatcher,
            notification_hardware_queue_size,
        );
        let database = Arc::new(Self {
            peer,
            manager,
            cache,
            characteristics: RwLock::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
        });

        let weak = Arc::downgrade(&database);
        let ids = dispatcher.subscribe_all(
            &[EventKind::WriteReceived, EventKind::Disconnected],
            Arc::new(move |event| {
                if let Some(database) = weak.upgrade() {
                    database.handle_event(event);
                }
            }),
        );
        *database.subscriptions.lock().unwrap() = ids;
        database
    }

    pub fn detach(&self, dispatcher: &EventDispatcher) {
        self.manager.detach(dispatcher);
        for id in self.subscriptions.lock().unwrap().drain(..) {
            dispatcher.unsubscribe(id);
        }
    }

    /// Registers a hosted characteristic. Handles come from the attribute
    /// table set up with the link layer during service registration.
    pub fn add_characteristic(
        &self,
        uuid: Uuid,
        value_handle: u16,
        cccd_handle: Option<u16>,
        properties: CharacteristicProperties,
        initial_value: &[u8],
    ) -> Arc<GattsCharacteristic> {
        let characteristic = GattsCharacteristic::new(uuid, value_handle, cccd_handle, properties);
        self.cache.update(value_handle, initial_value);
        self.characteristics
            .write()
            .unwrap()
            .push(Arc::clone(&characteristic));
        characteristic
    }

    pub fn characteristics(&self) -> Vec<Arc<GattsCharacteristic>> {
        self.characteristics.read().unwrap().clone()
    }

    /// The current value of a hosted characteristic
    pub fn value(&self, characteristic: &GattsCharacteristic) -> Vec<u8> {
        self.cache
            .get(characteristic.value_handle())
            .unwrap_or_default()
    }

    /// Updates a characteristic's value, optionally pushing it to a
    /// subscribed client. Returns the notification task id when a push was
    /// queued.
    pub fn set_value(
        &self,
        characteristic: &Arc<GattsCharacteristic>,
        data: &[u8],
        notify_client: bool,
        callback: NotifyCallback,
    ) -> Result<Option<u64>, GattError> {
        if notify_client && !characteristic.notifiable() {
            return Err(GattError::OperationNotSupported);
        }
        self.cache.update(characteristic.value_handle(), data);
        if notify_client && characteristic.client_subscribed() {
            let id = self.manager.notify(
                characteristic,
                characteristic.value_handle(),
                callback,
                None,
            )?;
            return Ok(Some(id));
        }
        Ok(None)
    }

    /// Pushes a value to the subscribed client. `data = None` sends the
    /// current characteristic value. Fails synchronously when the client is
    /// not subscribed.
    pub fn notify(
        &self,
        characteristic: &Arc<GattsCharacteristic>,
        data: Option<&[u8]>,
        callback: NotifyCallback,
    ) -> Result<u64, GattError> {
        if !characteristic.notifiable() {
            return Err(GattError::OperationNotSupported);
        }
        if let Some(data) = data {
            self.cache.update(characteristic.value_handle(), data);
        }
        self.manager.notify(
            characteristic,
            characteristic.value_handle(),
            callback,
            data.map(<[u8]>::to_vec),
        )
    }

    /// Fails all queued notifications with `QueueCleared`
    pub fn clear_pending_notifications(&self) {
        self.manager.clear_all();
    }

    fn handle_event(&self, event: &BleEvent) {
        match event {
            BleEvent::WriteReceived(e) => self.on_write_received(e),
            BleEvent::Disconnected(e) => {
                if self.peer.matches(e.conn_handle) {
                    for characteristic in self.characteristics.read().unwrap().iter() {
                        *characteristic.subscription.lock().unwrap() =
                            SubscriptionState::NotSubscribed;
                    }
                }
            }
            _ => {}
        }
    }

    fn on_write_received(&self, event: &WriteReceivedEvent) {
        if !self.peer.matches(event.conn_handle) {
            return;
        }
        let characteristics = self.characteristics.read().unwrap().clone();
        for characteristic in characteristics {
            if characteristic.cccd_handle() == Some(event.handle) {
                characteristic.set_subscription(SubscriptionState::from_buffer(&event.data));
                return;
            }
            if characteristic.value_handle() == event.handle {
                self.cache.update(event.handle, &event.data);
                return;
            }
        }
    }
}
