//! Common types for GATT operations
//!
//! The service/characteristic/descriptor model here is the working set of
//! database discovery and the shape installed into the client-side database
//! once discovery completes.

use bitflags::bitflags;

use crate::uuid::Uuid;

bitflags! {
    /// Characteristic properties as defined by the attribute profile
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const SIGNED_WRITE = 0x40;
    }
}

impl CharacteristicProperties {
    pub fn can_read(&self) -> bool {
        self.contains(CharacteristicProperties::READ)
    }

    pub fn can_write(&self) -> bool {
        self.contains(CharacteristicProperties::WRITE)
    }

    pub fn can_write_without_response(&self) -> bool {
        self.contains(CharacteristicProperties::WRITE_WITHOUT_RESPONSE)
    }

    pub fn can_notify(&self) -> bool {
        self.contains(CharacteristicProperties::NOTIFY)
    }

    pub fn can_indicate(&self) -> bool {
        self.contains(CharacteristicProperties::INDICATE)
    }

    pub fn can_subscribe(&self) -> bool {
        self.can_notify() || self.can_indicate()
    }
}

/// Client Characteristic Configuration Descriptor UUID
pub const CCCD_UUID: Uuid = Uuid::sig(0x2902);

/// The ATT MTU in effect when a connection is established
pub const MTU_SIZE_DEFAULT: u16 = 23;

/// The minimum ATT MTU the protocol allows
pub const MTU_SIZE_MINIMUM: u16 = 23;

/// The largest MTU this library will negotiate
pub const MTU_SIZE_MAX: u16 = 247;

/// PDU overhead of a read response
pub const READ_OVERHEAD: usize = 1;

/// PDU overhead of a write request
pub const WRITE_OVERHEAD: usize = 3;

/// PDU overhead of a prepare write request
pub const LONG_WRITE_OVERHEAD: usize = 5;

/// PDU overhead of a notification or indication
pub const NOTIFICATION_OVERHEAD: usize = 3;

/// Subscription state of a characteristic's CCCD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    NotSubscribed,
    Notification,
    Indication,
}

impl SubscriptionState {
    /// Encodes as the little-endian u16 written to the CCCD
    pub fn to_le_bytes(self) -> [u8; 2] {
        let value: u16 = match self {
            SubscriptionState::NotSubscribed => 0,
            SubscriptionState::Notification => 1,
            SubscriptionState::Indication => 2,
        };
        value.to_le_bytes()
    }

    /// Decodes a CCCD value received over the air. Unknown bits fall back to
    /// not-subscribed.
    pub fn from_buffer(buf: &[u8]) -> Self {
        if buf.len() < 2 {
            return SubscriptionState::NotSubscribed;
        }
        match u16::from_le_bytes([buf[0], buf[1]]) {
            1 => SubscriptionState::Notification,
            2 => SubscriptionState::Indication,
            _ => SubscriptionState::NotSubscribed,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        *self != SubscriptionState::NotSubscribed
    }
}

/// Why a queued operation finished. Delivered with every completion
/// callback; asynchronous failures are never raised as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    /// The operation ran to completion (its `GattStatus` may still be a
    /// protocol-level failure)
    Success,
    /// The owning queue was cleared
    QueueCleared,
    /// The remote client disconnected
    ClientDisconnected,
    /// The remote server disconnected
    ServerDisconnected,
    /// The client unsubscribed before the notification was sent
    ClientUnsubscribed,
    /// The operation could not be started
    Failed,
    /// The link layer reported a timeout
    TimedOut,
}

/// A descriptor attribute owned by a characteristic (or, for the service
/// declaration attribute, by the service itself)
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

/// A characteristic within a service
#[derive(Debug, Clone)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub declaration_handle: u16,
    pub value_handle: u16,
    /// Last handle belonging to this characteristic; back-filled by
    /// [`Service::add_characteristic`]
    pub end_handle: u16,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn new(
        uuid: Uuid,
        declaration_handle: u16,
        value_handle: u16,
        properties: CharacteristicProperties,
    ) -> Self {
        Self {
            uuid,
            declaration_handle,
            value_handle,
            end_handle: value_handle,
            properties,
            descriptors: Vec::new(),
        }
    }

    /// Handles between the value handle and the end handle that no known
    /// descriptor occupies yet. Descriptor discovery keeps running until
    /// this is empty for every characteristic.
    pub fn missing_handles(&self) -> Vec<u16> {
        if self.end_handle <= self.value_handle {
            return Vec::new();
        }
        (self.value_handle + 1..=self.end_handle)
            .filter(|h| !self.descriptors.iter().any(|d| d.handle == *h))
            .collect()
    }

    /// The CCCD handle, when the descriptor has been discovered
    pub fn cccd_handle(&self) -> Option<u16> {
        self.descriptors
            .iter()
            .find(|d| d.uuid == CCCD_UUID)
            .map(|d| d.handle)
    }
}

/// A GATT service and its discovered contents
#[derive(Debug, Clone)]
pub struct Service {
    pub uuid: Uuid,
    pub start_handle: u16,
    pub end_handle: u16,
    pub characteristics: Vec<Characteristic>,
    /// Attributes owned by the service itself (e.g. its declaration)
    pub attributes: Vec<Descriptor>,
}

impl Service {
    pub fn new(uuid: Uuid, start_handle: u16, end_handle: u16) -> Self {
        Self {
            uuid,
            start_handle,
            end_handle,
            characteristics: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Appends a characteristic, provisionally ending it at the service end
    /// handle and trimming the previous characteristic to end one handle
    /// before the new declaration.
    pub fn add_characteristic(&mut self, mut characteristic: Characteristic) {
        characteristic.end_handle = self.end_handle;
        self.characteristics.push(characteristic);
        let count = self.characteristics.len();
        if count > 1 {
            let decl = self.characteristics[count - 1].declaration_handle;
            self.characteristics[count - 2].end_handle = decl - 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_chars() -> Service {
        let mut service = Service::new(Uuid::sig(0x180F), 1, 10);
        service.add_characteristic(Characteristic::new(
            Uuid::sig(0x2A19),
            2,
            3,
            CharacteristicProperties::READ | CharacteristicProperties::NOTIFY,
        ));
        service.add_characteristic(Characteristic::new(
            Uuid::sig(0x2A1A),
            6,
            7,
            CharacteristicProperties::WRITE,
        ));
        service
    }

    #[test]
    fn end_handles_backfill_on_add() {
        let service = service_with_chars();
        assert_eq!(service.characteristics[0].end_handle, 5);
        assert_eq!(service.characteristics[1].end_handle, 10);
    }

    #[test]
    fn missing_handles_exclude_known_descriptors() {
        let mut service = service_with_chars();
        let first = &mut service.characteristics[0];
        assert_eq!(first.missing_handles(), vec![4, 5]);

        first.descriptors.push(Descriptor {
            uuid: CCCD_UUID,
            handle: 4,
        });
        assert_eq!(first.missing_handles(), vec![5]);
        assert_eq!(first.cccd_handle(), Some(4));
    }

    #[test]
    fn subscription_state_codec() {
        assert_eq!(SubscriptionState::Notification.to_le_bytes(), [1, 0]);
        assert_eq!(
            SubscriptionState::from_buffer(&[2, 0]),
            SubscriptionState::Indication
        );
        assert_eq!(
            SubscriptionState::from_buffer(&[0]),
            SubscriptionState::NotSubscribed
        );
        assert!(!SubscriptionState::NotSubscribed.is_subscribed());
    }
}
