//! nrfblue - a host-side BLE GATT layer for serial-attached link layers
//!
//! The radio and controller live in external firmware reached over a serial
//! RPC transport; this library is the object model and event-dispatch layer
//! above it. It implements GATT database discovery, MTU-aware long
//! reads/writes, write-without-response credit management and server-side
//! notification/indication queuing, with exactly one primitive of each
//! operation kind outstanding per connection.
//!
//! The transport side implements the [`BleDriver`] trait and feeds decoded
//! firmware events into an [`EventDispatcher`] from its event-processing
//! thread; everything else hangs off those two objects.

pub mod driver;
pub mod error;
pub mod gatt;
pub mod peer;
pub mod uuid;

// Re-export common types for convenience
pub use driver::{
    BleDriver, BleEvent, ConnHandle, DriverError, EventDispatcher, EventKind, GattStatus,
};
pub use error::GattError;
pub use gatt::{
    Characteristic, CharacteristicProperties, CompletionReason, DatabaseDiscoverer, Descriptor,
    GattcDatabase, GattcOperationManager, GattsCharacteristic, GattsDatabase,
    GattsOperationManager, Service, SubscriptionState,
};
pub use peer::{Peer, PeerRole};
pub use uuid::{Uuid, Uuid128, UuidRegistry};
