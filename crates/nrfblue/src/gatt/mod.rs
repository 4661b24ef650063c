//! GATT (Generic Attribute Profile) state-machine layer
//!
//! Client-side discovery and read/write machinery, server-side
//! notification/indication machinery, and the task queuing that keeps at
//! most one primitive of each kind outstanding per connection.

pub mod cache;
pub mod client;
pub mod discovery;
pub mod managers;
pub mod queue;
pub mod reader;
pub mod server;
pub mod types;
pub mod writer;


pub use cache::ValueCache;
pub use client::{GattcDatabase, NotificationHandler};
pub use discovery::{DatabaseDiscoverer, DiscoveryCallback, DiscoveryResult};
pub use managers::{
    GattcOperationManager, GattsOperationManager, NotifyCallback, NotifyResult, ReadCallback,
    ReadResult, WriteCallback, WriteResult,
};
pub use queue::{Begun, TaskQueue};
pub use reader::GattcReader;
pub use server::{GattsCharacteristic, GattsDatabase, SubscriptionChangeHandler};
pub use types::{
    Characteristic, CharacteristicProperties, CompletionReason, Descriptor, Service,
    SubscriptionState, CCCD_UUID, LONG_WRITE_OVERHEAD, MTU_SIZE_DEFAULT, MTU_SIZE_MAX,
    MTU_SIZE_MINIMUM, NOTIFICATION_OVERHEAD, READ_OVERHEAD, WRITE_OVERHEAD,
};
pub use writer::GattcWriter;
