//! Link-layer boundary
//!
//! The radio, controller and serial RPC marshalling live in external
//! firmware. This module defines the narrow surface the GATT core needs from
//! it: a handful of fire-and-forget primitives ([`BleDriver`]) whose
//! completions arrive asynchronously as [`BleEvent`]s through the
//! [`EventDispatcher`].

pub mod dispatch;
pub mod events;
pub mod types;

use thiserror::Error;

pub use self::dispatch::{EventDispatcher, EventHandler, SubscriptionId};
pub use self::events::{BleEvent, EventKind};
pub use self::types::{
    ConnHandle, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, ExecWriteFlag,
    GattStatus, HvxParams, HvxType, WriteOperation, WriteParams, ATT_HANDLE_MAX, ATT_HANDLE_MIN,
    CONN_HANDLE_INVALID,
};

/// Errors returned synchronously by driver primitives
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("invalid connection handle")]
    InvalidConnectionHandle,

    #[error("driver busy with a previous operation")]
    Busy,

    #[error("no resources available in the link layer")]
    NoResources,

    #[error("invalid parameter")]
    InvalidParameter,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Outbound GATT primitives.
///
/// Every method except [`register_uuid_base`](Self::register_uuid_base)
/// returns as soon as the command has been handed to the transport; the
/// outcome arrives later as an event on the dispatcher. Implementations must
/// be callable from any thread.
pub trait BleDriver: Send + Sync {
    /// Discover primary services starting at `start_handle`. Completion:
    /// [`BleEvent::ServicesDiscovered`].
    fn discover_primary_services(
        &self,
        conn: ConnHandle,
        start_handle: u16,
    ) -> Result<(), DriverError>;

    /// Discover characteristics within a handle range. Completion:
    /// [`BleEvent::CharacteristicsDiscovered`].
    fn discover_characteristics(
        &self,
        conn: ConnHandle,
        start_handle: u16,
        end_handle: u16,
    ) -> Result<(), DriverError>;

    /// Discover descriptors within a handle range. Completion:
    /// [`BleEvent::DescriptorsDiscovered`].
    fn discover_descriptors(
        &self,
        conn: ConnHandle,
        start_handle: u16,
        end_handle: u16,
    ) -> Result<(), DriverError>;

    /// Read an attribute value starting at `offset`. Completion:
    /// [`BleEvent::ReadResponse`].
    fn read(&self, conn: ConnHandle, handle: u16, offset: u16) -> Result<(), DriverError>;

    /// Issue a write operation. Completion: [`BleEvent::WriteResponse`] for
    /// acknowledged operations, [`BleEvent::WriteCmdTxComplete`] credits for
    /// write commands.
    fn write(&self, conn: ConnHandle, params: &WriteParams) -> Result<(), DriverError>;

    /// Push a handle value to the client. Completion:
    /// [`BleEvent::NotificationTxComplete`] credits for notifications,
    /// [`BleEvent::IndicationConfirmed`] for indications.
    fn hvx(&self, conn: ConnHandle, params: &HvxParams) -> Result<(), DriverError>;

    /// Request an ATT MTU exchange. Completion: [`BleEvent::MtuExchanged`].
    fn exchange_mtu(&self, conn: ConnHandle, client_mtu: u16) -> Result<(), DriverError>;

    /// Register a 128-bit vendor UUID base with the link layer, returning
    /// the type tag the firmware will use for 16-bit UUIDs derived from it.
    fn register_uuid_base(&self, base: &[u8; 16]) -> Result<u8, DriverError>;
}
