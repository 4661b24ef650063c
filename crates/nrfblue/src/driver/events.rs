//! Inbound events from the link layer
//!
//! The RPC transport decodes firmware events into these typed structures and
//! feeds them to an [`EventDispatcher`](super::dispatch::EventDispatcher).
//! Every event that pertains to a connection carries the connection handle so
//! per-connection components can discard events for other links.

use super::types::{
    ConnHandle, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, GattStatus,
    HvxType, WriteOperation,
};

/// Connection established
#[derive(Debug, Clone)]
pub struct ConnectedEvent {
    pub conn_handle: ConnHandle,
}

/// Connection terminated
#[derive(Debug, Clone)]
pub struct DisconnectedEvent {
    pub conn_handle: ConnHandle,
    /// Link-layer disconnect reason code
    pub reason: u8,
}

/// ATT MTU exchange completed; carries the effective negotiated MTU
#[derive(Debug, Clone)]
pub struct MtuExchangedEvent {
    pub conn_handle: ConnHandle,
    pub mtu: u16,
}

/// Response to `discover_primary_services`
#[derive(Debug, Clone)]
pub struct ServiceDiscoveryEvent {
    pub conn_handle: ConnHandle,
    pub status: GattStatus,
    pub services: Vec<DiscoveredService>,
}

/// Response to `discover_characteristics`
#[derive(Debug, Clone)]
pub struct CharacteristicDiscoveryEvent {
    pub conn_handle: ConnHandle,
    pub status: GattStatus,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

/// Response to `discover_descriptors`
#[derive(Debug, Clone)]
pub struct DescriptorDiscoveryEvent {
    pub conn_handle: ConnHandle,
    pub status: GattStatus,
    pub descriptors: Vec<DiscoveredDescriptor>,
}

/// Response to a `read` primitive
#[derive(Debug, Clone)]
pub struct ReadResponseEvent {
    pub conn_handle: ConnHandle,
    pub handle: u16,
    pub status: GattStatus,
    pub offset: u16,
    pub data: Vec<u8>,
}

/// Response to a `write` primitive (write request, prepare or execute)
#[derive(Debug, Clone)]
pub struct WriteResponseEvent {
    pub conn_handle: ConnHandle,
    pub handle: u16,
    pub status: GattStatus,
    pub operation: WriteOperation,
    pub offset: u16,
    pub data: Vec<u8>,
}

/// Transmit credits freed by the link layer's hardware queue. `count` slots
/// became available since the last credit event.
#[derive(Debug, Clone)]
pub struct TxCompleteEvent {
    pub conn_handle: ConnHandle,
    pub count: u8,
}

/// Client confirmed an indication
#[derive(Debug, Clone)]
pub struct IndicationConfirmedEvent {
    pub conn_handle: ConnHandle,
    pub handle: u16,
}

/// Server pushed a handle value (client side)
#[derive(Debug, Clone)]
pub struct HvxReceivedEvent {
    pub conn_handle: ConnHandle,
    pub handle: u16,
    pub hvx_type: HvxType,
    pub data: Vec<u8>,
}

/// Client wrote a local attribute (server side)
#[derive(Debug, Clone)]
pub struct WriteReceivedEvent {
    pub conn_handle: ConnHandle,
    pub handle: u16,
    pub data: Vec<u8>,
}

/// Where a timeout originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSource {
    GattClient,
    GattServer,
    Connection,
}

/// A timeout reported by the link layer
#[derive(Debug, Clone)]
pub struct TimeoutEvent {
    pub conn_handle: ConnHandle,
    pub source: TimeoutSource,
}

/// Every event the core consumes from the link layer
#[derive(Debug, Clone)]
pub enum BleEvent {
    Connected(ConnectedEvent),
    Disconnected(DisconnectedEvent),
    MtuExchanged(MtuExchangedEvent),
    ServicesDiscovered(ServiceDiscoveryEvent),
    CharacteristicsDiscovered(CharacteristicDiscoveryEvent),
    DescriptorsDiscovered(DescriptorDiscoveryEvent),
    ReadResponse(ReadResponseEvent),
    WriteResponse(WriteResponseEvent),
    WriteCmdTxComplete(TxCompleteEvent),
    NotificationTxComplete(TxCompleteEvent),
    IndicationConfirmed(IndicationConfirmedEvent),
    HvxReceived(HvxReceivedEvent),
    WriteReceived(WriteReceivedEvent),
    Timeout(TimeoutEvent),
}

/// Discriminant used as the subscription key in the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    MtuExchanged,
    ServicesDiscovered,
    CharacteristicsDiscovered,
    DescriptorsDiscovered,
    ReadResponse,
    WriteResponse,
    WriteCmdTxComplete,
    NotificationTxComplete,
    IndicationConfirmed,
    HvxReceived,
    WriteReceived,
    Timeout,
}

impl BleEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BleEvent::Connected(_) => EventKind::Connected,
            BleEvent::Disconnected(_) => EventKind::Disconnected,
            BleEvent::MtuExchanged(_) => EventKind::MtuExchanged,
            BleEvent::ServicesDiscovered(_) => EventKind::ServicesDiscovered,
            BleEvent::CharacteristicsDiscovered(_) => EventKind::CharacteristicsDiscovered,
            BleEvent::DescriptorsDiscovered(_) => EventKind::DescriptorsDiscovered,
            BleEvent::ReadResponse(_) => EventKind::ReadResponse,
            BleEvent::WriteResponse(_) => EventKind::WriteResponse,
            BleEvent::WriteCmdTxComplete(_) => EventKind::WriteCmdTxComplete,
            BleEvent::NotificationTxComplete(_) => EventKind::NotificationTxComplete,
            BleEvent::IndicationConfirmed(_) => EventKind::IndicationConfirmed,
            BleEvent::HvxReceived(_) => EventKind::HvxReceived,
            BleEvent::WriteReceived(_) => EventKind::WriteReceived,
            BleEvent::Timeout(_) => EventKind::Timeout,
        }
    }

    /// The connection this event belongs to
    pub fn conn_handle(&self) -> ConnHandle {
        match self {
            BleEvent::Connected(e) => e.conn_handle,
            BleEvent::Disconnected(e) => e.conn_handle,
            BleEvent::MtuExchanged(e) => e.conn_handle,
            BleEvent::ServicesDiscovered(e) => e.conn_handle,
            BleEvent::CharacteristicsDiscovered(e) => e.conn_handle,
            BleEvent::DescriptorsDiscovered(e) => e.conn_handle,
            BleEvent::ReadResponse(e) => e.conn_handle,
            BleEvent::WriteResponse(e) => e.conn_handle,
            BleEvent::WriteCmdTxComplete(e) => e.conn_handle,
            BleEvent::NotificationTxComplete(e) => e.conn_handle,
            BleEvent::IndicationConfirmed(e) => e.conn_handle,
            BleEvent::HvxReceived(e) => e.conn_handle,
            BleEvent::WriteReceived(e) => e.conn_handle,
            BleEvent::Timeout(e) => e.conn_handle,
        }
    }
}
