//! Common types shared across the link-layer boundary
//!
//! These mirror the shapes the RPC firmware uses for GATT primitives:
//! status codes, write operation kinds, and the parameter blocks passed to
//! the outbound primitives.

use crate::uuid::Uuid;

/// Connection handle assigned by the link layer
pub type ConnHandle = u16;

/// Handle value reserved for "no connection"
pub const CONN_HANDLE_INVALID: ConnHandle = 0xFFFF;

/// First valid attribute handle in a GATT table
pub const ATT_HANDLE_MIN: u16 = 0x0001;

/// Last valid attribute handle in a GATT table
pub const ATT_HANDLE_MAX: u16 = 0xFFFF;

/// Status code attached to every GATT completion event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GattStatus {
    /// Operation completed successfully
    Success,
    /// Invalid attribute handle
    InvalidHandle,
    /// Read not permitted on the attribute
    ReadNotPermitted,
    /// Write not permitted on the attribute
    WriteNotPermitted,
    /// Malformed PDU
    InvalidPdu,
    /// Link must be authenticated first
    InsufficientAuthentication,
    /// Request not supported by the peer
    RequestNotSupported,
    /// Offset past the end of the attribute value
    InvalidOffset,
    /// Link must be authorized first
    InsufficientAuthorization,
    /// Peer's prepared write queue is full
    PrepareQueueFull,
    /// No attribute found within the requested handle range. This is the
    /// expected end-of-iteration signal during discovery, not a failure.
    AttributeNotFound,
    /// Attribute cannot be read with a blob/offset read
    AttributeNotLong,
    /// Attribute value length is invalid for the operation
    InvalidAttributeValueLength,
    /// Unlikely error (catch-all defined by the protocol)
    Unlikely,
    /// Link must be encrypted first
    InsufficientEncryption,
    /// Peer ran out of resources
    InsufficientResources,
    /// ATT transaction timed out
    Timeout,
    /// No status observed yet, or the operation never reached the peer
    Unknown,
    /// Raw status code not known to this library
    Other(u16),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        *self == GattStatus::Success
    }

    /// Converts a raw status code reported by the link layer
    pub fn from_raw(code: u16) -> Self {
        match code {
            0x0000 => GattStatus::Success,
            0x0101 => GattStatus::InvalidHandle,
            0x0102 => GattStatus::ReadNotPermitted,
            0x0103 => GattStatus::WriteNotPermitted,
            0x0104 => GattStatus::InvalidPdu,
            0x0105 => GattStatus::InsufficientAuthentication,
            0x0106 => GattStatus::RequestNotSupported,
            0x0107 => GattStatus::InvalidOffset,
            0x0108 => GattStatus::InsufficientAuthorization,
            0x0109 => GattStatus::PrepareQueueFull,
            0x010A => GattStatus::AttributeNotFound,
            0x010B => GattStatus::AttributeNotLong,
            0x010D => GattStatus::InvalidAttributeValueLength,
            0x010E => GattStatus::Unlikely,
            0x010F => GattStatus::InsufficientEncryption,
            0x0111 => GattStatus::InsufficientResources,
            0x0200 => GattStatus::Timeout,
            other => GattStatus::Other(other),
        }
    }
}

/// GATT client write operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    /// Single write with response
    WriteRequest,
    /// Write without response (fire and forget)
    WriteCommand,
    /// One chunk of a queued long write
    PrepareWriteRequest,
    /// Commit all queued chunks atomically
    ExecuteWriteRequest,
}

/// Flags accompanying an execute write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecWriteFlag {
    /// Not an execute write
    Unused,
    /// Commit the prepared writes
    PreparedWrite,
}

/// Parameters for the outbound `write` primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteParams {
    pub operation: WriteOperation,
    pub flags: ExecWriteFlag,
    pub handle: u16,
    pub offset: u16,
    pub data: Vec<u8>,
}

/// Server-initiated handle value push types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvxType {
    /// Unacknowledged push
    Notification,
    /// Push requiring an explicit confirmation from the client
    Indication,
}

/// Parameters for the outbound `hvx` primitive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HvxParams {
    pub handle: u16,
    pub hvx_type: HvxType,
    pub data: Vec<u8>,
}

/// A service returned by primary service discovery. The UUID may carry the
/// unresolved marker when the 128-bit base is not yet registered with the
/// link layer.
#[derive(Debug, Clone)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub start_handle: u16,
    pub end_handle: u16,
}

/// A characteristic returned by characteristic discovery
#[derive(Debug, Clone)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub properties: crate::gatt::CharacteristicProperties,
}

/// A descriptor (or bare attribute) returned by descriptor discovery
#[derive(Debug, Clone)]
pub struct DiscoveredDescriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        assert!(GattStatus::from_raw(0).is_success());
        assert_eq!(GattStatus::from_raw(0x010A), GattStatus::AttributeNotFound);
        assert_eq!(GattStatus::from_raw(0xBEEF), GattStatus::Other(0xBEEF));
        assert!(!GattStatus::AttributeNotFound.is_success());
    }
}
