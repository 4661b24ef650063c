//! Error types for the nrfblue library
//!
//! Synchronous violations (bad arguments, wrong state) surface as
//! [`GattError`] before anything is queued. Asynchronous failures never
//! surface here; they are delivered through each operation's completion
//! callback as a [`CompletionReason`](crate::gatt::CompletionReason).

use thiserror::Error;

use crate::driver::DriverError;

#[derive(Error, Debug)]
pub enum GattError {
    /// An operation of the same kind is already in progress
    #[error("operation already in progress")]
    InvalidState,

    /// Write payloads must carry at least one byte
    #[error("value must be at least one byte")]
    EmptyValue,

    /// Payload exceeds what a single PDU can carry
    #[error("value length {len} exceeds maximum {max}")]
    DataTooLong { len: usize, max: usize },

    /// Requested MTU outside the supported range
    #[error("MTU {0} outside supported range")]
    InvalidMtu(u16),

    /// The MTU has already been exchanged on this connection
    #[error("MTU already exchanged for this connection")]
    MtuAlreadyExchanged,

    /// No active connection for the operation
    #[error("not connected")]
    NotConnected,

    /// Peer is not subscribed to the characteristic
    #[error("client is not subscribed")]
    NotSubscribed,

    /// The characteristic's properties do not allow the operation
    #[error("operation not supported by the characteristic")]
    OperationNotSupported,

    /// A UUID resolution read returned a payload of unexpected length
    #[error("malformed UUID payload: expected 16 bytes, got {0}")]
    Decode(usize),

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}
