//! Single and long (queued) writes
//!
//! Payloads that fit a single write request (`mtu - 3` bytes) go out in one
//! round trip. Anything larger uses the prepared-write procedure: chunks of
//! `mtu - 5` bytes are queued on the peer with prepare write requests, then
//! committed atomically with one execute write request.

use std::sync::{Arc, Mutex};

use crate::driver::events::WriteResponseEvent;
use crate::driver::{BleDriver, ExecWriteFlag, GattStatus, WriteOperation, WriteParams};
use crate::error::GattError;
use crate::gatt::{LONG_WRITE_OVERHEAD, WRITE_OVERHEAD};
use crate::peer::Peer;

/// Outcome of a finished write
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub handle: u16,
    pub status: GattStatus,
    /// The full payload the caller asked to write
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct WriterState {
    busy: bool,
    handle: u16,
    offset: usize,
    data: Vec<u8>,
    chunk_len: usize,
}

/// Drives one write at a time for a single connection
pub struct GattcWriter {
    driver: Arc<dyn BleDriver>,
    peer: Arc<Peer>,
    state: Mutex<WriterState>,
}

impl GattcWriter {
    pub fn new(driver: Arc<dyn BleDriver>, peer: Arc<Peer>) -> Self {
        Self {
            driver,
            peer,
            state: Mutex::new(WriterState {
                busy: false,
                handle: 0,
                offset: 0,
                data: Vec::new(),
                chunk_len: 0,
            }),
        }
    }

    /// Starts writing `data` to the attribute at `handle`
    pub fn write(&self, handle: u16, data: &[u8]) -> Result<(), GattError> {
        let mut state = self.state.lock().unwrap();
        if state.busy {
            return Err(GattError::InvalidState);
        }
        if data.is_empty() {
            return Err(GattError::EmptyValue);
        }
        state.handle = handle;
        state.offset = 0;
        state.data = data.to_vec();
        log::info!("Starting write to handle {}, len: {}", handle, data.len());
        self.write_next_chunk(&mut state)?;
        state.busy = true;
        Ok(())
    }

    /// Feeds a write response event. Returns the finished write when this
    /// event terminated it.
    pub fn handle_write_response(&self, event: &WriteResponseEvent) -> Option<WriteOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.busy || !self.peer.matches(event.conn_handle) {
            return None;
        }
        // Execute write responses carry no attribute handle of their own.
        if event.handle != state.handle && event.operation != WriteOperation::ExecuteWriteRequest {
            return None;
        }
        if !event.status.is_success() {
            return Some(Self::complete(&mut state, event.status));
        }

        state.offset += state.chunk_len;

        match event.operation {
            WriteOperation::WriteRequest | WriteOperation::ExecuteWriteRequest => {
                Some(Self::complete(&mut state, GattStatus::Success))
            }
            WriteOperation::PrepareWriteRequest => {
                if let Err(e) = self.write_next_chunk(&mut state) {
                    log::error!("Long write chunk at offset {} failed: {}", state.offset, e);
                    return Some(Self::complete(&mut state, GattStatus::Unknown));
                }
                None
            }
            WriteOperation::WriteCommand => {
                log::error!("Unexpected write operation in response: {:?}", event);
                Some(Self::complete(&mut state, GattStatus::Unknown))
            }
        }
    }

    /// Clears the busy flag after a disconnect so the next connection can
    /// write immediately
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.busy = false;
        state.data = Vec::new();
        state.offset = 0;
    }

    fn write_next_chunk(&self, state: &mut WriterState) -> Result<(), GattError> {
        let conn = self.peer.conn_handle().ok_or(GattError::NotConnected)?;
        let mtu = self.peer.mtu_size() as usize;

        let mut flags = ExecWriteFlag::Unused;
        let operation;
        if state.offset != 0 || state.data.len() > mtu - WRITE_OVERHEAD {
            let remaining = state.data.len() - state.offset;
            state.chunk_len = (mtu - LONG_WRITE_OVERHEAD).min(remaining);
            if state.chunk_len == 0 {
                operation = WriteOperation::ExecuteWriteRequest;
                flags = ExecWriteFlag::PreparedWrite;
            } else {
                operation = WriteOperation::PrepareWriteRequest;
            }
        } else {
            // Fits in a single write request.
            operation = WriteOperation::WriteRequest;
            state.chunk_len = state.data.len();
        }

        let chunk = state.data[state.offset..state.offset + state.chunk_len].to_vec();
        log::info!(
            "Writing chunk: handle: {}, offset: {}, len: {}, op: {:?}",
            state.handle,
            state.offset,
            chunk.len(),
            operation
        );
        self.driver.write(
            conn,
            &WriteParams {
                operation,
                flags,
                handle: state.handle,
                offset: state.offset as u16,
                data: chunk,
            },
        )?;
        Ok(())
    }

    fn complete(state: &mut WriterState, status: GattStatus) -> WriteOutcome {
        state.busy = false;
        WriteOutcome {
            handle: state.handle,
            status,
            data: std::mem::take(&mut state.data),
        }
    }
}
