//! Multi-chunk characteristic/descriptor reads
//!
//! A single read primitive returns at most `mtu - 1` bytes. The reader
//! keeps issuing reads at increasing offsets while full chunks come back
//! and reassembles the attribute value. Per the long-read termination rule,
//! a value whose length is an exact multiple of `mtu - 1` costs one extra
//! round trip that returns zero bytes; that empty continuation terminates
//! the read as a normal success.

use std::sync::{Arc, Mutex};

use crate::driver::events::ReadResponseEvent;
use crate::driver::{BleDriver, GattStatus};
use crate::error::GattError;
use crate::gatt::READ_OVERHEAD;
use crate::peer::Peer;

/// Outcome of a finished read
#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub handle: u16,
    pub status: GattStatus,
    /// Everything assembled before the read finished (empty on an
    /// immediately failed read)
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct ReaderState {
    busy: bool,
    handle: u16,
    offset: usize,
    data: Vec<u8>,
}

/// Drives one read at a time for a single connection
pub struct GattcReader {
    driver: Arc<dyn BleDriver>,
    peer: Arc<Peer>,
    state: Mutex<ReaderState>,
}

impl GattcReader {
    pub fn new(driver: Arc<dyn BleDriver>, peer: Arc<Peer>) -> Self {
        Self {
            driver,
            peer,
            state: Mutex::new(ReaderState {
                busy: false,
                handle: 0,
                offset: 0,
                data: Vec::new(),
            }),
        }
    }

    /// Starts reading the attribute at `handle` from offset zero
    pub fn read(&self, handle: u16) -> Result<(), GattError> {
        let mut state = self.state.lock().unwrap();
        if state.busy {
            return Err(GattError::InvalidState);
        }
        let conn = self.peer.conn_handle().ok_or(GattError::NotConnected)?;
        state.handle = handle;
        state.offset = 0;
        state.data = Vec::new();
        log::debug!("Starting read from handle {}", handle);
        self.driver.read(conn, handle, 0)?;
        state.busy = true;
        Ok(())
    }

    /// Feeds a read response event. Returns the finished read when this
    /// event terminated it; `None` while more chunks are outstanding or the
    /// event belongs elsewhere.
    pub fn handle_read_response(&self, event: &ReadResponseEvent) -> Option<ReadOutcome> {
        let mut state = self.state.lock().unwrap();
        if !state.busy || !self.peer.matches(event.conn_handle) || event.handle != state.handle {
            return None;
        }
        if !event.status.is_success() {
            return Some(Self::complete(&mut state, event.status));
        }

        let bytes_read = event.data.len();
        state.data.extend_from_slice(&event.data);
        state.offset += bytes_read;

        if bytes_read == self.peer.mtu_size() as usize - READ_OVERHEAD {
            // Full chunk; the value may continue past this offset.
            let conn = event.conn_handle;
            let (handle, offset) = (state.handle, state.offset);
            if let Err(e) = self.driver.read(conn, handle, offset as u16) {
                log::error!("Continuation read at offset {} failed: {}", offset, e);
                return Some(Self::complete(&mut state, GattStatus::Unknown));
            }
            None
        } else {
            Some(Self::complete(&mut state, GattStatus::Success))
        }
    }

    /// Clears the busy flag after a disconnect so the next connection can
    /// read immediately
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.busy = false;
        state.data = Vec::new();
        state.offset = 0;
    }

    fn complete(state: &mut ReaderState, status: GattStatus) -> ReadOutcome {
        state.busy = false;
        log::debug!(
            "Read from handle {} complete: {:?}, {} bytes",
            state.handle,
            status,
            state.data.len()
        );
        ReadOutcome {
            handle: state.handle,
            status,
            data: std::mem::take(&mut state.data),
        }
    }
}
