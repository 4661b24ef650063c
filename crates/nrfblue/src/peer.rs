//! Per-connection peer state
//!
//! A [`Peer`] owns the negotiated ATT MTU and the live connection handle for
//! one remote device. Operation managers hold a reference and consult it for
//! chunk sizing and event filtering; its state is reset on disconnect so the
//! same object can serve the next connection.

use std::sync::{Arc, Mutex};

use crate::driver::{BleDriver, ConnHandle};
use crate::error::GattError;
use crate::gatt::{MTU_SIZE_DEFAULT, MTU_SIZE_MAX, MTU_SIZE_MINIMUM};

/// The GATT role the remote device plays on this connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    /// Remote is the GATT server (we connected to it as a central)
    Server,
    /// Remote is the GATT client (it connected to us)
    Client,
}

#[derive(Debug)]
struct PeerState {
    conn_handle: Option<ConnHandle>,
    mtu: u16,
    mtu_exchanged: bool,
}

pub struct Peer {
    role: PeerRole,
    state: Mutex<PeerState>,
}

impl Peer {
    pub fn new(role: PeerRole) -> Arc<Self> {
        Arc::new(Self {
            role,
            state: Mutex::new(PeerState {
                conn_handle: None,
                mtu: MTU_SIZE_DEFAULT,
                mtu_exchanged: false,
            }),
        })
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn connected(&self) -> bool {
        self.state.lock().unwrap().conn_handle.is_some()
    }

    pub fn conn_handle(&self) -> Option<ConnHandle> {
        self.state.lock().unwrap().conn_handle
    }

    /// The ATT MTU currently in effect for this connection
    pub fn mtu_size(&self) -> u16 {
        self.state.lock().unwrap().mtu
    }

    /// True when this event belongs to the peer's live connection
    pub fn matches(&self, conn: ConnHandle) -> bool {
        self.state.lock().unwrap().conn_handle == Some(conn)
    }

    /// Records a new connection; MTU restarts at the protocol default
    pub fn on_connected(&self, conn: ConnHandle) {
        let mut state = self.state.lock().unwrap();
        state.conn_handle = Some(conn);
        state.mtu = MTU_SIZE_DEFAULT;
        state.mtu_exchanged = false;
    }

    /// Call after the disconnect event has been dispatched, so that
    /// per-connection components still match the connection handle while
    /// they drain their queues.
    pub fn on_disconnected(&self) {
        let mut state = self.state.lock().unwrap();
        state.conn_handle = None;
        state.mtu = MTU_SIZE_DEFAULT;
        state.mtu_exchanged = false;
    }

    /// Records the negotiated MTU from an MTU-exchange event. The exchange
    /// happens at most once per connection; later events are ignored.
    pub fn on_mtu_exchanged(&self, mtu: u16) {
        let mut state = self.state.lock().unwrap();
        if state.mtu_exchanged {
            log::warn!("Ignoring repeated MTU exchange (mtu {})", mtu);
            return;
        }
        state.mtu = mtu.clamp(MTU_SIZE_MINIMUM, MTU_SIZE_MAX);
        state.mtu_exchanged = true;
        log::info!("ATT MTU negotiated: {}", state.mtu);
    }

    /// Requests an MTU exchange from the link layer. The new MTU takes
    /// effect when the [`MtuExchanged`](crate::driver::BleEvent::MtuExchanged)
    /// event arrives.
    pub fn exchange_mtu(&self, driver: &dyn BleDriver, requested: u16) -> Result<(), GattError> {
        if !(MTU_SIZE_MINIMUM..=MTU_SIZE_MAX).contains(&requested) {
            return Err(GattError::InvalidMtu(requested));
        }
        let conn = {
            let state = self.state.lock().unwrap();
            if state.mtu_exchanged {
                return Err(GattError::MtuAlreadyExchanged);
            }
            state.conn_handle.ok_or(GattError::NotConnected)?
        };
        driver.exchange_mtu(conn, requested)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mtu_updates_once_per_connection() {
        let peer = Peer::new(PeerRole::Server);
        peer.on_connected(1);
        assert_eq!(peer.mtu_size(), MTU_SIZE_DEFAULT);

        peer.on_mtu_exchanged(185);
        assert_eq!(peer.mtu_size(), 185);

        peer.on_mtu_exchanged(247);
        assert_eq!(peer.mtu_size(), 185);

        peer.on_disconnected();
        peer.on_connected(2);
        assert_eq!(peer.mtu_size(), MTU_SIZE_DEFAULT);
        peer.on_mtu_exchanged(247);
        assert_eq!(peer.mtu_size(), 247);
    }

    #[test]
    fn event_filter_matches_live_connection_only() {
        let peer = Peer::new(PeerRole::Server);
        assert!(!peer.matches(1));
        peer.on_connected(1);
        assert!(peer.matches(1));
        assert!(!peer.matches(2));
        peer.on_disconnected();
        assert!(!peer.matches(1));
    }
}
