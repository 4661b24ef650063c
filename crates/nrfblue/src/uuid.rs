//! UUID types and the vendor base registry
//!
//! The link layer addresses UUIDs as a 16-bit value plus a "type" tag that
//! selects a registered 128-bit base. The Bluetooth SIG base is always
//! known; vendor-specific bases are registered on demand during discovery.
//! A discovered attribute whose base has not been registered yet carries the
//! [`UuidBase::Unresolved`] marker until a point read of its declaration
//! fetches the raw 128-bit value.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use crate::driver::BleDriver;
use crate::error::GattError;

/// The Bluetooth SIG base UUID (0000xxxx-0000-1000-8000-00805F9B34FB),
/// big-endian with the 16-bit slot zeroed
pub const SIG_UUID_BASE: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
];

/// A full 128-bit UUID, stored big-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128(pub [u8; 16]);

impl Uuid128 {
    /// Builds from the little-endian wire order used in attribute payloads.
    /// Returns `None` unless exactly 16 bytes are supplied.
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 16 {
            return None;
        }
        let mut uuid = [0u8; 16];
        for (i, b) in bytes.iter().rev().enumerate() {
            uuid[i] = *b;
        }
        Some(Uuid128(uuid))
    }

    /// The base template: this UUID with the 16-bit slot (bytes 2..4) zeroed
    pub fn base(&self) -> Uuid128 {
        let mut base = self.0;
        base[2] = 0;
        base[3] = 0;
        Uuid128(base)
    }

    /// The 16-bit value occupying bytes 2..4
    pub fn uuid16(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    /// A new UUID with this UUID's base and the given 16-bit value
    pub fn with_uuid16(&self, value: u16) -> Uuid128 {
        let mut uuid = self.base().0;
        let be = value.to_be_bytes();
        uuid[2] = be[0];
        uuid[3] = be[1];
        Uuid128(uuid)
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let u = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            u[0], u[1], u[2], u[3], u[4], u[5], u[6], u[7],
            u[8], u[9], u[10], u[11], u[12], u[13], u[14], u[15]
        )
    }
}

/// Which 128-bit base a 16-bit UUID value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UuidBase {
    /// The Bluetooth SIG base
    Sig,
    /// A registered vendor base, identified by the link layer's type tag
    Vendor(u8),
    /// Vendor base seen during discovery but not yet registered
    Unresolved,
}

/// A UUID as the core handles it: 16-bit value plus base discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid {
    pub value: u16,
    pub base: UuidBase,
}

impl Uuid {
    pub const fn sig(value: u16) -> Self {
        Uuid {
            value,
            base: UuidBase::Sig,
        }
    }

    pub const fn vendor(value: u16, base_type: u8) -> Self {
        Uuid {
            value,
            base: UuidBase::Vendor(base_type),
        }
    }

    /// Placeholder for a discovered attribute whose base is unknown
    pub const fn unresolved() -> Self {
        Uuid {
            value: 0,
            base: UuidBase::Unresolved,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.base != UuidBase::Unresolved
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            UuidBase::Sig => write!(f, "{:04x}", self.value),
            UuidBase::Vendor(tag) => write!(f, "{:04x} (base {})", self.value, tag),
            UuidBase::Unresolved => write!(f, "{:04x} (unresolved)", self.value),
        }
    }
}

/// Registry of 128-bit bases and the type tags the link layer assigned them.
///
/// Registering a base already known to the registry returns the existing tag
/// without another driver round trip, so each distinct base costs exactly
/// one registration.
pub struct UuidRegistry {
    bases: Mutex<HashMap<Uuid128, u8>>,
}

impl UuidRegistry {
    pub fn new() -> Self {
        Self {
            bases: Mutex::new(HashMap::new()),
        }
    }

    /// Register `base` with the link layer (or look up its existing tag)
    pub fn register(&self, driver: &dyn BleDriver, base: Uuid128) -> Result<u8, GattError> {
        let mut bases = self.bases.lock().unwrap();
        if let Some(tag) = bases.get(&base) {
            return Ok(*tag);
        }
        let tag = driver.register_uuid_base(&base.0)?;
        log::info!("Registered vendor UUID base {} as type {}", base, tag);
        bases.insert(base, tag);
        Ok(tag)
    }

    /// Resolve the little-endian UUID bytes read from an attribute
    /// declaration. Anything other than exactly 16 bytes is a decode error.
    pub fn resolve_bytes(&self, driver: &dyn BleDriver, bytes: &[u8]) -> Result<Uuid, GattError> {
        let full = Uuid128::from_le_bytes(bytes).ok_or(GattError::Decode(bytes.len()))?;
        self.resolve(driver, full)
    }

    /// Resolve a full 128-bit UUID read from an attribute declaration into a
    /// 16-bit value plus registered base
    pub fn resolve(&self, driver: &dyn BleDriver, full: Uuid128) -> Result<Uuid, GattError> {
        if full.base() == Uuid128(SIG_UUID_BASE) {
            return Ok(Uuid::sig(full.uuid16()));
        }
        let tag = self.register(driver, full.base())?;
        Ok(Uuid::vendor(full.uuid16(), tag))
    }

    /// Expand a resolved UUID back to its 128-bit form, if the base is known
    pub fn expand(&self, uuid: Uuid) -> Option<Uuid128> {
        match uuid.base {
            UuidBase::Sig => Some(Uuid128(SIG_UUID_BASE).with_uuid16(uuid.value)),
            UuidBase::Vendor(tag) => {
                let bases = self.bases.lock().unwrap();
                bases
                    .iter()
                    .find(|(_, t)| **t == tag)
                    .map(|(base, _)| base.with_uuid16(uuid.value))
            }
            UuidBase::Unresolved => None,
        }
    }
}

impl Default for UuidRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn le_round_trip() {
        let le: Vec<u8> = (0u8..16).collect();
        let uuid = Uuid128::from_le_bytes(&le).unwrap();
        assert_eq!(uuid.0[0], 15);
        assert_eq!(uuid.0[15], 0);
        assert!(Uuid128::from_le_bytes(&le[..15]).is_none());
    }

    #[test]
    fn base_split_and_combine() {
        let full = Uuid128(SIG_UUID_BASE).with_uuid16(0x180F);
        assert_eq!(full.uuid16(), 0x180F);
        assert_eq!(full.base(), Uuid128(SIG_UUID_BASE));
        assert_eq!(full.with_uuid16(0x2902).uuid16(), 0x2902);
    }

    #[test]
    fn display_formats_dashed() {
        let base = Uuid128(SIG_UUID_BASE).with_uuid16(0x180F);
        assert_eq!(base.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
    }
}
