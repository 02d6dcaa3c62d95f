//! Identifiers for devices and GATT attributes

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ErrorKind;
use crate::{Error, Result};

/// Identifies a device owning GATT attributes.
///
/// Remote devices are identified by their address in string form (`AA:BB:CC:DD:EE:FF`); services this host
/// declares as a GATT server belong to [`DeviceInstanceId::local()`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceInstanceId(String);

impl DeviceInstanceId {
    const LOCAL: &'static str = "local";

    /// Creates an identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        DeviceInstanceId(id.into())
    }

    /// The reserved owner of locally declared services.
    pub fn local() -> Self {
        DeviceInstanceId(Self::LOCAL.to_owned())
    }

    /// Whether this is the reserved local device.
    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceInstanceId {
    fn from(id: &str) -> Self {
        DeviceInstanceId::new(id)
    }
}

impl From<Address> for DeviceInstanceId {
    fn from(address: Address) -> Self {
        DeviceInstanceId(address.to_string())
    }
}

/// Identifies a service, characteristic or descriptor for the lifetime of a registry.
///
/// The string form is `<device instance id>.<sequence>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceId(String);

impl InstanceId {
    /// Creates an identifier from its string form.
    pub fn new(id: impl Into<String>) -> Self {
        InstanceId(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        InstanceId::new(id)
    }
}

/// A 48-bit Bluetooth device address, stored most significant octet first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address(pub [u8; 6]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::new(ErrorKind::InvalidParameter, None, format!("invalid address {s:?}"));
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().filter(|p| p.len() == 2).ok_or_else(invalid)?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Address(octets))
    }
}

/// Issues instance identifiers for GATT attributes.
///
/// A single sequence is shared by every device, so `devA.1`, `devA.2` may be followed by `devB.3`. The
/// sequence starts at 1 and is advanced atomically, which keeps identifiers unique even when discoveries for
/// several devices complete concurrently.
#[derive(Debug)]
pub struct InstanceIdAllocator {
    next: AtomicU64,
}

impl InstanceIdAllocator {
    /// Creates an allocator whose first identifier has sequence number 1.
    pub const fn new() -> Self {
        InstanceIdAllocator { next: AtomicU64::new(1) }
    }

    /// Allocates the next identifier for an attribute owned by `device`.
    pub fn next_instance_id(&self, device: &DeviceInstanceId) -> InstanceId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        InstanceId(format!("{device}.{seq}"))
    }

    /// Restarts the sequence at 1.
    ///
    /// Only safe on an allocator whose registry is empty, otherwise previously issued identifiers repeat.
    pub fn reset(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

impl Default for InstanceIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
