#![warn(missing_docs)]

//! A Bluetooth Low Energy GATT host core: the attribute cache and service discovery engine that sits between an
//! application and a native BLE driver.
//!
//! Each physical adapter is represented by an [`AdapterSession`]. A session owns an [`AttributeRegistry`] holding
//! the Device → Service → Characteristic → Descriptor tree of every connected peer plus the services this host
//! declares as a GATT server, and it populates that tree by running a [`DiscoveryStateMachine`] against the peer.
//! The driver itself is reached through the [`Transport`] trait and exchanges decoded [`Request`]s and
//! [`Response`]s, so the crate knows nothing about the wire format or the serial link to the controller.
//!
//! # Usage
//!
//! ```rust,no_run
//!# use gatt_host::{AdapterSession, SessionConfig, Transport};
//!# async fn run(transport: impl Transport) -> gatt_host::Result<()> {
//!let session = AdapterSession::new(transport, SessionConfig::default());
//!session.open().await?;
//!
//!let device = session.connect("C0:FF:EE:00:11:22".parse()?).await?;
//!for service in session.discover_services(&device).await? {
//!    println!("{} {}", service.instance_id(), service.uuid());
//!    for characteristic in session.characteristics(service.instance_id()) {
//!        println!("  {} {:?}", characteristic.instance_id(), characteristic.properties());
//!    }
//!}
//!
//!session.disconnect(&device).await?;
//!#    Ok(())
//!# }
//! ```
//!
//! # Instance ids
//!
//! Several attributes of one device may share a [`Uuid`], so every attribute is also given an [`InstanceId`] of the
//! form `<device>.<sequence>`. The sequence is shared by all devices of a session and never repeats, which keeps ids
//! from a previous connection from aliasing attributes discovered after a reconnect.
//!
//! # Discovery
//!
//! Discovery walks the peer's handle space: primary services first, then the characteristics of each service, then
//! the descriptors of characteristics whose handle range leaves room for them. Each request is bounded by
//! [`SessionConfig::request_timeout`] and retried up to [`SessionConfig::max_retries`] times on transient failures.
//! A disconnect aborts discovery immediately; attributes found up to that point remain queryable until the device is
//! removed.
//!
//! # Feature flags
//!
//! The `serde` feature is available to enable serializing/deserializing identifiers, handle ranges, characteristic
//! properties and [`SessionConfig`].

mod adapter;
pub mod btuuid;
mod characteristic;
mod config;
mod descriptor;
mod device;
mod discovery;
pub mod error;
mod id;
pub mod naming;
mod registry;
mod service;
mod session;
pub mod transport;

pub use adapter::{AdapterFactory, AdapterState};
pub use btuuid::BluetoothUuidExt;
pub use characteristic::Characteristic;
pub use config::SessionConfig;
pub use descriptor::Descriptor;
pub use device::{ConnectionState, Device, DisconnectReason};
pub use discovery::{DiscoveryState, DiscoveryStateMachine};
pub use error::Error;
pub use id::{Address, DeviceInstanceId, InstanceId, InstanceIdAllocator};
pub use registry::{Attribute, AttributeRegistry};
pub use service::Service;
pub use session::AdapterSession;
pub use transport::{Request, Response, Transport};
pub use uuid::Uuid;

/// Convenience alias for a result with [`Error`]
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Events generated by an [`AdapterSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A device has been connected and registered
    Connected(DeviceInstanceId),
    /// A device has been disconnected and its attributes removed
    Disconnected {
        /// The device
        device: DeviceInstanceId,
        /// Why the link went down
        reason: DisconnectReason,
    },
    /// Discovery of a device reached [`DiscoveryState::Complete`]
    DiscoveryComplete(DeviceInstanceId),
    /// Discovery of a device reached [`DiscoveryState::Aborted`]
    DiscoveryAborted {
        /// The device
        device: DeviceInstanceId,
        /// The kind of error that ended discovery
        reason: error::ErrorKind,
    },
    /// The adapter was opened or closed, or started or stopped scanning or advertising
    AdapterStateChanged(AdapterState),
}

/// GATT characteristic properties as defined in the Bluetooth Core Specification, Vol 3, Part G, §3.3.1.1.
/// Extended properties are also included as defined in §3.3.3.1.
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicProperties {
    pub broadcast: bool,
    pub read: bool,
    pub write_without_response: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
    pub authenticated_signed_writes: bool,
    pub extended_properties: bool,
    pub reliable_write: bool,
    pub writable_auxiliaries: bool,
}

impl CharacteristicProperties {
    /// Raw transmutation from [`u32`].
    ///
    /// Extended properties are in the upper bits.
    pub fn from_bits(bits: u32) -> Self {
        CharacteristicProperties {
            broadcast: (bits & (1 << 0)) != 0,
            read: (bits & (1 << 1)) != 0,
            write_without_response: (bits & (1 << 2)) != 0,
            write: (bits & (1 << 3)) != 0,
            notify: (bits & (1 << 4)) != 0,
            indicate: (bits & (1 << 5)) != 0,
            authenticated_signed_writes: (bits & (1 << 6)) != 0,
            extended_properties: (bits & (1 << 7)) != 0,
            reliable_write: (bits & (1 << 8)) != 0,
            writable_auxiliaries: (bits & (1 << 9)) != 0,
        }
    }

    /// Raw transmutation to [`u32`].
    ///
    /// Extended properties are in the upper bits.
    pub fn to_bits(self) -> u32 {
        u32::from(self.broadcast)
            | (u32::from(self.read) << 1)
            | (u32::from(self.write_without_response) << 2)
            | (u32::from(self.write) << 3)
            | (u32::from(self.notify) << 4)
            | (u32::from(self.indicate) << 5)
            | (u32::from(self.authenticated_signed_writes) << 6)
            | (u32::from(self.extended_properties) << 7)
            | (u32::from(self.reliable_write) << 8)
            | (u32::from(self.writable_auxiliaries) << 9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_property_bits() {
        let props = CharacteristicProperties::from_bits(0x1a);
        assert!(props.read && props.write && props.notify);
        assert!(!props.indicate && !props.broadcast);
        assert_eq!(props.to_bits(), 0x1a);
    }
}
