use crate::{Address, DeviceInstanceId, InstanceId};

/// Connection state of a [`Device`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// No link to the peer
    Disconnected,
    /// The driver is establishing the link
    Connecting,
    /// The link is up
    Connected,
    /// A disconnect has been requested but not confirmed
    Disconnecting,
}

/// A device owning GATT services: a connected peer, or the local GATT server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub(crate) instance_id: DeviceInstanceId,
    pub(crate) address: Option<Address>,
    pub(crate) connection_state: ConnectionState,
    pub(crate) services: Vec<InstanceId>,
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.instance_id, f)
    }
}

impl Device {
    /// This device's identifier
    #[inline]
    pub fn instance_id(&self) -> &DeviceInstanceId {
        &self.instance_id
    }

    /// The peer's address; `None` for the local device
    #[inline]
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    /// The connection status for this device
    #[inline]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    /// Whether this is the reserved local device
    #[inline]
    pub fn is_local(&self) -> bool {
        self.instance_id.is_local()
    }

    /// Instance ids of the services owned by this device, in discovery or declaration order
    #[inline]
    pub fn service_ids(&self) -> &[InstanceId] {
        &self.services
    }
}

/// Why a link went down, as an HCI reason code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DisconnectReason(pub u8);

impl DisconnectReason {
    /// Supervision timeout expired
    pub const CONNECTION_TIMEOUT: DisconnectReason = DisconnectReason(0x08);
    /// The peer closed the link
    pub const REMOTE_USER_TERMINATED: DisconnectReason = DisconnectReason(0x13);
    /// This host closed the link
    pub const LOCAL_HOST_TERMINATED: DisconnectReason = DisconnectReason(0x16);
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::CONNECTION_TIMEOUT => f.write_str("connection timeout"),
            Self::REMOTE_USER_TERMINATED => f.write_str("remote user terminated connection"),
            Self::LOCAL_HOST_TERMINATED => f.write_str("connection terminated by local host"),
            DisconnectReason(code) => write!(f, "HCI reason 0x{code:02x}"),
        }
    }
}
