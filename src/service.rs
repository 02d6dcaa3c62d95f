use crate::transport::HandleRange;
use crate::{DeviceInstanceId, InstanceId, Uuid};

/// A GATT service, as cached in an [`AttributeRegistry`][crate::AttributeRegistry]
///
/// Values of this type are snapshots handed out by the registry. Several services on one device may share a
/// [`Uuid`]; the [`InstanceId`] tells them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub(crate) uuid: Uuid,
    pub(crate) instance_id: InstanceId,
    pub(crate) device_instance_id: DeviceInstanceId,
    pub(crate) label: Option<String>,
    pub(crate) is_primary: bool,
    pub(crate) handles: Option<HandleRange>,
    pub(crate) characteristics: Vec<InstanceId>,
}

impl Service {
    /// The [`Uuid`] identifying the type of this GATT service
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Unique id of this service instance
    #[inline]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// The device that exposes this service; [`DeviceInstanceId::local()`] for locally declared services.
    #[inline]
    pub fn device_instance_id(&self) -> &DeviceInstanceId {
        &self.device_instance_id
    }

    /// The label assigned with [`AttributeRegistry::set_service_label`][crate::AttributeRegistry::set_service_label].
    ///
    /// Use [`resolve_name`][crate::naming::resolve_name] for a displayable name.
    #[inline]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether this is a primary service of the device.
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    /// The ATT handles this service occupies on the peer, `None` for local declarations.
    #[inline]
    pub fn handles(&self) -> Option<HandleRange> {
        self.handles
    }

    /// Instance ids of this service's characteristics, in discovery or declaration order.
    #[inline]
    pub fn characteristic_ids(&self) -> &[InstanceId] {
        &self.characteristics
    }
}
