use crate::transport::CharacteristicHandles;
use crate::{CharacteristicProperties, InstanceId, Uuid};

/// A GATT characteristic, as cached in an [`AttributeRegistry`][crate::AttributeRegistry]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub(crate) uuid: Uuid,
    pub(crate) instance_id: InstanceId,
    pub(crate) service_instance_id: InstanceId,
    pub(crate) properties: CharacteristicProperties,
    pub(crate) handles: Option<CharacteristicHandles>,
    pub(crate) value: Option<Vec<u8>>,
    pub(crate) descriptors: Vec<InstanceId>,
}

impl Characteristic {
    /// The [`Uuid`] identifying the type of this GATT characteristic
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Unique id of this characteristic instance
    #[inline]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// The service this characteristic belongs to
    #[inline]
    pub fn service_instance_id(&self) -> &InstanceId {
        &self.service_instance_id
    }

    /// The properties of this this GATT characteristic.
    ///
    /// Characteristic properties indicate which operations (e.g. read, write, notify, etc) may be performed on this
    /// characteristic.
    #[inline]
    pub fn properties(&self) -> CharacteristicProperties {
        self.properties
    }

    /// The ATT handles of this characteristic on the peer, `None` for local declarations.
    #[inline]
    pub fn handles(&self) -> Option<CharacteristicHandles> {
        self.handles
    }

    /// Whether the peer has descriptors for this characteristic.
    ///
    /// True when handles follow the value handle inside the characteristic's range. Local characteristics report
    /// whether any descriptor has been declared.
    pub fn has_descriptors(&self) -> bool {
        match self.handles {
            Some(handles) => handles.value < handles.end,
            None => !self.descriptors.is_empty(),
        }
    }

    /// The cached value of this characteristic, if it has been read, written or declared with one
    #[inline]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Instance ids of this characteristic's descriptors.
    #[inline]
    pub fn descriptor_ids(&self) -> &[InstanceId] {
        &self.descriptors
    }
}
