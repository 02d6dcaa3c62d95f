use crate::{InstanceId, Uuid};

/// A GATT descriptor, as cached in an [`AttributeRegistry`][crate::AttributeRegistry]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub(crate) uuid: Uuid,
    pub(crate) instance_id: InstanceId,
    pub(crate) characteristic_instance_id: InstanceId,
    pub(crate) handle: Option<u16>,
    pub(crate) value: Option<Vec<u8>>,
}

impl Descriptor {
    /// The [`Uuid`] identifying the type of this GATT descriptor
    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Unique id of this descriptor instance
    #[inline]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    /// The characteristic this descriptor belongs to
    #[inline]
    pub fn characteristic_instance_id(&self) -> &InstanceId {
        &self.characteristic_instance_id
    }

    /// The ATT handle of this descriptor on the peer
    #[inline]
    pub fn handle(&self) -> Option<u16> {
        self.handle
    }

    /// The cached value of this descriptor
    #[inline]
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}
