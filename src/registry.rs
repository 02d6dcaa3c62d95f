//! The per-adapter GATT attribute cache.
//!
//! Attributes live in a flat arena keyed by [`InstanceId`]. Parents keep the ids of their children in insertion
//! order and children keep the id of their parent, so the Device → Service → Characteristic → Descriptor tree has
//! no owning cycles and any node can be found by id in one lookup.

use std::collections::HashMap;
use std::fmt::Display;

use tracing::{debug, trace};

use crate::device::ConnectionState;
use crate::error::ErrorKind;
use crate::id::InstanceIdAllocator;
use crate::transport::{CharacteristicHandles, DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService};
use crate::{
    Address, Characteristic, CharacteristicProperties, Descriptor, Device, DeviceInstanceId, Error, InstanceId,
    Result, Service, Uuid,
};

/// Any node of the attribute tree below a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// A service
    Service(Service),
    /// A characteristic
    Characteristic(Characteristic),
    /// A descriptor
    Descriptor(Descriptor),
}

impl Attribute {
    /// The attribute's instance id
    pub fn instance_id(&self) -> &InstanceId {
        match self {
            Attribute::Service(s) => &s.instance_id,
            Attribute::Characteristic(c) => &c.instance_id,
            Attribute::Descriptor(d) => &d.instance_id,
        }
    }

    /// The attribute's type
    pub fn uuid(&self) -> Uuid {
        match self {
            Attribute::Service(s) => s.uuid,
            Attribute::Characteristic(c) => c.uuid,
            Attribute::Descriptor(d) => d.uuid,
        }
    }
}

fn unknown(kind: ErrorKind, id: impl Display) -> Error {
    Error::new(kind, None, id.to_string())
}

/// Draws ids from `allocator` until one is not taken by an explicitly declared attribute.
fn fresh_instance_id(
    allocator: &InstanceIdAllocator,
    attributes: &HashMap<InstanceId, Attribute>,
    device: &DeviceInstanceId,
) -> InstanceId {
    loop {
        let instance_id = allocator.next_instance_id(device);
        if !attributes.contains_key(&instance_id) {
            return instance_id;
        }
        trace!(%instance_id, "skipping instance id taken by an explicit declaration");
    }
}

/// Owns every device, service, characteristic and descriptor known to one adapter.
///
/// The registry always contains the local device, owner of services declared by this host as a GATT server.
/// Accessors return snapshots; all mutation goes through the registry's own methods.
#[derive(Debug)]
pub struct AttributeRegistry {
    allocator: InstanceIdAllocator,
    devices: HashMap<DeviceInstanceId, Device>,
    attributes: HashMap<InstanceId, Attribute>,
}

impl Default for AttributeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeRegistry {
    /// Creates a registry holding only the local device.
    pub fn new() -> Self {
        Self::with_allocator(InstanceIdAllocator::new())
    }

    /// Creates a registry issuing instance ids from `allocator`.
    pub fn with_allocator(allocator: InstanceIdAllocator) -> Self {
        let local = DeviceInstanceId::local();
        let mut devices = HashMap::new();
        devices.insert(
            local.clone(),
            Device {
                instance_id: local,
                address: None,
                connection_state: ConnectionState::Connected,
                services: Vec::new(),
            },
        );
        AttributeRegistry {
            allocator,
            devices,
            attributes: HashMap::new(),
        }
    }

    /// The allocator issuing this registry's instance ids.
    pub fn allocator(&self) -> &InstanceIdAllocator {
        &self.allocator
    }

    /// Number of services, characteristics and descriptors held.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// Whether no attributes are held. The local device itself does not count.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Registers a remote device with an empty service list.
    pub fn add_device(
        &mut self,
        device: DeviceInstanceId,
        address: Option<Address>,
        connection_state: ConnectionState,
    ) -> Result<Device> {
        if self.devices.contains_key(&device) {
            return Err(unknown(ErrorKind::AlreadyConnected, &device));
        }
        let entry = Device {
            instance_id: device.clone(),
            address,
            connection_state,
            services: Vec::new(),
        };
        self.devices.insert(device, entry.clone());
        Ok(entry)
    }

    /// Updates the connection state recorded for `device`.
    pub fn set_connection_state(&mut self, device: &DeviceInstanceId, state: ConnectionState) -> Result<()> {
        let entry = self
            .devices
            .get_mut(device)
            .ok_or_else(|| unknown(ErrorKind::UnknownDevice, device))?;
        entry.connection_state = state;
        Ok(())
    }

    /// Removes `device` and, transitively, everything it owns.
    ///
    /// Removing an absent device does nothing. The local device is never removed, only emptied.
    pub fn remove_device(&mut self, device: &DeviceInstanceId) {
        let services = if device.is_local() {
            self.devices
                .get_mut(device)
                .map(|local| std::mem::take(&mut local.services))
        } else {
            self.devices.remove(device).map(|removed| removed.services)
        };

        let Some(services) = services else {
            return;
        };
        let before = self.attributes.len();
        for service in services {
            self.drop_service_subtree(&service);
        }
        debug!(%device, removed = before - self.attributes.len(), "removed device attributes");
    }

    /// Adds a service of type `uuid` to `device`.
    pub fn add_service(&mut self, device: &DeviceInstanceId, uuid: Uuid) -> Result<Service> {
        self.insert_service(device, None, uuid, true, None)
    }

    /// Adds a service under a caller-chosen instance id.
    ///
    /// Fails with [`DuplicateDeclaration`][ErrorKind::DuplicateDeclaration] if `instance_id` is taken.
    pub fn add_service_with_id(
        &mut self,
        device: &DeviceInstanceId,
        instance_id: InstanceId,
        uuid: Uuid,
    ) -> Result<Service> {
        self.insert_service(device, Some(instance_id), uuid, true, None)
    }

    pub(crate) fn add_discovered_service(
        &mut self,
        device: &DeviceInstanceId,
        discovered: &DiscoveredService,
    ) -> Result<Service> {
        self.insert_service(
            device,
            None,
            discovered.uuid,
            discovered.is_primary,
            Some(discovered.handles),
        )
    }

    fn insert_service(
        &mut self,
        device: &DeviceInstanceId,
        instance_id: Option<InstanceId>,
        uuid: Uuid,
        is_primary: bool,
        handles: Option<crate::transport::HandleRange>,
    ) -> Result<Service> {
        let owner = self
            .devices
            .get_mut(device)
            .ok_or_else(|| unknown(ErrorKind::UnknownDevice, device))?;
        let instance_id = match instance_id {
            Some(id) if self.attributes.contains_key(&id) => {
                return Err(unknown(ErrorKind::DuplicateDeclaration, &id));
            }
            Some(id) => id,
            None => fresh_instance_id(&self.allocator, &self.attributes, device),
        };

        let service = Service {
            uuid,
            instance_id: instance_id.clone(),
            device_instance_id: device.clone(),
            label: None,
            is_primary,
            handles,
            characteristics: Vec::new(),
        };
        owner.services.push(instance_id.clone());
        self.attributes
            .insert(instance_id.clone(), Attribute::Service(service.clone()));
        trace!(%device, service = %instance_id, %uuid, "added service");
        Ok(service)
    }

    /// Adds a characteristic of type `uuid` to the service `service`.
    ///
    /// Fails with [`UnknownService`][ErrorKind::UnknownService], leaving the registry unchanged, if there is no
    /// such service.
    pub fn add_characteristic(
        &mut self,
        service: &InstanceId,
        uuid: Uuid,
        properties: CharacteristicProperties,
    ) -> Result<Characteristic> {
        self.insert_characteristic(service, uuid, properties, None)
    }

    pub(crate) fn add_discovered_characteristic(
        &mut self,
        service: &InstanceId,
        discovered: &DiscoveredCharacteristic,
        end_handle: u16,
    ) -> Result<Characteristic> {
        let handles = CharacteristicHandles {
            declaration: discovered.declaration_handle,
            value: discovered.value_handle,
            end: end_handle,
        };
        self.insert_characteristic(service, discovered.uuid, discovered.properties, Some(handles))
    }

    fn insert_characteristic(
        &mut self,
        service: &InstanceId,
        uuid: Uuid,
        properties: CharacteristicProperties,
        handles: Option<CharacteristicHandles>,
    ) -> Result<Characteristic> {
        let Some(Attribute::Service(parent)) = self.attributes.get(service) else {
            return Err(unknown(ErrorKind::UnknownService, service));
        };
        let instance_id = fresh_instance_id(&self.allocator, &self.attributes, &parent.device_instance_id);
        if let Some(Attribute::Service(parent)) = self.attributes.get_mut(service) {
            parent.characteristics.push(instance_id.clone());
        }

        let characteristic = Characteristic {
            uuid,
            instance_id: instance_id.clone(),
            service_instance_id: service.clone(),
            properties,
            handles,
            value: None,
            descriptors: Vec::new(),
        };
        self.attributes
            .insert(instance_id.clone(), Attribute::Characteristic(characteristic.clone()));
        trace!(%service, characteristic = %instance_id, %uuid, "added characteristic");
        Ok(characteristic)
    }

    /// Adds a descriptor of type `uuid` to the characteristic `characteristic`.
    pub fn add_descriptor(&mut self, characteristic: &InstanceId, uuid: Uuid) -> Result<Descriptor> {
        self.insert_descriptor(characteristic, uuid, None)
    }

    pub(crate) fn add_discovered_descriptor(
        &mut self,
        characteristic: &InstanceId,
        discovered: &DiscoveredDescriptor,
    ) -> Result<Descriptor> {
        self.insert_descriptor(characteristic, discovered.uuid, Some(discovered.handle))
    }

    fn insert_descriptor(&mut self, characteristic: &InstanceId, uuid: Uuid, handle: Option<u16>) -> Result<Descriptor> {
        let device = self
            .owning_device(characteristic)
            .ok_or_else(|| unknown(ErrorKind::UnknownCharacteristic, characteristic))?;
        let Some(Attribute::Characteristic(_)) = self.attributes.get(characteristic) else {
            return Err(unknown(ErrorKind::UnknownCharacteristic, characteristic));
        };
        let instance_id = fresh_instance_id(&self.allocator, &self.attributes, &device);
        if let Some(Attribute::Characteristic(parent)) = self.attributes.get_mut(characteristic) {
            parent.descriptors.push(instance_id.clone());
        }

        let descriptor = Descriptor {
            uuid,
            instance_id: instance_id.clone(),
            characteristic_instance_id: characteristic.clone(),
            handle,
            value: None,
        };
        self.attributes
            .insert(instance_id.clone(), Attribute::Descriptor(descriptor.clone()));
        trace!(%characteristic, descriptor = %instance_id, %uuid, "added descriptor");
        Ok(descriptor)
    }

    /// Removes a service with all its characteristics and descriptors.
    pub fn remove_service(&mut self, service: &InstanceId) -> Result<()> {
        let Some(Attribute::Service(removed)) = self.attributes.get(service) else {
            return Err(unknown(ErrorKind::UnknownService, service));
        };
        if let Some(owner) = self.devices.get_mut(&removed.device_instance_id) {
            owner.services.retain(|id| id != service);
        }
        self.drop_service_subtree(service);
        Ok(())
    }

    fn drop_service_subtree(&mut self, service: &InstanceId) {
        let Some(Attribute::Service(removed)) = self.attributes.remove(service) else {
            return;
        };
        for characteristic in removed.characteristics {
            if let Some(Attribute::Characteristic(c)) = self.attributes.remove(&characteristic) {
                for descriptor in c.descriptors {
                    self.attributes.remove(&descriptor);
                }
            }
        }
    }

    /// Finds any attribute by instance id.
    pub fn lookup(&self, instance_id: &InstanceId) -> Option<Attribute> {
        self.attributes.get(instance_id).cloned()
    }

    /// Whether an attribute with this instance id exists.
    pub fn contains(&self, instance_id: &InstanceId) -> bool {
        self.attributes.contains_key(instance_id)
    }

    /// The device that transitively owns `instance_id`.
    pub fn owning_device(&self, instance_id: &InstanceId) -> Option<DeviceInstanceId> {
        match self.attributes.get(instance_id)? {
            Attribute::Service(s) => Some(s.device_instance_id.clone()),
            Attribute::Characteristic(c) => self.owning_device(&c.service_instance_id),
            Attribute::Descriptor(d) => self.owning_device(&d.characteristic_instance_id),
        }
    }

    /// Gets a device by id.
    pub fn device(&self, device: &DeviceInstanceId) -> Option<Device> {
        self.devices.get(device).cloned()
    }

    /// All devices, ordered by id. Includes the local device.
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.values().cloned().collect();
        devices.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        devices
    }

    /// Gets a service by instance id.
    pub fn service(&self, service: &InstanceId) -> Option<Service> {
        match self.attributes.get(service)? {
            Attribute::Service(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Gets a characteristic by instance id.
    pub fn characteristic(&self, characteristic: &InstanceId) -> Option<Characteristic> {
        match self.attributes.get(characteristic)? {
            Attribute::Characteristic(c) => Some(c.clone()),
            _ => None,
        }
    }

    /// Gets a descriptor by instance id.
    pub fn descriptor(&self, descriptor: &InstanceId) -> Option<Descriptor> {
        match self.attributes.get(descriptor)? {
            Attribute::Descriptor(d) => Some(d.clone()),
            _ => None,
        }
    }

    /// Services of `device` in discovery order. Empty for an unknown device.
    pub fn services(&self, device: &DeviceInstanceId) -> Vec<Service> {
        self.devices
            .get(device)
            .map(|d| d.services.iter().filter_map(|id| self.service(id)).collect())
            .unwrap_or_default()
    }

    /// Services of `device` whose type is `uuid`.
    pub fn services_with_uuid(&self, device: &DeviceInstanceId, uuid: Uuid) -> Vec<Service> {
        let mut services = self.services(device);
        services.retain(|s| s.uuid == uuid);
        services
    }

    /// Characteristics of `service` in discovery order. Empty for an unknown service.
    pub fn characteristics(&self, service: &InstanceId) -> Vec<Characteristic> {
        self.service(service)
            .map(|s| {
                s.characteristics
                    .iter()
                    .filter_map(|id| self.characteristic(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Characteristics of `service` whose type is `uuid`.
    pub fn characteristics_with_uuid(&self, service: &InstanceId, uuid: Uuid) -> Vec<Characteristic> {
        let mut characteristics = self.characteristics(service);
        characteristics.retain(|c| c.uuid == uuid);
        characteristics
    }

    /// Descriptors of `characteristic` in discovery order.
    pub fn descriptors(&self, characteristic: &InstanceId) -> Vec<Descriptor> {
        self.characteristic(characteristic)
            .map(|c| c.descriptors.iter().filter_map(|id| self.descriptor(id)).collect())
            .unwrap_or_default()
    }

    /// Replaces the cached value of a characteristic.
    pub fn set_characteristic_value(&mut self, characteristic: &InstanceId, value: Vec<u8>) -> Result<()> {
        match self.attributes.get_mut(characteristic) {
            Some(Attribute::Characteristic(c)) => {
                c.value = Some(value);
                Ok(())
            }
            _ => Err(unknown(ErrorKind::UnknownCharacteristic, characteristic)),
        }
    }

    /// Replaces the cached value of a descriptor.
    pub fn set_descriptor_value(&mut self, descriptor: &InstanceId, value: Vec<u8>) -> Result<()> {
        match self.attributes.get_mut(descriptor) {
            Some(Attribute::Descriptor(d)) => {
                d.value = Some(value);
                Ok(())
            }
            _ => Err(unknown(ErrorKind::UnknownDescriptor, descriptor)),
        }
    }

    /// Sets or clears the human label of a service.
    pub fn set_service_label(&mut self, service: &InstanceId, label: Option<String>) -> Result<()> {
        match self.attributes.get_mut(service) {
            Some(Attribute::Service(s)) => {
                s.label = label;
                Ok(())
            }
            _ => Err(unknown(ErrorKind::UnknownService, service)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::btuuid::{characteristics, descriptors, services};
    use crate::transport::HandleRange;

    fn registry_with(devices: &[&str]) -> AttributeRegistry {
        let mut registry = AttributeRegistry::new();
        for device in devices {
            registry
                .add_device(DeviceInstanceId::from(*device), None, ConnectionState::Connected)
                .unwrap();
        }
        registry
    }

    fn read_notify() -> CharacteristicProperties {
        CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        }
    }

    #[test]
    fn instance_ids_follow_the_shared_sequence() {
        let mut registry = registry_with(&["devA", "devB"]);
        let dev_a = DeviceInstanceId::from("devA");
        let dev_b = DeviceInstanceId::from("devB");

        let first = registry.add_service(&dev_a, services::BATTERY).unwrap();
        let second = registry.add_service(&dev_a, services::BATTERY).unwrap();
        let third = registry.add_service(&dev_b, services::HEART_RATE).unwrap();

        assert_eq!(first.instance_id().as_str(), "devA.1");
        assert_eq!(second.instance_id().as_str(), "devA.2");
        assert_eq!(third.instance_id().as_str(), "devB.3");
        assert_eq!(first.uuid(), second.uuid());
    }

    #[test]
    fn every_instance_id_is_unique() {
        let mut registry = registry_with(&["devA", "devB"]);
        let mut seen = HashSet::new();
        for device in ["devA", "devB", "local"] {
            let device = DeviceInstanceId::from(device);
            for _ in 0..3 {
                let service = registry.add_service(&device, services::BATTERY).unwrap();
                assert!(seen.insert(service.instance_id().clone()));
                for _ in 0..3 {
                    let c = registry
                        .add_characteristic(service.instance_id(), characteristics::BATTERY_LEVEL, read_notify())
                        .unwrap();
                    assert!(seen.insert(c.instance_id().clone()));
                    let d = registry
                        .add_descriptor(c.instance_id(), descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)
                        .unwrap();
                    assert!(seen.insert(d.instance_id().clone()));
                }
            }
        }
        assert_eq!(registry.len(), seen.len());
    }

    #[test]
    fn characteristic_for_unknown_service_leaves_registry_unchanged() {
        let mut registry = registry_with(&["devA"]);
        let dev_a = DeviceInstanceId::from("devA");
        registry.add_service(&dev_a, services::BATTERY).unwrap();
        let before = registry.len();

        let err = registry
            .add_characteristic(&InstanceId::from("devA.99"), characteristics::BATTERY_LEVEL, read_notify())
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnknownService);
        assert_eq!(registry.len(), before);
        assert!(registry.characteristics(&InstanceId::from("devA.1")).is_empty());
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut registry = registry_with(&["devA"]);
        let dev_a = DeviceInstanceId::from("devA");
        let service = registry.add_service(&dev_a, services::BATTERY).unwrap();

        let err = registry
            .add_service_with_id(&dev_a, service.instance_id().clone(), services::HEART_RATE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDeclaration);
        assert_eq!(registry.services(&dev_a).len(), 1);

        let custom = registry
            .add_service_with_id(&dev_a, InstanceId::from("devA.custom"), services::HEART_RATE)
            .unwrap();
        assert_eq!(registry.service(custom.instance_id()).unwrap().uuid(), services::HEART_RATE);
    }

    #[test]
    fn unknown_device_and_characteristic() {
        let mut registry = registry_with(&[]);
        let err = registry
            .add_service(&DeviceInstanceId::from("ghost"), services::BATTERY)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownDevice);

        let err = registry
            .add_descriptor(&InstanceId::from("ghost.1"), descriptors::VALID_RANGE)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownCharacteristic);
    }

    #[test]
    fn remove_device_cascades_and_spares_others() {
        let mut registry = registry_with(&["devA", "devB"]);
        let dev_a = DeviceInstanceId::from("devA");
        let dev_b = DeviceInstanceId::from("devB");

        let a_service = registry.add_service(&dev_a, services::BATTERY).unwrap();
        let a_char = registry
            .add_characteristic(a_service.instance_id(), characteristics::BATTERY_LEVEL, read_notify())
            .unwrap();
        let a_desc = registry
            .add_descriptor(a_char.instance_id(), descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)
            .unwrap();
        let b_service = registry.add_service(&dev_b, services::HEART_RATE).unwrap();
        let b_char = registry
            .add_characteristic(b_service.instance_id(), characteristics::HEART_RATE_MEASUREMENT, read_notify())
            .unwrap();

        registry.remove_device(&dev_a);

        assert!(registry.device(&dev_a).is_none());
        assert!(registry.lookup(a_service.instance_id()).is_none());
        assert!(registry.lookup(a_char.instance_id()).is_none());
        assert!(registry.lookup(a_desc.instance_id()).is_none());
        assert!(registry.lookup(b_service.instance_id()).is_some());
        assert!(registry.lookup(b_char.instance_id()).is_some());

        // idempotent
        registry.remove_device(&dev_a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn local_device_is_emptied_not_removed() {
        let mut registry = registry_with(&[]);
        let local = DeviceInstanceId::local();
        let service = registry.add_service(&local, services::BATTERY).unwrap();
        assert_eq!(service.instance_id().as_str(), "local.1");

        registry.remove_device(&local);
        assert!(registry.device(&local).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_service_detaches_from_device() {
        let mut registry = registry_with(&[]);
        let local = DeviceInstanceId::local();
        let keep = registry.add_service(&local, services::BATTERY).unwrap();
        let drop = registry.add_service(&local, services::HEART_RATE).unwrap();
        registry
            .add_characteristic(drop.instance_id(), characteristics::HEART_RATE_MEASUREMENT, read_notify())
            .unwrap();

        registry.remove_service(drop.instance_id()).unwrap();

        assert_eq!(registry.services(&local), vec![keep]);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.remove_service(drop.instance_id()).unwrap_err().kind(),
            ErrorKind::UnknownService
        );
    }

    #[test]
    fn enumeration_preserves_order_and_filters_by_uuid() {
        let mut registry = registry_with(&["devA"]);
        let dev_a = DeviceInstanceId::from("devA");
        let battery = registry.add_service(&dev_a, services::BATTERY).unwrap();
        registry.add_service(&dev_a, services::HEART_RATE).unwrap();
        registry.add_service(&dev_a, services::BATTERY).unwrap();

        let uuids: Vec<_> = registry.services(&dev_a).iter().map(Service::uuid).collect();
        assert_eq!(uuids, [services::BATTERY, services::HEART_RATE, services::BATTERY]);
        assert_eq!(registry.services_with_uuid(&dev_a, services::BATTERY).len(), 2);

        let level = registry
            .add_characteristic(battery.instance_id(), characteristics::BATTERY_LEVEL, read_notify())
            .unwrap();
        registry
            .add_characteristic(battery.instance_id(), characteristics::DEVICE_NAME, read_notify())
            .unwrap();
        assert_eq!(
            registry.characteristics_with_uuid(battery.instance_id(), characteristics::BATTERY_LEVEL),
            vec![level.clone()]
        );
        assert_eq!(registry.owning_device(level.instance_id()), Some(dev_a));
    }

    #[test]
    fn discovered_attributes_keep_handles() {
        let mut registry = registry_with(&["devA"]);
        let dev_a = DeviceInstanceId::from("devA");
        let service = registry
            .add_discovered_service(
                &dev_a,
                &DiscoveredService {
                    uuid: services::BATTERY,
                    handles: HandleRange { start: 0x10, end: 0x14 },
                    is_primary: true,
                },
            )
            .unwrap();
        let characteristic = registry
            .add_discovered_characteristic(
                service.instance_id(),
                &DiscoveredCharacteristic {
                    uuid: characteristics::BATTERY_LEVEL,
                    declaration_handle: 0x11,
                    value_handle: 0x12,
                    properties: read_notify(),
                },
                0x14,
            )
            .unwrap();
        assert!(characteristic.has_descriptors());
        assert_eq!(service.handles(), Some(HandleRange { start: 0x10, end: 0x14 }));
    }

    #[test]
    fn cached_values_and_labels() {
        let mut registry = registry_with(&[]);
        let local = DeviceInstanceId::local();
        let service = registry.add_service(&local, services::BATTERY).unwrap();
        let level = registry
            .add_characteristic(service.instance_id(), characteristics::BATTERY_LEVEL, read_notify())
            .unwrap();
        let cccd = registry
            .add_descriptor(level.instance_id(), descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION)
            .unwrap();

        registry.set_characteristic_value(level.instance_id(), vec![87]).unwrap();
        registry.set_descriptor_value(cccd.instance_id(), vec![1, 0]).unwrap();
        registry
            .set_service_label(service.instance_id(), Some("Main battery".into()))
            .unwrap();

        assert_eq!(registry.characteristic(level.instance_id()).unwrap().value(), Some(&[87][..]));
        assert_eq!(registry.descriptor(cccd.instance_id()).unwrap().value(), Some(&[1, 0][..]));
        assert_eq!(registry.service(service.instance_id()).unwrap().label(), Some("Main battery"));
        assert_eq!(
            registry
                .set_descriptor_value(level.instance_id(), vec![])
                .unwrap_err()
                .kind(),
            ErrorKind::UnknownDescriptor
        );
    }

    #[test]
    fn allocated_ids_skip_explicit_declarations() {
        let mut registry = registry_with(&[]);
        let local = DeviceInstanceId::local();
        let explicit = registry
            .add_service_with_id(&local, InstanceId::from("local.2"), services::DEVICE_INFORMATION)
            .unwrap();
        let first = registry.add_service(&local, services::BATTERY).unwrap();
        let second = registry.add_service(&local, services::HEART_RATE).unwrap();
        let level = registry
            .add_characteristic(first.instance_id(), characteristics::BATTERY_LEVEL, read_notify())
            .unwrap();

        assert_eq!(first.instance_id().as_str(), "local.1");
        assert_eq!(second.instance_id().as_str(), "local.3");
        assert_eq!(level.instance_id().as_str(), "local.4");
        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.service(explicit.instance_id()).unwrap().uuid(),
            services::DEVICE_INFORMATION
        );
        let ids: Vec<_> = registry.services(&local).iter().map(|s| s.instance_id().clone()).collect();
        assert_eq!(
            ids,
            [explicit.instance_id().clone(), first.instance_id().clone(), second.instance_id().clone()]
        );

        let err = registry
            .add_service_with_id(&local, InstanceId::from("local.3"), services::BATTERY)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateDeclaration);
    }
}
