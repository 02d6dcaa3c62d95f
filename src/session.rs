use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_core::Stream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::device::{ConnectionState, DisconnectReason};
use crate::discovery::{DiscoveryState, DiscoveryStateMachine};
use crate::error::ErrorKind;
use crate::registry::{Attribute, AttributeRegistry};
use crate::transport::{Request, Requester, Response, Transport};
use crate::{
    Address, AdapterState, Characteristic, CharacteristicProperties, Descriptor, DeviceInstanceId, Error, InstanceId,
    Result, Service, SessionConfig, SessionEvent, Uuid,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Connection {
    cancel: watch::Sender<bool>,
    gate: Arc<tokio::sync::Mutex<()>>,
    discovery: Option<watch::Receiver<DiscoveryState>>,
    /// Set once the transport has established the link.
    connected: bool,
}

impl Connection {
    fn new() -> Self {
        Connection {
            cancel: watch::channel(false).0,
            gate: Default::default(),
            discovery: None,
            connected: false,
        }
    }

    fn discovery_state(&self) -> DiscoveryState {
        self.discovery
            .as_ref()
            .map_or(DiscoveryState::Idle, |state| *state.borrow())
    }

    /// A machine has been handed out and has neither finished nor been dropped.
    ///
    /// A machine that has not started yet still reports `Idle` but counts as in progress.
    fn discovery_in_progress(&self) -> bool {
        self.discovery
            .as_ref()
            .is_some_and(|state| state.has_changed().is_ok() && !state.borrow().is_terminal())
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    registry: Arc<Mutex<AttributeRegistry>>,
    connections: Mutex<HashMap<DeviceInstanceId, Connection>>,
    state: Mutex<AdapterState>,
    events: async_broadcast::Sender<SessionEvent>,
    _events: async_broadcast::InactiveReceiver<SessionEvent>,
}

/// One adapter: its transport, its attribute registry and its connections.
///
/// `AdapterSession` is cheap to clone; clones share the same state. Discoveries for different devices may run
/// concurrently, but each device has at most one discovery and one outstanding request at a time.
#[derive(Clone)]
pub struct AdapterSession {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AdapterSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterSession")
            .field("config", &self.inner.config)
            .field("state", &*lock(&self.inner.state))
            .finish_non_exhaustive()
    }
}

impl AdapterSession {
    /// Creates a closed session driving `transport`.
    pub fn new<T: Transport>(transport: T, config: SessionConfig) -> Self {
        Self::with_transport(Arc::new(transport), config)
    }

    /// Creates a closed session driving a shared `transport`.
    pub fn with_transport(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(config.event_capacity.max(1));
        sender.set_overflow(true);
        AdapterSession {
            inner: Arc::new(Inner {
                transport,
                registry: Arc::new(Mutex::new(AttributeRegistry::new())),
                connections: Mutex::new(HashMap::new()),
                state: Mutex::new(AdapterState::default()),
                events: sender,
                _events: receiver.deactivate(),
                config,
            }),
        }
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The current adapter state.
    pub fn state(&self) -> AdapterState {
        *lock(&self.inner.state)
    }

    /// A stream of [`SessionEvent`]s emitted from now on.
    ///
    /// Slow consumers lose the oldest events once [`SessionConfig::event_capacity`] are buffered.
    pub fn events(&self) -> impl Stream<Item = SessionEvent> + Send + Unpin {
        self.inner.events.new_receiver()
    }

    fn emit(&self, event: SessionEvent) {
        // Fails only when nobody is listening.
        let _ = self.inner.events.try_broadcast(event);
    }

    fn update_state(&self, update: impl FnOnce(&mut AdapterState)) {
        let state = {
            let mut state = lock(&self.inner.state);
            let before = *state;
            update(&mut state);
            if *state == before {
                return;
            }
            *state
        };
        debug!(?state, "adapter state changed");
        self.emit(SessionEvent::AdapterStateChanged(state));
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state().open {
            Ok(())
        } else {
            Err(ErrorKind::AdapterUnavailable.into())
        }
    }

    /// Opens the transport. Opening an open session does nothing.
    pub async fn open(&self) -> Result<()> {
        if self.state().open {
            return Ok(());
        }
        self.inner.transport.open().await?;
        info!("adapter opened");
        self.update_state(|state| state.open = true);
        Ok(())
    }

    /// Disconnects every device and closes the transport.
    pub async fn close(&self) -> Result<()> {
        if !self.state().open {
            return Ok(());
        }

        let devices: Vec<DeviceInstanceId> = lock(&self.inner.connections).keys().cloned().collect();
        for device in devices {
            if let Err(err) = self.disconnect(&device).await {
                warn!(%device, error = %err, "error disconnecting while closing adapter");
            }
        }

        let result = self.inner.transport.close().await;
        info!("adapter closed");
        self.update_state(|state| *state = AdapterState::default());
        result
    }

    /// Starts scanning for advertisements.
    pub async fn start_scan(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.transport.start_scan().await?;
        self.update_state(|state| state.scanning = true);
        Ok(())
    }

    /// Stops scanning for advertisements.
    pub async fn stop_scan(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.transport.stop_scan().await?;
        self.update_state(|state| state.scanning = false);
        Ok(())
    }

    /// Starts advertising the local GATT server.
    pub async fn start_advertising(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.transport.start_advertising().await?;
        self.update_state(|state| state.advertising = true);
        Ok(())
    }

    /// Stops advertising the local GATT server.
    pub async fn stop_advertising(&self) -> Result<()> {
        self.ensure_open()?;
        self.inner.transport.stop_advertising().await?;
        self.update_state(|state| state.advertising = false);
        Ok(())
    }

    /// Connects to the peer at `address` and registers it with an empty service list.
    ///
    /// The returned id is the address in string form.
    pub async fn connect(&self, address: Address) -> Result<DeviceInstanceId> {
        self.ensure_open()?;
        let device = DeviceInstanceId::from(address);

        {
            let mut connections = lock(&self.inner.connections);
            if connections.contains_key(&device) {
                return Err(Error::new(ErrorKind::AlreadyConnected, None, device.to_string()));
            }
            connections.insert(device.clone(), Connection::new());
        }
        let registered = lock(&self.inner.registry).add_device(device.clone(), Some(address), ConnectionState::Connecting);
        if let Err(err) = registered {
            lock(&self.inner.connections).remove(&device);
            return Err(err);
        }

        debug!(%device, "connecting");
        if let Err(err) = self.inner.transport.connect(&device, address).await {
            warn!(%device, error = %err, "connect failed");
            lock(&self.inner.connections).remove(&device);
            lock(&self.inner.registry).remove_device(&device);
            return Err(err);
        }

        let still_registered = match lock(&self.inner.connections).get_mut(&device) {
            Some(connection) => {
                connection.connected = true;
                true
            }
            None => false,
        };
        if !still_registered {
            // Disconnected while connecting: release the link the transport just made.
            warn!(%device, "disconnected while connecting");
            if let Err(err) = self.inner.transport.disconnect(&device).await {
                warn!(%device, error = %err, "error releasing link");
            }
            return Err(Error::new(ErrorKind::NotConnected, None, device.to_string()));
        }

        lock(&self.inner.registry)
            .set_connection_state(&device, ConnectionState::Connected)
            .map_err(|_| Error::new(ErrorKind::NotConnected, None, device.to_string()))?;
        info!(%device, "connected");
        self.emit(SessionEvent::Connected(device.clone()));
        Ok(device)
    }

    /// Disconnects `device`, aborting any discovery in progress and dropping its attributes.
    ///
    /// The attributes are dropped even if the transport reports an error, which is then returned.
    pub async fn disconnect(&self, device: &DeviceInstanceId) -> Result<()> {
        let connection = lock(&self.inner.connections)
            .remove(device)
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, None, device.to_string()))?;
        connection.cancel.send_replace(true);
        // Ignored: the device may already be gone if a link loss raced this call.
        let _ = lock(&self.inner.registry).set_connection_state(device, ConnectionState::Disconnecting);

        let result = self.inner.transport.disconnect(device).await;
        self.teardown(device, DisconnectReason::LOCAL_HOST_TERMINATED);
        result
    }

    /// Reports that the link to `device` went down without [`disconnect`][Self::disconnect] being called.
    ///
    /// Transports call this when the peer or the controller closes the link. Unknown devices are ignored.
    pub fn handle_disconnected(&self, device: &DeviceInstanceId, reason: DisconnectReason) {
        let Some(connection) = lock(&self.inner.connections).remove(device) else {
            debug!(%device, %reason, "disconnect for unknown device");
            return;
        };
        connection.cancel.send_replace(true);
        self.teardown(device, reason);
    }

    fn teardown(&self, device: &DeviceInstanceId, reason: DisconnectReason) {
        lock(&self.inner.registry).remove_device(device);
        info!(%device, %reason, "disconnected");
        self.emit(SessionEvent::Disconnected {
            device: device.clone(),
            reason,
        });
    }

    /// Discovers every service, characteristic and descriptor of a connected device.
    ///
    /// Attributes from an earlier discovery of the same device are dropped first. On failure the attributes found
    /// so far stay in the registry.
    pub async fn discover_services(&self, device: &DeviceInstanceId) -> Result<Vec<Service>> {
        let machine = {
            let mut connections = lock(&self.inner.connections);
            let connection = connections
                .get_mut(device)
                .filter(|connection| connection.connected)
                .ok_or_else(|| Error::new(ErrorKind::NotConnected, None, device.to_string()))?;
            if connection.discovery_in_progress() {
                return Err(Error::new(ErrorKind::AlreadyDiscovering, None, device.to_string()));
            }
            let requester = self.requester(device, connection);
            let machine = DiscoveryStateMachine::with_requester(requester, self.inner.registry.clone());
            connection.discovery = Some(machine.subscribe());

            // Cleared under the connections lock so no second discovery can interleave.
            let mut registry = lock(&self.inner.registry);
            for service in registry.services(device) {
                registry.remove_service(service.instance_id())?;
            }
            machine
        };

        match machine.run().await {
            Ok(()) => {
                self.emit(SessionEvent::DiscoveryComplete(device.clone()));
                Ok(self.services(device))
            }
            Err(err) => {
                self.emit(SessionEvent::DiscoveryAborted {
                    device: device.clone(),
                    reason: err.kind(),
                });
                Err(err)
            }
        }
    }

    /// Discovery progress for `device`; `None` if it is neither connected nor connecting.
    pub fn discovery_state(&self, device: &DeviceInstanceId) -> Option<DiscoveryState> {
        lock(&self.inner.connections)
            .get(device)
            .map(Connection::discovery_state)
    }

    /// Ids of the connected devices. Devices still connecting are not included.
    pub fn connected_devices(&self) -> Vec<DeviceInstanceId> {
        let mut devices: Vec<_> = lock(&self.inner.connections)
            .iter()
            .filter(|(_, connection)| connection.connected)
            .map(|(device, _)| device.clone())
            .collect();
        devices.sort();
        devices
    }

    fn requester(&self, device: &DeviceInstanceId, connection: &Connection) -> Requester {
        Requester::new(
            device.clone(),
            self.inner.transport.clone(),
            connection.gate.clone(),
            connection.cancel.subscribe(),
            self.inner.config.request_timeout,
            self.inner.config.max_retries,
        )
    }

    fn connected_requester(&self, device: &DeviceInstanceId) -> Result<Requester> {
        let connections = lock(&self.inner.connections);
        let connection = connections
            .get(device)
            .filter(|connection| connection.connected)
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, None, device.to_string()))?;
        Ok(self.requester(device, connection))
    }

    /// Runs `f` against the registry. The registry is locked for the duration of the call.
    pub fn registry<R>(&self, f: impl FnOnce(&AttributeRegistry) -> R) -> R {
        f(&lock(&self.inner.registry))
    }

    /// Finds any attribute by instance id.
    pub fn lookup(&self, instance_id: &InstanceId) -> Option<Attribute> {
        lock(&self.inner.registry).lookup(instance_id)
    }

    /// Gets a service by instance id.
    pub fn get_service(&self, service: &InstanceId) -> Option<Service> {
        lock(&self.inner.registry).service(service)
    }

    /// Gets a characteristic by instance id.
    pub fn get_characteristic(&self, characteristic: &InstanceId) -> Option<Characteristic> {
        lock(&self.inner.registry).characteristic(characteristic)
    }

    /// Gets a descriptor by instance id.
    pub fn get_descriptor(&self, descriptor: &InstanceId) -> Option<Descriptor> {
        lock(&self.inner.registry).descriptor(descriptor)
    }

    /// Services of `device`, in discovery order.
    pub fn services(&self, device: &DeviceInstanceId) -> Vec<Service> {
        lock(&self.inner.registry).services(device)
    }

    /// Services of `device` whose type is `uuid`.
    pub fn services_with_uuid(&self, device: &DeviceInstanceId, uuid: Uuid) -> Vec<Service> {
        lock(&self.inner.registry).services_with_uuid(device, uuid)
    }

    /// Characteristics of `service`, in discovery order.
    pub fn characteristics(&self, service: &InstanceId) -> Vec<Characteristic> {
        lock(&self.inner.registry).characteristics(service)
    }

    /// Descriptors of `characteristic`, in discovery order.
    pub fn descriptors(&self, characteristic: &InstanceId) -> Vec<Descriptor> {
        lock(&self.inner.registry).descriptors(characteristic)
    }

    /// Declares a service of the local GATT server.
    pub fn declare_local_service(&self, uuid: Uuid) -> Result<Service> {
        lock(&self.inner.registry).add_service(&DeviceInstanceId::local(), uuid)
    }

    /// Declares a characteristic of a local service, with an optional initial value.
    pub fn declare_local_characteristic(
        &self,
        service: &InstanceId,
        uuid: Uuid,
        properties: CharacteristicProperties,
        value: Option<Vec<u8>>,
    ) -> Result<Characteristic> {
        let mut registry = lock(&self.inner.registry);
        ensure_local(&registry, service, ErrorKind::UnknownService)?;
        let mut characteristic = registry.add_characteristic(service, uuid, properties)?;
        if let Some(value) = value {
            registry.set_characteristic_value(characteristic.instance_id(), value.clone())?;
            characteristic.value = Some(value);
        }
        Ok(characteristic)
    }

    /// Declares a descriptor of a local characteristic, with an optional initial value.
    pub fn declare_local_descriptor(
        &self,
        characteristic: &InstanceId,
        uuid: Uuid,
        value: Option<Vec<u8>>,
    ) -> Result<Descriptor> {
        let mut registry = lock(&self.inner.registry);
        ensure_local(&registry, characteristic, ErrorKind::UnknownCharacteristic)?;
        let mut descriptor = registry.add_descriptor(characteristic, uuid)?;
        if let Some(value) = value {
            registry.set_descriptor_value(descriptor.instance_id(), value.clone())?;
            descriptor.value = Some(value);
        }
        Ok(descriptor)
    }

    /// Removes a local service with its characteristics and descriptors.
    pub fn remove_local_service(&self, service: &InstanceId) -> Result<()> {
        let mut registry = lock(&self.inner.registry);
        ensure_local(&registry, service, ErrorKind::UnknownService)?;
        registry.remove_service(service)
    }

    /// Reads a characteristic's value.
    ///
    /// Remote characteristics are read from the peer and the cache is updated; local ones answer from the cache.
    pub async fn read_characteristic(&self, characteristic: &InstanceId) -> Result<Vec<u8>> {
        let (device, snapshot) = self.characteristic_with_owner(characteristic)?;
        if !snapshot.properties.read {
            return Err(not_permitted("read", characteristic));
        }

        let Some(handles) = snapshot.handles.filter(|_| !device.is_local()) else {
            return Ok(snapshot.value.unwrap_or_default());
        };
        let value = match self.connected_requester(&device)?.send(Request::Read { handle: handles.value }).await? {
            Response::Value(value) => value,
            other => return Err(unexpected(&device, &other)),
        };
        lock(&self.inner.registry).set_characteristic_value(characteristic, value.clone())?;
        Ok(value)
    }

    /// Writes a characteristic's value.
    ///
    /// Remote writes are acknowledged when the characteristic supports it and sent without response otherwise.
    pub async fn write_characteristic(&self, characteristic: &InstanceId, value: &[u8]) -> Result<()> {
        let (device, snapshot) = self.characteristic_with_owner(characteristic)?;
        let with_response = match snapshot.properties {
            CharacteristicProperties { write: true, .. } => true,
            CharacteristicProperties {
                write_without_response: true,
                ..
            } => false,
            _ => return Err(not_permitted("write", characteristic)),
        };

        if let Some(handles) = snapshot.handles.filter(|_| !device.is_local()) {
            let request = Request::Write {
                handle: handles.value,
                value: value.to_vec(),
                with_response,
            };
            match self.connected_requester(&device)?.send(request).await? {
                Response::Written => {}
                other => return Err(unexpected(&device, &other)),
            }
        }
        lock(&self.inner.registry).set_characteristic_value(characteristic, value.to_vec())
    }

    /// Reads a descriptor's value.
    pub async fn read_descriptor(&self, descriptor: &InstanceId) -> Result<Vec<u8>> {
        let (device, snapshot) = self.descriptor_with_owner(descriptor)?;
        let Some(handle) = snapshot.handle.filter(|_| !device.is_local()) else {
            return Ok(snapshot.value.unwrap_or_default());
        };
        let value = match self.connected_requester(&device)?.send(Request::Read { handle }).await? {
            Response::Value(value) => value,
            other => return Err(unexpected(&device, &other)),
        };
        lock(&self.inner.registry).set_descriptor_value(descriptor, value.clone())?;
        Ok(value)
    }

    /// Writes a descriptor's value.
    pub async fn write_descriptor(&self, descriptor: &InstanceId, value: &[u8]) -> Result<()> {
        let (device, snapshot) = self.descriptor_with_owner(descriptor)?;
        if let Some(handle) = snapshot.handle.filter(|_| !device.is_local()) {
            let request = Request::Write {
                handle,
                value: value.to_vec(),
                with_response: true,
            };
            match self.connected_requester(&device)?.send(request).await? {
                Response::Written => {}
                other => return Err(unexpected(&device, &other)),
            }
        }
        lock(&self.inner.registry).set_descriptor_value(descriptor, value.to_vec())
    }

    fn characteristic_with_owner(&self, characteristic: &InstanceId) -> Result<(DeviceInstanceId, Characteristic)> {
        let registry = lock(&self.inner.registry);
        registry
            .characteristic(characteristic)
            .zip(registry.owning_device(characteristic))
            .map(|(c, device)| (device, c))
            .ok_or_else(|| Error::new(ErrorKind::UnknownCharacteristic, None, characteristic.to_string()))
    }

    fn descriptor_with_owner(&self, descriptor: &InstanceId) -> Result<(DeviceInstanceId, Descriptor)> {
        let registry = lock(&self.inner.registry);
        registry
            .descriptor(descriptor)
            .zip(registry.owning_device(descriptor))
            .map(|(d, device)| (device, d))
            .ok_or_else(|| Error::new(ErrorKind::UnknownDescriptor, None, descriptor.to_string()))
    }
}

fn ensure_local(registry: &AttributeRegistry, instance_id: &InstanceId, missing: ErrorKind) -> Result<()> {
    match registry.owning_device(instance_id) {
        Some(device) if device.is_local() => Ok(()),
        Some(device) => Err(Error::new(
            ErrorKind::NotPermitted,
            None,
            format!("{instance_id} belongs to remote device {device}"),
        )),
        None => Err(Error::new(missing, None, instance_id.to_string())),
    }
}

fn not_permitted(operation: &str, instance_id: &InstanceId) -> Error {
    Error::new(
        ErrorKind::NotPermitted,
        None,
        format!("{instance_id} does not support {operation}"),
    )
}

fn unexpected(device: &DeviceInstanceId, response: &Response) -> Error {
    Error::new(
        ErrorKind::InvalidResponse,
        None,
        format!("{device}: unexpected response {response:?}"),
    )
}
