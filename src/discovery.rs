//! Interrogation of a connected peripheral's GATT database.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::{AttError, AttErrorCode, ErrorKind};
use crate::registry::AttributeRegistry;
use crate::transport::{DiscoveredCharacteristic, HandleRange, Request, Requester, Response, Transport};
use crate::{DeviceInstanceId, Error, InstanceId, Result, SessionConfig};

/// Progress of a [`DiscoveryStateMachine`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, displaydoc::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiscoveryState {
    /// idle
    Idle,
    /// discovering services
    DiscoveringServices,
    /// discovering characteristics
    DiscoveringCharacteristics,
    /// discovering descriptors
    DiscoveringDescriptors,
    /// complete
    Complete,
    /// aborted
    Aborted,
}

impl DiscoveryState {
    /// Whether discovery has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, DiscoveryState::Complete | DiscoveryState::Aborted)
    }

    /// Whether discovery is currently exchanging requests with the peer.
    pub fn is_running(self) -> bool {
        !self.is_terminal() && self != DiscoveryState::Idle
    }
}

/// Populates an [`AttributeRegistry`] with the services, characteristics and descriptors of one device.
///
/// Services are discovered first, then the characteristics of each service in discovery order, then the
/// descriptors of every characteristic whose handle range leaves room for them. Only one request is outstanding at
/// a time. Any failure moves the machine to [`DiscoveryState::Aborted`]; whatever was added to the registry before
/// that point stays there.
pub struct DiscoveryStateMachine {
    requester: Requester,
    registry: Arc<Mutex<AttributeRegistry>>,
    state: watch::Sender<DiscoveryState>,
}

impl std::fmt::Debug for DiscoveryStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryStateMachine")
            .field("device", self.requester.device())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl DiscoveryStateMachine {
    /// Creates a machine in the [`Idle`][DiscoveryState::Idle] state.
    ///
    /// Raising `cancel` (or dropping its sender) aborts the discovery before its next registry update.
    pub fn new(
        device: DeviceInstanceId,
        transport: Arc<dyn Transport>,
        registry: Arc<Mutex<AttributeRegistry>>,
        config: &SessionConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let requester = Requester::new(
            device,
            transport,
            Default::default(),
            cancel,
            config.request_timeout,
            config.max_retries,
        );
        Self::with_requester(requester, registry)
    }

    pub(crate) fn with_requester(requester: Requester, registry: Arc<Mutex<AttributeRegistry>>) -> Self {
        DiscoveryStateMachine {
            requester,
            registry,
            state: watch::channel(DiscoveryState::Idle).0,
        }
    }

    /// The device being discovered.
    pub fn device(&self) -> &DeviceInstanceId {
        self.requester.device()
    }

    /// The current state.
    pub fn state(&self) -> DiscoveryState {
        *self.state.borrow()
    }

    /// Observes state changes. The receiver keeps the final state after the machine is dropped.
    pub fn subscribe(&self) -> watch::Receiver<DiscoveryState> {
        self.state.subscribe()
    }

    /// Runs discovery to completion.
    ///
    /// Returns `Ok` once the machine reaches [`Complete`][DiscoveryState::Complete], or the error that moved it
    /// to [`Aborted`][DiscoveryState::Aborted].
    pub async fn run(mut self) -> Result<()> {
        self.transition(DiscoveryState::DiscoveringServices);
        match self.discover().await {
            Ok(()) => {
                self.transition(DiscoveryState::Complete);
                Ok(())
            }
            Err(err) => {
                warn!(device = %self.device(), error = %err, "discovery aborted");
                self.transition(DiscoveryState::Aborted);
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: DiscoveryState) {
        let previous = self.state.send_replace(next);
        debug!(device = %self.requester.device(), from = %previous, to = %next, "discovery state changed");
    }

    async fn discover(&mut self) -> Result<()> {
        let services = self.discover_services().await?;

        self.transition(DiscoveryState::DiscoveringCharacteristics);
        let mut pending_descriptors = Vec::new();
        for (service, range) in services {
            pending_descriptors.extend(self.discover_characteristics(&service, range).await?);
        }

        if !pending_descriptors.is_empty() {
            self.transition(DiscoveryState::DiscoveringDescriptors);
            for (characteristic, range) in pending_descriptors {
                self.discover_descriptors(&characteristic, range).await?;
            }
        }

        Ok(())
    }

    async fn discover_services(&mut self) -> Result<Vec<(InstanceId, HandleRange)>> {
        let mut discovered = Vec::new();
        let mut range = HandleRange::ALL;
        loop {
            let (batch, complete) = match self.requester.send(Request::DiscoverServices { range }).await {
                Ok(Response::Services { services, complete }) => (services, complete),
                Ok(other) => return Err(self.unexpected(&other)),
                Err(err) if is_end_of_range(&err) => break,
                Err(err) => return Err(err),
            };

            if !is_advancing(range, batch.iter().map(|s| (s.handles.start, s.handles.end))) {
                return Err(self.malformed("service handles out of order or outside the requested range"));
            }
            trace!(device = %self.device(), count = batch.len(), complete, "service batch");

            let last = batch.last().map(|s| s.handles.end);
            let device = self.device().clone();
            let added = self.commit(|registry| {
                batch
                    .iter()
                    .map(|s| registry.add_discovered_service(&device, s))
                    .collect::<Result<Vec<_>>>()
            })?;
            discovered.extend(added.into_iter().zip(batch).map(|(s, d)| (s.instance_id, d.handles)));

            match last.and_then(|end| range.after(end)) {
                Some(next) if !complete => range = next,
                _ => break,
            }
        }
        Ok(discovered)
    }

    /// Returns the characteristics that have room for descriptors, with the handles to search.
    async fn discover_characteristics(
        &mut self,
        service: &InstanceId,
        service_range: HandleRange,
    ) -> Result<Vec<(InstanceId, HandleRange)>> {
        let mut found: Vec<DiscoveredCharacteristic> = Vec::new();
        let mut range = service_range;
        loop {
            let (batch, complete) = match self.requester.send(Request::DiscoverCharacteristics { range }).await {
                Ok(Response::Characteristics {
                    characteristics,
                    complete,
                }) => (characteristics, complete),
                Ok(other) => return Err(self.unexpected(&other)),
                Err(err) if is_end_of_range(&err) => break,
                Err(err) => return Err(err),
            };

            let well_formed = batch.iter().all(|c| c.declaration_handle < c.value_handle)
                && is_advancing(range, batch.iter().map(|c| (c.declaration_handle, c.value_handle)));
            if !well_formed {
                return Err(self.malformed("characteristic handles out of order or outside the service"));
            }
            trace!(device = %self.device(), %service, count = batch.len(), complete, "characteristic batch");

            let last = batch.last().map(|c| c.value_handle);
            found.extend(batch);
            match last.and_then(|end| range.after(end)) {
                Some(next) if !complete => range = next,
                _ => break,
            }
        }

        let ends: Vec<u16> = found
            .iter()
            .skip(1)
            .map(|next| next.declaration_handle - 1)
            .chain(std::iter::once(service_range.end))
            .collect();

        self.commit(|registry| {
            let mut pending = Vec::new();
            for (discovered, end) in found.iter().zip(ends) {
                let characteristic = registry.add_discovered_characteristic(service, discovered, end)?;
                if characteristic.has_descriptors() {
                    pending.push((
                        characteristic.instance_id,
                        HandleRange {
                            start: discovered.value_handle + 1,
                            end,
                        },
                    ));
                }
            }
            Ok(pending)
        })
    }

    async fn discover_descriptors(&mut self, characteristic: &InstanceId, mut range: HandleRange) -> Result<()> {
        loop {
            let (batch, complete) = match self.requester.send(Request::DiscoverDescriptors { range }).await {
                Ok(Response::Descriptors { descriptors, complete }) => (descriptors, complete),
                Ok(other) => return Err(self.unexpected(&other)),
                Err(err) if is_end_of_range(&err) => return Ok(()),
                Err(err) => return Err(err),
            };

            if !is_advancing(range, batch.iter().map(|d| (d.handle, d.handle))) {
                return Err(self.malformed("descriptor handles out of order or outside the characteristic"));
            }
            trace!(device = %self.device(), %characteristic, count = batch.len(), complete, "descriptor batch");

            let last = batch.last().map(|d| d.handle);
            self.commit(|registry| {
                batch
                    .iter()
                    .try_for_each(|d| registry.add_discovered_descriptor(characteristic, d).map(drop))
            })?;

            match last.and_then(|end| range.after(end)) {
                Some(next) if !complete => range = next,
                _ => return Ok(()),
            }
        }
    }

    /// Applies `update` to the registry unless the connection has been cancelled.
    fn commit<T>(&self, update: impl FnOnce(&mut AttributeRegistry) -> Result<T>) -> Result<T> {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if self.requester.is_cancelled() {
            return Err(Error::new(ErrorKind::NotConnected, None, self.device().to_string()));
        }
        update(&mut registry)
    }

    fn unexpected(&self, response: &Response) -> Error {
        self.malformed(format!("unexpected response {response:?}"))
    }

    fn malformed(&self, detail: impl Into<String>) -> Error {
        Error::new(
            ErrorKind::InvalidResponse,
            None,
            format!("{}: {}", self.device(), detail.into()),
        )
    }
}

/// ATT reports the end of a discovery range as an *Attribute Not Found* error.
fn is_end_of_range(err: &Error) -> bool {
    err.kind() == ErrorKind::Protocol(AttError::Known(AttErrorCode::AttributeNotFound))
}

/// Checks that the `(start, end)` spans lie inside `range`, are well ordered and do not overlap.
fn is_advancing(range: HandleRange, spans: impl IntoIterator<Item = (u16, u16)>) -> bool {
    let mut floor = Some(range.start);
    for (start, end) in spans {
        match floor {
            Some(min) if min <= start && start <= end && end <= range.end => floor = end.checked_add(1),
            _ => return false,
        }
    }
    true
}
