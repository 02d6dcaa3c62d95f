#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gatt_host::btuuid::{characteristics, descriptors, services};
use gatt_host::error::{AttError, AttErrorCode, ErrorKind};
use gatt_host::transport::{DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, HandleRange};
use gatt_host::{Address, CharacteristicProperties, DeviceInstanceId, Error, Request, Response, Result, Transport};
use tokio::sync::{watch, Notify};

pub const ADDRESS: Address = Address([0xc0, 0xff, 0xee, 0x00, 0x11, 0x22]);

/// What the peripheral does with one particular request
#[derive(Debug, Clone)]
pub enum Fault {
    /// Never answer
    Hang,
    /// Fail with an ATT error
    Att(AttErrorCode),
    /// Fail as if the link went down
    Disconnected,
    /// Answer with this instead
    Respond(Response),
}

#[derive(Debug, Default)]
struct State {
    services: Vec<DiscoveredService>,
    characteristics: Vec<DiscoveredCharacteristic>,
    descriptors: Vec<DiscoveredDescriptor>,
    values: HashMap<u16, Vec<u8>>,
    batch_size: Option<usize>,
    end_with_error: bool,
    faults: HashMap<usize, Fault>,
    requests: Vec<Request>,
    connects: usize,
    disconnects: usize,
    fail_connect: bool,
    held_connect: Option<Arc<Notify>>,
}

/// An in-memory peripheral answering discovery and value requests from a fixed attribute table.
///
/// Requests are numbered from 1 in the order they arrive.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    state: Arc<Mutex<State>>,
    seen: Arc<watch::Sender<usize>>,
}

impl MockPeripheral {
    pub fn empty() -> Self {
        MockPeripheral {
            state: Default::default(),
            seen: Arc::new(watch::channel(0).0),
        }
    }

    /// Battery (0x0001..=0x0005), Heart Rate (0x0006..=0x000b) and Device Information (0x000c..=0x0010).
    ///
    /// Battery Level has two descriptors and Heart Rate Measurement one; the remaining characteristics have none.
    pub fn heart_rate_sensor() -> Self {
        let read = CharacteristicProperties {
            read: true,
            ..Default::default()
        };
        let read_notify = CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        };
        let notify = CharacteristicProperties {
            notify: true,
            ..Default::default()
        };
        let write = CharacteristicProperties {
            write: true,
            ..Default::default()
        };

        let peripheral = Self::empty();
        {
            let mut state = peripheral.state.lock().unwrap();
            state.services = vec![
                service(services::BATTERY, 0x0001, 0x0005),
                service(services::HEART_RATE, 0x0006, 0x000b),
                service(services::DEVICE_INFORMATION, 0x000c, 0x0010),
            ];
            state.characteristics = vec![
                characteristic(characteristics::BATTERY_LEVEL, 0x0002, read_notify),
                characteristic(characteristics::HEART_RATE_MEASUREMENT, 0x0007, notify),
                characteristic(characteristics::BODY_SENSOR_LOCATION, 0x000a, read),
                characteristic(characteristics::MANUFACTURER_NAME_STRING, 0x000d, read),
                characteristic(characteristics::HEART_RATE_CONTROL_POINT, 0x000f, write),
            ];
            state.descriptors = vec![
                descriptor(descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION, 0x0004),
                descriptor(descriptors::CHARACTERISTIC_USER_DESCRIPTION, 0x0005),
                descriptor(descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION, 0x0009),
            ];
            state.values = HashMap::from([
                (0x0003, vec![87]),
                (0x0004, vec![0, 0]),
                (0x0005, b"Main cell".to_vec()),
                (0x000b, vec![1]),
                (0x000e, b"Acme".to_vec()),
            ]);
        }
        peripheral
    }

    /// Answer discovery requests with at most `size` items.
    pub fn with_batch_size(self, size: usize) -> Self {
        self.state.lock().unwrap().batch_size = Some(size);
        self
    }

    /// Never flag a batch as complete; signal the end of a range with *Attribute Not Found* instead.
    pub fn ending_with_error(self) -> Self {
        self.state.lock().unwrap().end_with_error = true;
        self
    }

    /// Apply `fault` to request number `n`.
    pub fn fault(&self, n: usize, fault: Fault) {
        self.state.lock().unwrap().faults.insert(n, fault);
    }

    pub fn fail_connect(&self) {
        self.state.lock().unwrap().fail_connect = true;
    }

    /// Keeps connects pending until the returned handle is notified.
    pub fn hold_connect(&self) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        self.state.lock().unwrap().held_connect = Some(release.clone());
        release
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn value(&self, handle: u16) -> Option<Vec<u8>> {
        self.state.lock().unwrap().values.get(&handle).cloned()
    }

    /// Waits until at least `n` requests have arrived.
    pub async fn wait_for_request(&self, n: usize) {
        let mut seen = self.seen.subscribe();
        while *seen.borrow_and_update() < n {
            if seen.changed().await.is_err() {
                return;
            }
        }
    }

    fn answer(state: &mut State, request: &Request) -> Result<Response> {
        let limit = state.batch_size.unwrap_or(usize::MAX);
        let end_with_error = state.end_with_error;
        let not_found = || -> Result<Response> { Err(AttError::Known(AttErrorCode::AttributeNotFound).into()) };

        match request {
            Request::DiscoverServices { range } => {
                let found: Vec<_> = state.services.iter().filter(|s| s.handles.start >= range.start).cloned().collect();
                if found.is_empty() {
                    return not_found();
                }
                let complete = !end_with_error && found.len() <= limit;
                Ok(Response::Services {
                    services: found.into_iter().take(limit).collect(),
                    complete,
                })
            }
            Request::DiscoverCharacteristics { range } => {
                let found: Vec<_> = state
                    .characteristics
                    .iter()
                    .filter(|c| range.contains(c.declaration_handle))
                    .cloned()
                    .collect();
                if found.is_empty() {
                    return not_found();
                }
                let complete = !end_with_error && found.len() <= limit;
                Ok(Response::Characteristics {
                    characteristics: found.into_iter().take(limit).collect(),
                    complete,
                })
            }
            Request::DiscoverDescriptors { range } => {
                let found: Vec<_> = state.descriptors.iter().filter(|d| range.contains(d.handle)).cloned().collect();
                if found.is_empty() {
                    return not_found();
                }
                let complete = !end_with_error && found.len() <= limit;
                Ok(Response::Descriptors {
                    descriptors: found.into_iter().take(limit).collect(),
                    complete,
                })
            }
            Request::Read { handle } => state
                .values
                .get(handle)
                .cloned()
                .map(Response::Value)
                .ok_or_else(|| AttError::Known(AttErrorCode::InvalidHandle).into()),
            Request::Write { handle, value, .. } => {
                state.values.insert(*handle, value.clone());
                Ok(Response::Written)
            }
        }
    }
}

#[async_trait]
impl Transport for MockPeripheral {
    async fn connect(&self, _device: &DeviceInstanceId, _address: Address) -> Result<()> {
        let held = {
            let mut state = self.state.lock().unwrap();
            if state.fail_connect {
                return Err(Error::new(ErrorKind::Timeout, None, "connection not established"));
            }
            state.connects += 1;
            state.held_connect.clone()
        };
        if let Some(release) = held {
            release.notified().await;
        }
        Ok(())
    }

    async fn disconnect(&self, _device: &DeviceInstanceId) -> Result<()> {
        self.state.lock().unwrap().disconnects += 1;
        Ok(())
    }

    async fn send_request(&self, device: &DeviceInstanceId, request: Request) -> Result<Response> {
        let (n, outcome) = {
            let mut state = self.state.lock().unwrap();
            state.requests.push(request.clone());
            let n = state.requests.len();
            let outcome = match state.faults.remove(&n) {
                Some(fault) => Err(fault),
                None => Ok(Self::answer(&mut state, &request)),
            };
            (n, outcome)
        };
        self.seen.send_replace(n);

        match outcome {
            Ok(result) => result,
            Err(Fault::Hang) => std::future::pending().await,
            Err(Fault::Att(code)) => Err(AttError::Known(code).into()),
            Err(Fault::Disconnected) => Err(Error::new(ErrorKind::NotConnected, None, device.to_string())),
            Err(Fault::Respond(response)) => Ok(response),
        }
    }

    async fn start_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }
}

pub fn service(uuid: gatt_host::Uuid, start: u16, end: u16) -> DiscoveredService {
    DiscoveredService {
        uuid,
        handles: HandleRange { start, end },
        is_primary: true,
    }
}

pub fn characteristic(
    uuid: gatt_host::Uuid,
    declaration_handle: u16,
    properties: CharacteristicProperties,
) -> DiscoveredCharacteristic {
    DiscoveredCharacteristic {
        uuid,
        declaration_handle,
        value_handle: declaration_handle + 1,
        properties,
    }
}

pub fn descriptor(uuid: gatt_host::Uuid, handle: u16) -> DiscoveredDescriptor {
    DiscoveredDescriptor { uuid, handle }
}

pub fn init_tracing() {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(EnvFilter::from_default_env())
        .try_init();
}
