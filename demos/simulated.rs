//! Discovers a simulated thermometer and prints its attribute tree.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_lite::StreamExt;
use gatt_host::btuuid::{characteristics, descriptors, services};
use gatt_host::error::{AttError, AttErrorCode};
use gatt_host::naming::{resolve_name, NameTable};
use gatt_host::transport::{DiscoveredCharacteristic, DiscoveredDescriptor, DiscoveredService, HandleRange};
use gatt_host::{
    AdapterSession, Address, Attribute, CharacteristicProperties, DeviceInstanceId, Request, Response, SessionConfig,
    Transport,
};
use tracing::info;
use tracing::metadata::LevelFilter;

struct Thermometer {
    services: Vec<DiscoveredService>,
    characteristics: Vec<DiscoveredCharacteristic>,
    descriptors: Vec<DiscoveredDescriptor>,
    values: Mutex<HashMap<u16, Vec<u8>>>,
}

impl Thermometer {
    fn new() -> Self {
        let read = CharacteristicProperties {
            read: true,
            ..Default::default()
        };
        let notify = CharacteristicProperties {
            read: true,
            notify: true,
            ..Default::default()
        };

        Thermometer {
            services: vec![
                DiscoveredService {
                    uuid: services::GENERIC_ACCESS,
                    handles: HandleRange { start: 0x0001, end: 0x0003 },
                    is_primary: true,
                },
                DiscoveredService {
                    uuid: services::HEALTH_THERMOMETER,
                    handles: HandleRange { start: 0x0004, end: 0x0008 },
                    is_primary: true,
                },
            ],
            characteristics: vec![
                DiscoveredCharacteristic {
                    uuid: characteristics::DEVICE_NAME,
                    declaration_handle: 0x0002,
                    value_handle: 0x0003,
                    properties: read,
                },
                DiscoveredCharacteristic {
                    uuid: characteristics::TEMPERATURE,
                    declaration_handle: 0x0005,
                    value_handle: 0x0006,
                    properties: notify,
                },
            ],
            descriptors: vec![
                DiscoveredDescriptor {
                    uuid: descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION,
                    handle: 0x0007,
                },
                DiscoveredDescriptor {
                    uuid: descriptors::CHARACTERISTIC_USER_DESCRIPTION,
                    handle: 0x0008,
                },
            ],
            values: Mutex::new(HashMap::from([
                (0x0003, b"Kitchen".to_vec()),
                (0x0006, 2150i16.to_le_bytes().to_vec()),
                (0x0007, vec![0, 0]),
                (0x0008, b"Air temperature".to_vec()),
            ])),
        }
    }

    fn in_range<T: Clone>(items: &[T], range: HandleRange, handle: impl Fn(&T) -> u16) -> Vec<T> {
        items.iter().filter(|item| range.contains(handle(item))).cloned().collect()
    }
}

#[async_trait]
impl Transport for Thermometer {
    async fn connect(&self, device: &DeviceInstanceId, _address: Address) -> gatt_host::Result<()> {
        info!(%device, "link up");
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceInstanceId) -> gatt_host::Result<()> {
        info!(%device, "link down");
        Ok(())
    }

    async fn send_request(&self, _device: &DeviceInstanceId, request: Request) -> gatt_host::Result<Response> {
        let not_found = || -> gatt_host::Error { AttError::Known(AttErrorCode::AttributeNotFound).into() };
        match request {
            Request::DiscoverServices { range } => {
                let services = Self::in_range(&self.services, range, |s| s.handles.start);
                if services.is_empty() {
                    return Err(not_found());
                }
                Ok(Response::Services {
                    services,
                    complete: true,
                })
            }
            Request::DiscoverCharacteristics { range } => {
                let characteristics = Self::in_range(&self.characteristics, range, |c| c.declaration_handle);
                if characteristics.is_empty() {
                    return Err(not_found());
                }
                Ok(Response::Characteristics {
                    characteristics,
                    complete: true,
                })
            }
            Request::DiscoverDescriptors { range } => {
                let descriptors = Self::in_range(&self.descriptors, range, |d| d.handle);
                if descriptors.is_empty() {
                    return Err(not_found());
                }
                Ok(Response::Descriptors {
                    descriptors,
                    complete: true,
                })
            }
            Request::Read { handle } => {
                let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
                values
                    .get(&handle)
                    .cloned()
                    .map(Response::Value)
                    .ok_or_else(|| AttError::Known(AttErrorCode::InvalidHandle).into())
            }
            Request::Write { handle, value, .. } => {
                self.values.lock().unwrap_or_else(|e| e.into_inner()).insert(handle, value);
                Ok(Response::Written)
            }
        }
    }

    async fn start_scan(&self) -> gatt_host::Result<()> {
        Ok(())
    }

    async fn stop_scan(&self) -> gatt_host::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let session = AdapterSession::new(Thermometer::new(), SessionConfig::default());
    let mut events = session.events();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            info!(?event, "session event");
        }
    });

    session.open().await?;
    let device = session.connect("C0:FF:EE:00:11:22".parse()?).await?;

    let names: NameTable = [(characteristics::TEMPERATURE, "Temperature (0.01 C)")].into_iter().collect();

    for service in session.discover_services(&device).await? {
        let service_name = resolve_name(&Attribute::Service(service.clone()), Some(&names));
        info!("{} {service_name}", service.instance_id());
        for characteristic in session.characteristics(service.instance_id()) {
            let name = resolve_name(&Attribute::Characteristic(characteristic.clone()), Some(&names));
            let value = session.read_characteristic(characteristic.instance_id()).await?;
            info!("  {} {name}: {value:?}", characteristic.instance_id());
            for descriptor in session.descriptors(characteristic.instance_id()) {
                let name = resolve_name(&Attribute::Descriptor(descriptor.clone()), Some(&names));
                let value = session.read_descriptor(descriptor.instance_id()).await?;
                info!("    {} {name}: {value:?}", descriptor.instance_id());
            }
        }
    }

    session.close().await?;
    info!("done");

    Ok(())
}
