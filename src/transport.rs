//! The seam between the GATT core and the native BLE driver.
//!
//! The driver owns the wire: it encodes each [`Request`] as the matching ATT procedure, waits for the peer and
//! hands back a decoded [`Response`]. Failures are reported as [`Error`][crate::Error]s whose kind tells the core
//! how to react: [`Timeout`][ErrorKind::Timeout] is retried, [`NotConnected`][ErrorKind::NotConnected] ends the
//! procedure, and [`Protocol`][ErrorKind::Protocol] carries the peer's ATT error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tracing::{debug, trace};

use crate::error::ErrorKind;
use crate::{Address, CharacteristicProperties, DeviceInstanceId, Error, Result, Uuid};

/// The lowest valid ATT handle
pub const HANDLE_MIN: u16 = 0x0001;
/// The highest valid ATT handle
pub const HANDLE_MAX: u16 = 0xffff;

/// An inclusive range of ATT handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HandleRange {
    /// First handle in the range
    pub start: u16,
    /// Last handle in the range
    pub end: u16,
}

impl HandleRange {
    /// The whole handle space, `0x0001..=0xffff`.
    pub const ALL: HandleRange = HandleRange {
        start: HANDLE_MIN,
        end: HANDLE_MAX,
    };

    /// Creates a range, checking `start <= end` and that `start` is not the reserved handle 0.
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(Error::new(
                ErrorKind::InvalidParameter,
                None,
                format!("invalid handle range 0x{start:04x}..=0x{end:04x}"),
            ));
        }
        Ok(HandleRange { start, end })
    }

    /// Whether `other` lies entirely within this range.
    pub fn contains_range(&self, other: &HandleRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether `handle` lies within this range.
    pub fn contains(&self, handle: u16) -> bool {
        self.start <= handle && handle <= self.end
    }

    /// The part of this range after `handle`, or `None` if `handle` is the last one.
    pub fn after(&self, handle: u16) -> Option<HandleRange> {
        let start = handle.checked_add(1)?;
        (start <= self.end).then_some(HandleRange { start, end: self.end })
    }
}

/// ATT handles occupied by one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicHandles {
    /// Handle of the characteristic declaration
    pub declaration: u16,
    /// Handle of the characteristic value
    pub value: u16,
    /// Last handle belonging to the characteristic; descriptors live in `value + 1..=end`
    pub end: u16,
}

/// A service as reported by primary service discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    /// Service type
    pub uuid: Uuid,
    /// Handles from the service declaration to its last attribute
    pub handles: HandleRange,
    /// `false` for secondary services
    pub is_primary: bool,
}

/// A characteristic declaration as reported by characteristic discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    /// Characteristic type
    pub uuid: Uuid,
    /// Declaration handle
    pub declaration_handle: u16,
    /// Value handle
    pub value_handle: u16,
    /// Declared properties
    pub properties: CharacteristicProperties,
}

/// A descriptor as reported by descriptor discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDescriptor {
    /// Descriptor type
    pub uuid: Uuid,
    /// Descriptor handle
    pub handle: u16,
}

/// A decoded request for the driver to perform against a connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Discover primary services in `range`
    DiscoverServices {
        /// Handles still to search
        range: HandleRange,
    },
    /// Discover characteristic declarations in `range`
    DiscoverCharacteristics {
        /// Handles still to search, inside one service
        range: HandleRange,
    },
    /// Discover descriptors in `range`
    DiscoverDescriptors {
        /// Handles still to search, inside one characteristic
        range: HandleRange,
    },
    /// Read the attribute value at `handle`
    Read {
        /// Attribute handle
        handle: u16,
    },
    /// Write `value` to the attribute at `handle`
    Write {
        /// Attribute handle
        handle: u16,
        /// New value
        value: Vec<u8>,
        /// Whether the peer must acknowledge the write
        with_response: bool,
    },
}

/// A decoded response from the driver
///
/// Discovery responses come in batches. `complete` is set when the peer has nothing more in the requested range;
/// an ATT *Attribute Not Found* error from the peer means the same thing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Answer to [`Request::DiscoverServices`]
    Services {
        /// Services found, in handle order
        services: Vec<DiscoveredService>,
        /// No services remain past this batch
        complete: bool,
    },
    /// Answer to [`Request::DiscoverCharacteristics`]
    Characteristics {
        /// Characteristics found, in handle order
        characteristics: Vec<DiscoveredCharacteristic>,
        /// No characteristics remain past this batch
        complete: bool,
    },
    /// Answer to [`Request::DiscoverDescriptors`]
    Descriptors {
        /// Descriptors found, in handle order
        descriptors: Vec<DiscoveredDescriptor>,
        /// No descriptors remain past this batch
        complete: bool,
    },
    /// Answer to [`Request::Read`]
    Value(Vec<u8>),
    /// Answer to [`Request::Write`]
    Written,
}

/// The native BLE driver, as seen by an [`AdapterSession`][crate::AdapterSession]
///
/// Implementations must be cheap to share; the session holds one behind an `Arc` and calls it from concurrent
/// discovery tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Opens the link to the controller.
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Closes the link to the controller.
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Establishes a connection to the peer at `address`, which the core will refer to as `device`.
    async fn connect(&self, device: &DeviceInstanceId, address: Address) -> Result<()>;

    /// Terminates the connection to `device`.
    async fn disconnect(&self, device: &DeviceInstanceId) -> Result<()>;

    /// Sends one request to `device` and waits for the answer.
    async fn send_request(&self, device: &DeviceInstanceId, request: Request) -> Result<Response>;

    /// Starts scanning for advertisements.
    async fn start_scan(&self) -> Result<()> {
        Err(ErrorKind::NotSupported.into())
    }

    /// Stops scanning for advertisements.
    async fn stop_scan(&self) -> Result<()> {
        Err(ErrorKind::NotSupported.into())
    }

    /// Starts advertising the local GATT server.
    async fn start_advertising(&self) -> Result<()> {
        Err(ErrorKind::NotSupported.into())
    }

    /// Stops advertising.
    async fn stop_advertising(&self) -> Result<()> {
        Err(ErrorKind::NotSupported.into())
    }
}

/// Resolves once the connection's cancellation flag is raised or its sender is dropped.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// Whether the connection's cancellation flag has been raised or its sender dropped.
pub(crate) fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow() || cancel.has_changed().is_err()
}

/// Sends requests to one device, applying the per-request timeout and retrying transient failures.
///
/// Requesters for the same device share a gate so that at most one request is outstanding per connection.
pub(crate) struct Requester {
    device: DeviceInstanceId,
    transport: Arc<dyn Transport>,
    gate: Arc<Mutex<()>>,
    cancel: watch::Receiver<bool>,
    timeout: Duration,
    max_retries: u32,
}

impl Requester {
    pub(crate) fn new(
        device: DeviceInstanceId,
        transport: Arc<dyn Transport>,
        gate: Arc<Mutex<()>>,
        cancel: watch::Receiver<bool>,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Requester {
            device,
            transport,
            gate,
            cancel,
            timeout,
            max_retries,
        }
    }

    pub(crate) fn device(&self) -> &DeviceInstanceId {
        &self.device
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        is_cancelled(&self.cancel)
    }

    /// Sends `request`, sending it again up to `max_retries` times while it fails transiently.
    ///
    /// Returns [`NotConnected`][ErrorKind::NotConnected] as soon as the connection is cancelled; the pending
    /// request and its timer are dropped.
    pub(crate) async fn send(&mut self, request: Request) -> Result<Response> {
        let Requester {
            device,
            transport,
            gate,
            cancel,
            timeout,
            max_retries,
        } = self;
        let (device, transport, gate) = (&*device, &*transport, &*gate);
        let (timeout, max_retries) = (*timeout, *max_retries);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            trace!(%device, attempt, ?request, "sending request");
            let exchange = async {
                let _exclusive = gate.lock().await;
                tokio::time::timeout(timeout, transport.send_request(device, request.clone())).await
            };
            let result = tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    return Err(Error::new(ErrorKind::NotConnected, None, device.to_string()));
                }
                result = exchange => result.unwrap_or_else(|_| {
                    Err(Error::new(
                        ErrorKind::Timeout,
                        None,
                        format!("no response from {device} within {timeout:?}"),
                    ))
                }),
            };

            match result {
                Err(err) if err.is_transient() && attempt <= max_retries => {
                    debug!(%device, attempt, error = %err, "retrying request");
                }
                result => return result,
            }
        }
    }
}
