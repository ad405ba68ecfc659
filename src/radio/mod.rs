//! Short-range radio transport abstraction.
//!
//! The rest of the crate talks to peripherals only through the [`Radio`] and
//! [`Session`] traits, so listeners and the registry can be tested with a
//! scripted transport. The BlueZ implementation lives in [`bluer`].

#[cfg(feature = "bluer")]
pub mod bluer;

use crate::mac_address::MacAddress;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Error type for transport operations.
#[derive(Error, Debug)]
pub enum RadioError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// A service or characteristic id that is not a UUID
    #[error("Invalid UUID '{0}'")]
    InvalidUuid(String),
    /// Subscribing to a characteristic the session does not expose
    #[error("No characteristic {characteristic} under service {service}")]
    UnknownCharacteristic {
        service: String,
        characteristic: String,
    },
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Open the transport compiled into this build.
#[cfg(feature = "bluer")]
pub async fn default_radio() -> Result<Arc<dyn Radio>, RadioError> {
    let radio: Arc<dyn Radio> = Arc::new(self::bluer::BluerRadio::new().await?);
    Ok(radio)
}

#[cfg(not(feature = "bluer"))]
pub async fn default_radio() -> Result<Arc<dyn Radio>, RadioError> {
    Err(RadioError::BackendNotAvailable("bluer".to_string()))
}

/// Channel buffer size for notification fragments and advertisements.
pub const FRAGMENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// One raw notification payload.
pub type Fragment = Vec<u8>;

/// Boxed future returned by transport operations.
pub type RadioFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RadioError>> + Send + 'a>>;

/// Opaque token needed to open a session with a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    address: MacAddress,
}

impl SessionHandle {
    pub fn new(address: MacAddress) -> Self {
        Self { address }
    }

    pub fn address(&self) -> MacAddress {
        self.address
    }
}

/// A device seen during a discovery scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: MacAddress,
    pub handle: SessionHandle,
}

impl DiscoveredDevice {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            handle: SessionHandle::new(address),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: String,
    pub characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Whether this service is `service_id` and exposes `characteristic_id`.
    pub fn exposes(&self, service_id: &str, characteristic_id: &str) -> bool {
        uuid_eq(&self.id, service_id)
            && self
                .characteristics
                .iter()
                .any(|c| uuid_eq(&c.id, characteristic_id))
    }
}

/// Manufacturer data received in an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: MacAddress,
    pub rssi: Option<i16>,
    pub manufacturer_id: u16,
    /// Manufacturer-specific bytes, without the company id.
    pub data: Vec<u8>,
}

/// UUIDs are compared case-insensitively: BlueZ reports lowercase while
/// configs are often copied from tools that print uppercase.
pub fn uuid_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Discovery and connection capability of the local adapter.
pub trait Radio: Send + Sync {
    /// Scan for devices advertising any of `service_ids`, for at most `timeout`.
    fn scan<'a>(
        &'a self,
        service_ids: &'a BTreeSet<String>,
        timeout: Duration,
    ) -> RadioFuture<'a, Vec<DiscoveredDevice>>;

    /// Connect to a previously discovered device.
    fn open_session<'a>(&'a self, handle: &'a SessionHandle) -> RadioFuture<'a, Box<dyn Session>>;

    /// Stream advertisements carrying manufacturer data for `manufacturer_id`.
    fn watch_advertisements(
        &self,
        manufacturer_id: u16,
    ) -> RadioFuture<'_, mpsc::Receiver<Advertisement>>;
}

/// A live connection to one peripheral.
///
/// Dropping a session must stop every notification it started, so a
/// cancelled listener never leaves a subscription behind.
pub trait Session: Send + Sync {
    fn list_services(&self) -> RadioFuture<'_, Vec<ServiceInfo>>;

    /// Start notifications on a characteristic; fragments arrive in link order.
    fn subscribe<'a>(
        &'a mut self,
        service_id: &'a str,
        characteristic_id: &'a str,
    ) -> RadioFuture<'a, mpsc::Receiver<Fragment>>;

    fn unsubscribe<'a>(&'a mut self, characteristic_id: &'a str) -> RadioFuture<'a, ()>;
}
