//! BlueZ D-Bus transport.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    Advertisement, CharacteristicInfo, DiscoveredDevice, FRAGMENT_CHANNEL_BUFFER_SIZE, Fragment,
    Radio, RadioError, RadioFuture, ServiceInfo, Session, SessionHandle, uuid_eq,
};
use bluer::monitor::{Monitor, MonitorEvent, Pattern};
use bluer::{
    Adapter, AdapterEvent, Address, Device, DeviceEvent, DeviceProperty, DiscoveryFilter,
    DiscoveryTransport, Uuid,
};
use futures::StreamExt;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

/// Bluetooth manufacturer-specific data type (AD type 0xFF)
pub const MANUFACTURER_DATA_TYPE: u8 = 0xff;

impl From<bluer::Error> for RadioError {
    fn from(err: bluer::Error) -> Self {
        RadioError::Bluetooth(err.to_string())
    }
}

fn parse_uuid(id: &str) -> Result<Uuid, RadioError> {
    Uuid::parse_str(id.trim()).map_err(|_| RadioError::InvalidUuid(id.to_string()))
}

/// The default adapter of the local BlueZ daemon.
pub struct BluerRadio {
    _session: bluer::Session,
    adapter: Adapter,
}

impl BluerRadio {
    /// Connect to BlueZ and power on the default adapter.
    pub async fn new() -> Result<Self, RadioError> {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        adapter.set_powered(true).await?;
        info!(adapter = adapter.name(), "Using Bluetooth adapter");

        Ok(Self {
            _session: session,
            adapter,
        })
    }
}

impl Radio for BluerRadio {
    fn scan<'a>(
        &'a self,
        service_ids: &'a BTreeSet<String>,
        timeout: Duration,
    ) -> RadioFuture<'a, Vec<DiscoveredDevice>> {
        Box::pin(async move {
            let uuids = service_ids
                .iter()
                .map(|id| parse_uuid(id))
                .collect::<Result<HashSet<_>, _>>()?;
            self.adapter
                .set_discovery_filter(DiscoveryFilter {
                    uuids,
                    transport: DiscoveryTransport::Le,
                    ..Default::default()
                })
                .await?;

            let deadline = tokio::time::Instant::now() + timeout;
            let mut events = Box::pin(self.adapter.discover_devices().await?);
            let mut seen = HashSet::new();
            let mut found = Vec::new();

            // Discovery stops when the event stream is dropped.
            while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.next()).await {
                if let AdapterEvent::DeviceAdded(address) = event
                    && seen.insert(address)
                {
                    debug!(address = %address, "Discovered device");
                    found.push(DiscoveredDevice::new(address.into()));
                }
            }

            Ok(found)
        })
    }

    fn open_session<'a>(&'a self, handle: &'a SessionHandle) -> RadioFuture<'a, Box<dyn Session>> {
        Box::pin(async move {
            let device = self.adapter.device(handle.address().into())?;
            if !device.is_connected().await? {
                device.connect().await?;
            }
            let session: Box<dyn Session> = Box::new(BluerSession {
                device,
                subscriptions: HashMap::new(),
            });
            Ok(session)
        })
    }

    fn watch_advertisements(
        &self,
        manufacturer_id: u16,
    ) -> RadioFuture<'_, mpsc::Receiver<Advertisement>> {
        Box::pin(async move {
            let pattern = Pattern {
                data_type: MANUFACTURER_DATA_TYPE,
                start_position: 0,
                content: manufacturer_id.to_le_bytes().to_vec(),
            };

            let monitor_manager = self.adapter.monitor().await?;
            let mut monitor_handle = monitor_manager
                .register(Monitor {
                    patterns: Some(vec![pattern]),
                    ..Default::default()
                })
                .await?;

            let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_BUFFER_SIZE);
            let adapter = self.adapter.clone();

            tokio::spawn(async move {
                // Keep the monitor registered for as long as this task runs.
                let _monitor_manager = monitor_manager;
                let mut trackers = JoinSet::new();
                let mut tracked = HashSet::new();

                loop {
                    let event = tokio::select! {
                        _ = tx.closed() => break,
                        event = monitor_handle.next() => match event {
                            Some(event) => event,
                            None => break,
                        },
                    };
                    let MonitorEvent::DeviceFound(device_id) = event else {
                        continue;
                    };
                    let address = device_id.device;

                    match current_advertisement(&adapter, address, manufacturer_id).await {
                        Ok(Some(advertisement)) => {
                            if tx.send(advertisement).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => debug!(address = %address, error = %e, "Failed to read advertisement"),
                    }

                    // BlueZ reports a device once; later readings arrive as property changes.
                    if tracked.insert(address) {
                        trackers.spawn(track_device(
                            adapter.clone(),
                            address,
                            manufacturer_id,
                            tx.clone(),
                        ));
                    }
                }
            });

            Ok(rx)
        })
    }
}

async fn current_advertisement(
    adapter: &Adapter,
    address: Address,
    manufacturer_id: u16,
) -> Result<Option<Advertisement>, RadioError> {
    let device = adapter.device(address)?;
    let Some(manufacturer_data) = device.manufacturer_data().await? else {
        return Ok(None);
    };
    let Some(data) = manufacturer_data.get(&manufacturer_id) else {
        return Ok(None);
    };

    Ok(Some(Advertisement {
        address: address.into(),
        rssi: device.rssi().await?,
        manufacturer_id,
        data: data.clone(),
    }))
}

async fn track_device(
    adapter: Adapter,
    address: Address,
    manufacturer_id: u16,
    tx: mpsc::Sender<Advertisement>,
) {
    let device = match adapter.device(address) {
        Ok(device) => device,
        Err(e) => {
            debug!(address = %address, error = %e, "Cannot track device");
            return;
        }
    };
    let events = match device.events().await {
        Ok(events) => events,
        Err(e) => {
            debug!(address = %address, error = %e, "Cannot track device");
            return;
        }
    };
    let mut events = Box::pin(events);
    let mut rssi = device.rssi().await.ok().flatten();

    while let Some(event) = events.next().await {
        if let DeviceEvent::PropertyChanged(property) = event {
            match property {
                DeviceProperty::Rssi(value) => rssi = Some(value),
                DeviceProperty::ManufacturerData(data) => {
                    if let Some(payload) = data.get(&manufacturer_id) {
                        let advertisement = Advertisement {
                            address: address.into(),
                            rssi,
                            manufacturer_id,
                            data: payload.clone(),
                        };
                        if tx.send(advertisement).await.is_err() {
                            return;
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// A connected GATT client session.
struct BluerSession {
    device: Device,
    /// Notification forwarding task per characteristic id.
    subscriptions: HashMap<String, JoinHandle<()>>,
}

impl Session for BluerSession {
    fn list_services(&self) -> RadioFuture<'_, Vec<ServiceInfo>> {
        Box::pin(async move {
            let mut services = Vec::new();
            for service in self.device.services().await? {
                let mut characteristics = Vec::new();
                for characteristic in service.characteristics().await? {
                    characteristics.push(CharacteristicInfo {
                        id: characteristic.uuid().await?.to_string(),
                    });
                }
                services.push(ServiceInfo {
                    id: service.uuid().await?.to_string(),
                    characteristics,
                });
            }
            Ok(services)
        })
    }

    fn subscribe<'a>(
        &'a mut self,
        service_id: &'a str,
        characteristic_id: &'a str,
    ) -> RadioFuture<'a, mpsc::Receiver<Fragment>> {
        Box::pin(async move {
            let mut target = None;
            for service in self.device.services().await? {
                if !uuid_eq(&service.uuid().await?.to_string(), service_id) {
                    continue;
                }
                for characteristic in service.characteristics().await? {
                    if uuid_eq(&characteristic.uuid().await?.to_string(), characteristic_id) {
                        target = Some(characteristic);
                        break;
                    }
                }
            }
            let characteristic = target.ok_or_else(|| RadioError::UnknownCharacteristic {
                service: service_id.to_string(),
                characteristic: characteristic_id.to_string(),
            })?;

            let notify = characteristic.notify().await?;
            let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_BUFFER_SIZE);
            let task = tokio::spawn(async move {
                let mut notify = Box::pin(notify);
                while let Some(value) = notify.next().await {
                    if tx.send(value).await.is_err() {
                        break;
                    }
                }
            });

            if let Some(previous) = self.subscriptions.insert(characteristic_id.to_string(), task) {
                previous.abort();
            }
            Ok(rx)
        })
    }

    fn unsubscribe<'a>(&'a mut self, characteristic_id: &'a str) -> RadioFuture<'a, ()> {
        Box::pin(async move {
            // Dropping the notify stream inside the task stops notifications.
            if let Some(task) = self.subscriptions.remove(characteristic_id) {
                task.abort();
            }
            Ok(())
        })
    }
}

impl Drop for BluerSession {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
    }
}
