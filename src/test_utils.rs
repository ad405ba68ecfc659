use crate::config::DeviceConfig;
use crate::mac_address::MacAddress;
use crate::radio::{
    Advertisement, CharacteristicInfo, DiscoveredDevice, Fragment, Radio, RadioError, RadioFuture,
    ServiceInfo, Session, SessionHandle,
};
use crate::telemetry::BatteryTelemetry;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const TEST_MAC: MacAddress = MacAddress([0xFF, 0x69, 0x4E, 0x38, 0x44, 0xB3]);
pub const TEST_MAC_2: MacAddress = MacAddress([0xFF, 0x69, 0x4E, 0x35, 0xCE, 0x71]);
pub const HYGROMETER_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0x00, 0x11, 0x22]);

pub const TEST_CONFIG_JSON: &str = r#"{
    "vanD": {
        "scan_time": 5,
        "statistics_refresh_interval": 30,
        "prometheus_exporter_port": 31337
    },
    "li3": {
        "1": {
            "dev_name": "Li3-Test-1",
            "mac_address": "FF:69:4E:38:44:B3",
            "service_uuid": "FOO",
            "characteristic": "BAR",
            "timeout": 0.1
        },
        "2": {
            "dev_name": "Li3-Test-2",
            "mac_address": "FF:69:4E:35:CE:71",
            "service_uuid": "FOO",
            "characteristic": "BAR",
            "timeout": 0.1
        }
    },
    "govee": {
        "1": {
            "dev_name": "Govee-Test-1",
            "mac_address": "A4:C1:38:00:11:22",
            "service_uuid": "0000ec88-0000-1000-8000-00805f9b34fb",
            "characteristic": "n/a",
            "timeout": 0.1
        }
    }
}"#;

/// A battery record split the way the radio delivers it, with the control
/// frame in the middle.
pub const LI3_FRAGMENTS: [&[u8]; 3] = [
    b"1309,327,327,328,327",
    b"&,1,114,006880",
    b",32,39,0,79,000000",
];

pub const LI3_RECORD: &str = "1309,327,327,328,327,32,39,0,79,000000";

pub fn expected_battery() -> BatteryTelemetry {
    BatteryTelemetry {
        battery_voltage: 13.09,
        cell_1_voltage: 3.27,
        cell_2_voltage: 3.27,
        cell_3_voltage: 3.28,
        cell_4_voltage: 3.27,
        bms_temperature: 32.0,
        battery_temperature: 39.0,
        battery_power: 0.0,
        battery_soc: 79.0,
        fault_code: 0,
    }
}

/// H5075 manufacturer data: 23.5543 C, 54.3 %, battery 100 %.
pub const H5075_PAYLOAD: [u8; 6] = [0x00, 0x03, 0x98, 0x17, 0x64, 0x00];

pub fn device_config(identity: &str, address: MacAddress) -> DeviceConfig {
    DeviceConfig {
        identity: identity.to_string(),
        address,
        service_id: "FOO".to_string(),
        characteristic_id: "BAR".to_string(),
        discovery_timeout: Duration::from_millis(100),
    }
}

/// What the fake transport was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Open(MacAddress),
    Subscribe(MacAddress, String),
    Unsubscribe(MacAddress, String),
    DropSession(MacAddress),
}

/// A scripted transport for deterministic tests without Bluetooth hardware.
///
/// Every device exposes service `FOO` with characteristic `BAR` unless told
/// otherwise. Subscriptions replay the scripted fragments and then stay open
/// until unsubscribed, unless `with_closing_subscriptions` is used.
#[derive(Default)]
pub struct FakeRadio {
    discovered: Vec<MacAddress>,
    scan_failure: bool,
    unreachable: HashSet<MacAddress>,
    services: HashMap<MacAddress, Vec<ServiceInfo>>,
    fragments: HashMap<MacAddress, Vec<Fragment>>,
    advertisements: Vec<Advertisement>,
    close_subscriptions: bool,
    scans: Mutex<Vec<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<RadioCall>>>,
}

impl FakeRadio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_discovered(mut self, addresses: impl IntoIterator<Item = MacAddress>) -> Self {
        self.discovered.extend(addresses);
        self
    }

    pub fn with_scan_failure(mut self) -> Self {
        self.scan_failure = true;
        self
    }

    pub fn with_unreachable(mut self, address: MacAddress) -> Self {
        self.unreachable.insert(address);
        self
    }

    pub fn with_services(mut self, address: MacAddress, services: Vec<ServiceInfo>) -> Self {
        self.services.insert(address, services);
        self
    }

    pub fn with_fragments(mut self, address: MacAddress, fragments: &[&[u8]]) -> Self {
        self.fragments
            .entry(address)
            .or_default()
            .extend(fragments.iter().map(|f| f.to_vec()));
        self
    }

    pub fn with_advertisement(mut self, advertisement: Advertisement) -> Self {
        self.advertisements.push(advertisement);
        self
    }

    pub fn with_closing_subscriptions(mut self) -> Self {
        self.close_subscriptions = true;
        self
    }

    pub fn scans(&self) -> Vec<BTreeSet<String>> {
        self.scans.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap().clone()
    }

    fn services_of(&self, address: MacAddress) -> Vec<ServiceInfo> {
        self.services.get(&address).cloned().unwrap_or_else(|| {
            vec![ServiceInfo {
                id: "FOO".to_string(),
                characteristics: vec![CharacteristicInfo {
                    id: "BAR".to_string(),
                }],
            }]
        })
    }
}

impl Radio for FakeRadio {
    fn scan<'a>(
        &'a self,
        service_ids: &'a BTreeSet<String>,
        _timeout: Duration,
    ) -> RadioFuture<'a, Vec<DiscoveredDevice>> {
        Box::pin(async move {
            self.scans.lock().unwrap().push(service_ids.clone());
            if self.scan_failure {
                return Err(RadioError::Bluetooth("adapter is powered off".to_string()));
            }
            Ok(self
                .discovered
                .iter()
                .copied()
                .map(DiscoveredDevice::new)
                .collect())
        })
    }

    fn open_session<'a>(&'a self, handle: &'a SessionHandle) -> RadioFuture<'a, Box<dyn Session>> {
        Box::pin(async move {
            let address = handle.address();
            if self.unreachable.contains(&address) {
                return Err(RadioError::Bluetooth(format!("{address} refused connection")));
            }
            self.calls.lock().unwrap().push(RadioCall::Open(address));
            let session: Box<dyn Session> = Box::new(FakeSession {
                address,
                services: self.services_of(address),
                fragments: self.fragments.get(&address).cloned().unwrap_or_default(),
                close_subscriptions: self.close_subscriptions,
                subscriptions: HashMap::new(),
                calls: self.calls.clone(),
            });
            Ok(session)
        })
    }

    fn watch_advertisements(
        &self,
        manufacturer_id: u16,
    ) -> RadioFuture<'_, mpsc::Receiver<Advertisement>> {
        Box::pin(async move {
            let advertisements: Vec<_> = self
                .advertisements
                .iter()
                .filter(|a| a.manufacturer_id == manufacturer_id)
                .cloned()
                .collect();
            let close = self.close_subscriptions;
            let (tx, rx) = mpsc::channel(advertisements.len().max(1));
            tokio::spawn(async move {
                for advertisement in advertisements {
                    let _ = tx.send(advertisement).await;
                }
                if !close {
                    tx.closed().await;
                }
            });
            Ok(rx)
        })
    }
}

struct FakeSession {
    address: MacAddress,
    services: Vec<ServiceInfo>,
    fragments: Vec<Fragment>,
    close_subscriptions: bool,
    subscriptions: HashMap<String, JoinHandle<()>>,
    calls: Arc<Mutex<Vec<RadioCall>>>,
}

impl FakeSession {
    fn record(&self, call: RadioCall) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Session for FakeSession {
    fn list_services(&self) -> RadioFuture<'_, Vec<ServiceInfo>> {
        Box::pin(async move { Ok(self.services.clone()) })
    }

    fn subscribe<'a>(
        &'a mut self,
        service_id: &'a str,
        characteristic_id: &'a str,
    ) -> RadioFuture<'a, mpsc::Receiver<Fragment>> {
        Box::pin(async move {
            if !self
                .services
                .iter()
                .any(|s| s.exposes(service_id, characteristic_id))
            {
                return Err(RadioError::UnknownCharacteristic {
                    service: service_id.to_string(),
                    characteristic: characteristic_id.to_string(),
                });
            }
            self.record(RadioCall::Subscribe(
                self.address,
                characteristic_id.to_string(),
            ));

            let fragments = self.fragments.clone();
            let close = self.close_subscriptions;
            let (tx, rx) = mpsc::channel(fragments.len().max(1));
            let task = tokio::spawn(async move {
                for fragment in fragments {
                    let _ = tx.send(fragment).await;
                }
                if !close {
                    tx.closed().await;
                }
            });
            self.subscriptions.insert(characteristic_id.to_string(), task);
            Ok(rx)
        })
    }

    fn unsubscribe<'a>(&'a mut self, characteristic_id: &'a str) -> RadioFuture<'a, ()> {
        Box::pin(async move {
            if let Some(task) = self.subscriptions.remove(characteristic_id) {
                task.abort();
            }
            self.record(RadioCall::Unsubscribe(
                self.address,
                characteristic_id.to_string(),
            ));
            Ok(())
        })
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        for (_, task) in self.subscriptions.drain() {
            task.abort();
        }
        self.record(RadioCall::DropSession(self.address));
    }
}
