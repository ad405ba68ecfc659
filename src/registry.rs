//! Binding configured devices to the results of a discovery scan.

use crate::config::DeviceConfig;
use crate::radio::{DiscoveredDevice, Radio, SessionHandle};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

/// Slack given to the transport on top of the requested scan time before the
/// scan is abandoned.
const SCAN_GRACE: Duration = Duration::from_secs(5);

/// A configured device, plus the session handle if the scan found it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundDevice {
    pub config: DeviceConfig,
    pub handle: Option<SessionHandle>,
}

impl BoundDevice {
    pub fn unbound(config: DeviceConfig) -> Self {
        Self {
            config,
            handle: None,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.handle.is_some()
    }
}

/// Match discovery results to configs by address. Returns one entry per
/// config, in config order.
pub fn bind(configs: &[DeviceConfig], discovered: &[DiscoveredDevice]) -> Vec<BoundDevice> {
    let mut bound: Vec<BoundDevice> = configs.iter().cloned().map(BoundDevice::unbound).collect();
    for device in discovered {
        for entry in bound.iter_mut().filter(|b| !b.is_bound()) {
            if entry.config.address == device.address {
                entry.handle = Some(device.handle.clone());
            }
        }
    }
    bound
}

/// Run one discovery scan over the services `configs` use and bind the results.
///
/// Never fails: a device that is not seen, or a scan that errors, leaves the
/// affected configs unbound so the remaining devices are still monitored.
pub async fn resolve(
    radio: &dyn Radio,
    configs: &[DeviceConfig],
    scan_timeout: Duration,
) -> Vec<BoundDevice> {
    if configs.is_empty() {
        return Vec::new();
    }

    let service_ids: BTreeSet<String> = configs.iter().map(|c| c.service_id.clone()).collect();
    info!(services = ?service_ids, timeout = ?scan_timeout, "Scanning for devices");

    let discovered = match tokio::time::timeout(
        scan_timeout + SCAN_GRACE,
        radio.scan(&service_ids, scan_timeout),
    )
    .await
    {
        Ok(Ok(discovered)) => discovered,
        Ok(Err(e)) => {
            error!(error = %e, "Discovery scan failed");
            Vec::new()
        }
        Err(_) => {
            error!("Discovery scan did not finish in time");
            Vec::new()
        }
    };

    let bound = bind(configs, &discovered);
    let found = bound.iter().filter(|b| b.is_bound()).count();
    info!(
        found,
        configured = bound.len(),
        discovered = discovered.len(),
        "Bound configured devices"
    );
    for missing in bound.iter().filter(|b| !b.is_bound()) {
        warn!(
            device = %missing.config.identity,
            address = %missing.config.address,
            "Device not seen during scan"
        );
    }
    bound
}
