//! Periodic publication of every device's latest snapshot into gauges.

use crate::config::DeviceConfig;
use crate::listener::shutdown_requested;
use crate::metrics::{GaugeHandle, Labels, MetricsSink};
use crate::snapshot::SnapshotReader;
use crate::telemetry::DeviceKind;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A device whose snapshot is exported.
#[derive(Debug, Clone)]
pub struct MonitoredDevice {
    pub kind: DeviceKind,
    pub config: DeviceConfig,
    pub snapshot: SnapshotReader,
}

impl MonitoredDevice {
    /// Labels attached to every gauge of this device.
    pub fn labels(&self) -> Labels {
        Labels::from([
            ("dev_name".to_string(), self.config.identity.clone()),
            ("mac_address".to_string(), self.config.address.to_string()),
            ("service_uuid".to_string(), self.config.service_id.clone()),
            (
                "characteristic".to_string(),
                self.config.characteristic_id.clone(),
            ),
        ])
    }
}

/// How long to wait before the next pass so passes start `interval` apart.
/// A pass that overran the interval is followed immediately.
pub fn next_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

pub struct MetricsScheduler {
    devices: Vec<MonitoredDevice>,
    gauges: BTreeMap<DeviceKind, Vec<Arc<dyn GaugeHandle>>>,
    refresh_interval: Duration,
}

impl MetricsScheduler {
    /// Declare the gauges of every kind present in `devices` on `sink`.
    pub fn new(
        sink: &dyn MetricsSink,
        devices: Vec<MonitoredDevice>,
        refresh_interval: Duration,
    ) -> Self {
        let mut gauges = BTreeMap::new();
        for device in &devices {
            gauges.entry(device.kind).or_insert_with(|| {
                device
                    .kind
                    .metrics()
                    .iter()
                    .map(|m| {
                        let name = format!("{}{}", device.kind.metric_prefix(), m.name);
                        sink.declare_gauge(&name, m.help)
                    })
                    .collect()
            });
        }

        Self {
            devices,
            gauges,
            refresh_interval,
        }
    }

    /// Push the latest snapshot of every device. Returns how many devices
    /// had one.
    pub fn publish_once(&self) -> usize {
        let mut published = 0;
        for device in &self.devices {
            let Some(snapshot) = device.snapshot.latest() else {
                warn!(device = %device.config.identity, "No valid stats, skipping");
                continue;
            };
            let Some(gauges) = self.gauges.get(&snapshot.reading.kind()) else {
                warn!(
                    device = %device.config.identity,
                    kind = %snapshot.reading.kind(),
                    "No gauges declared for reading"
                );
                continue;
            };

            let labels = device.labels();
            for (gauge, value) in gauges.iter().zip(snapshot.reading.values()) {
                gauge.set(&labels, value);
            }
            debug!(
                device = %device.config.identity,
                version = snapshot.version,
                "Updated stats"
            );
            published += 1;
        }
        published
    }

    /// Publish every `refresh_interval` until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let started = Instant::now();
            let published = self.publish_once();
            let elapsed = started.elapsed();
            let sleep = next_sleep(self.refresh_interval, elapsed);
            info!(
                published,
                devices = self.devices.len(),
                elapsed = ?elapsed,
                sleep = ?sleep,
                "Refreshed prometheus stats"
            );

            tokio::select! {
                _ = shutdown_requested(&mut shutdown) => return,
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }
}
