//! Core application runner.
//!
//! [`run`] supervises the device listeners and the scheduler. [`serve`] runs
//! them next to the HTTP exporter until a shutdown signal. Both are decoupled
//! from CLI parsing and logging setup so they can be tested deterministically
//! with a scripted radio.

use crate::config::{Config, ConfigError, DeviceConfig};
use crate::http;
use crate::listener::{ListenError, listen_battery, listen_hygrometer};
use crate::metrics::{MetricsSink, PrometheusRegistry};
use crate::radio::{Radio, RadioError};
use crate::registry;
use crate::scheduler::{MetricsScheduler, MonitoredDevice};
use crate::snapshot::snapshot_slot;
use crate::telemetry::DeviceKind;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing::{Instrument, error, info, info_span, warn};

/// Why a task stopped.
#[derive(Debug)]
enum TaskExit {
    Listener {
        identity: String,
        result: Result<(), ListenError>,
    },
    Scheduler,
}

/// Resolve devices, start one listener per device plus the scheduler, and
/// wait for all of them. Returns once every task has stopped after shutdown.
///
/// A listener that fails is logged and its device is simply no longer
/// updated; the scheduler and the other listeners keep running.
pub async fn run(
    config: &Config,
    radio: Arc<dyn Radio>,
    sink: &dyn MetricsSink,
    shutdown: watch::Receiver<bool>,
) {
    if !config.has_devices() {
        warn!("No devices configured, only the exporter will run");
    }

    let batteries: Vec<DeviceConfig> = config.li3.values().cloned().collect();
    let bound = registry::resolve(radio.as_ref(), &batteries, config.process.scan_time).await;

    let mut tasks = JoinSet::new();
    let mut monitored = Vec::new();

    for device in bound {
        let (writer, reader) = snapshot_slot();
        monitored.push(MonitoredDevice {
            kind: DeviceKind::Li3Battery,
            config: device.config.clone(),
            snapshot: reader,
        });

        let span = info_span!("listener", device = %device.config.identity, kind = "li3");
        let radio = radio.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(
            async move {
                let result = listen_battery(radio.as_ref(), &device, writer, shutdown).await;
                TaskExit::Listener {
                    identity: device.config.identity,
                    result,
                }
            }
            .instrument(span),
        );
    }

    for device in config.govee.values().cloned() {
        let (writer, reader) = snapshot_slot();
        monitored.push(MonitoredDevice {
            kind: DeviceKind::GoveeHygrometer,
            config: device.clone(),
            snapshot: reader,
        });

        let span = info_span!("listener", device = %device.identity, kind = "govee");
        let radio = radio.clone();
        let shutdown = shutdown.clone();
        tasks.spawn(
            async move {
                let result = listen_hygrometer(radio.as_ref(), &device, writer, shutdown).await;
                TaskExit::Listener {
                    identity: device.identity,
                    result,
                }
            }
            .instrument(span),
        );
    }

    let scheduler = MetricsScheduler::new(sink, monitored, config.process.refresh_interval);
    tasks.spawn(
        async move {
            scheduler.run(shutdown).await;
            TaskExit::Scheduler
        }
        .instrument(info_span!("scheduler")),
    );
    info!(tasks = tasks.len(), "Started monitoring");

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(TaskExit::Listener {
                identity,
                result: Ok(()),
            }) => info!(device = %identity, "Listener stopped"),
            Ok(TaskExit::Listener {
                identity,
                result: Err(e),
            }) => error!(device = %identity, error = %e, "Listener failed, device will not be updated"),
            Ok(TaskExit::Scheduler) => info!("Scheduler stopped"),
            Err(e) => error!(error = %e, "Task panicked or was cancelled"),
        }
    }
}

/// Failures that stop the process.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("bluetooth unavailable: {0}")]
    Radio(#[from] RadioError),

    #[error("failed to serve metrics on {addr}: {source}")]
    Exporter {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Serve `/metrics` on `addr` and monitor every configured device until
/// `signal` resolves, then shut everything down.
///
/// Monitoring and the exporter run concurrently from the start. If the
/// exporter stops on its own, for example because `addr` cannot be bound,
/// monitoring is shut down as well and the failure is returned.
///
/// # Errors
/// Returns `RunError::Exporter` if the exporter failed.
pub async fn serve(
    config: Config,
    radio: Arc<dyn Radio>,
    registry: Arc<PrometheusRegistry>,
    addr: SocketAddr,
    signal: impl Future<Output = ()>,
) -> Result<(), RunError> {
    let (shutdown_tx, shutdown) = watch::channel(false);

    let mut exporter = tokio::spawn(http::serve(registry.clone(), addr, shutdown.clone()));
    let monitor = tokio::spawn(async move {
        run(&config, radio, registry.as_ref(), shutdown).await;
    });

    let exited = tokio::select! {
        _ = signal => None,
        exited = &mut exporter => {
            error!("Exporter stopped unexpectedly, shutting down");
            Some(exited)
        }
    };

    let _ = shutdown_tx.send(true);
    if let Err(e) = monitor.await {
        error!(error = %e, "Monitoring task panicked");
    }
    let exited = match exited {
        Some(exited) => exited,
        None => exporter.await,
    };
    exporter_result(addr, exited)?;
    info!("Stopped");
    Ok(())
}

fn exporter_result(
    addr: SocketAddr,
    exited: Result<std::io::Result<()>, JoinError>,
) -> Result<(), RunError> {
    match exited {
        Ok(result) => result.map_err(|source| RunError::Exporter { addr, source }),
        Err(e) => Err(RunError::Exporter {
            addr,
            source: std::io::Error::other(e),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac_address::MacAddress;
    use crate::metrics::PrometheusRegistry;
    use crate::radio::Advertisement;
    use crate::decoder::govee::H5075_MANUFACTURER_ID;
    use crate::test_utils::{
        FakeRadio, H5075_PAYLOAD, HYGROMETER_MAC, LI3_FRAGMENTS, RadioCall, TEST_CONFIG_JSON,
        TEST_MAC, TEST_MAC_2,
    };
    use std::time::Duration;

    fn metric_lines<'a>(body: &'a str, name: &str) -> Vec<&'a str> {
        body.lines()
            .filter(|l| l.starts_with(&format!("{name}{{")))
            .collect()
    }

    async fn run_for(config: Config, radio: Arc<FakeRadio>, duration: Duration) -> String {
        let registry = Arc::new(PrometheusRegistry::new());
        let (shutdown_tx, shutdown) = watch::channel(false);

        let task = {
            let registry = registry.clone();
            let radio: Arc<dyn Radio> = radio;
            tokio::spawn(async move { run(&config, radio, registry.as_ref(), shutdown).await })
        };

        tokio::time::sleep(duration).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
        registry.render().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_discovered_devices_are_published() {
        let config = Config::from_json(TEST_CONFIG_JSON).unwrap();
        let stranger = MacAddress([0x11; 6]);
        let radio = Arc::new(
            FakeRadio::new()
                .with_discovered([stranger, TEST_MAC])
                .with_fragments(TEST_MAC, &LI3_FRAGMENTS)
                .with_advertisement(Advertisement {
                    address: HYGROMETER_MAC,
                    rssi: Some(-67),
                    manufacturer_id: H5075_MANUFACTURER_ID,
                    data: H5075_PAYLOAD.to_vec(),
                }),
        );

        let body = run_for(config, radio.clone(), Duration::from_secs(31)).await;

        let soc = metric_lines(&body, "li3_battery_soc");
        assert_eq!(soc.len(), 1);
        assert!(soc[0].contains("dev_name=\"Li3-Test-1\""));
        assert!(!body.contains("Li3-Test-2"));

        let humidity = metric_lines(&body, "govee_humidity");
        assert_eq!(humidity.len(), 1);
        assert!(humidity[0].contains("mac_address=\"A4:C1:38:00:11:22\""));

        // The undiscovered battery is never connected to.
        assert!(!radio.calls().contains(&RadioCall::Open(TEST_MAC_2)));
        assert!(
            radio
                .calls()
                .contains(&RadioCall::Unsubscribe(TEST_MAC, "BAR".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listener_does_not_stop_others() {
        let config = Config::from_json(TEST_CONFIG_JSON).unwrap();
        let radio = Arc::new(
            FakeRadio::new()
                .with_discovered([TEST_MAC, TEST_MAC_2])
                .with_unreachable(TEST_MAC_2)
                .with_fragments(TEST_MAC, &LI3_FRAGMENTS),
        );

        let body = run_for(config, radio, Duration::from_secs(31)).await;

        let voltage = metric_lines(&body, "li3_battery_voltage");
        assert_eq!(voltage.len(), 1);
        assert!(voltage[0].contains("Li3-Test-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_without_devices_until_shutdown() {
        let config = Config::from_json(
            r#"{"vanD": {"scan_time": 1, "statistics_refresh_interval": 1, "prometheus_exporter_port": 9000}}"#,
        )
        .unwrap();
        let radio = Arc::new(FakeRadio::new());

        let body = run_for(config, radio.clone(), Duration::from_secs(5)).await;

        assert!(radio.scans().is_empty());
        assert!(!body.contains("li3_"));
    }

    fn loopback() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_monitors_while_waiting_for_signal() {
        let config = Config::from_json(TEST_CONFIG_JSON).unwrap();
        let radio = Arc::new(
            FakeRadio::new()
                .with_discovered([TEST_MAC])
                .with_fragments(TEST_MAC, &LI3_FRAGMENTS),
        );
        let registry = Arc::new(PrometheusRegistry::new());

        let mut before_signal = None;
        let signal = async {
            tokio::time::sleep(Duration::from_secs(31)).await;
            before_signal = Some((radio.scans().len(), registry.render().unwrap()));
        };
        serve(config, radio.clone(), registry.clone(), loopback(), signal)
            .await
            .unwrap();

        let (scans, body) = before_signal.unwrap();
        assert_eq!(scans, 1);
        let soc = metric_lines(&body, "li3_battery_soc");
        assert_eq!(soc.len(), 1);
        assert!(soc[0].contains("dev_name=\"Li3-Test-1\""));

        // Shutting down does not start another scan.
        assert_eq!(radio.scans().len(), 1);
        assert_eq!(
            radio.calls().last(),
            Some(&RadioCall::DropSession(TEST_MAC))
        );
    }

    #[tokio::test]
    async fn test_serve_stops_when_exporter_cannot_bind() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        let config = Config::from_json(TEST_CONFIG_JSON).unwrap();
        let radio = Arc::new(FakeRadio::new().with_discovered([TEST_MAC]));

        let err = serve(
            config,
            radio.clone(),
            Arc::new(PrometheusRegistry::new()),
            addr,
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RunError::Exporter { addr: failed, .. } if failed == addr));
        assert!(radio.scans().len() <= 1);
    }
}
