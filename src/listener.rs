//! Per-device listeners feeding decoded telemetry into snapshot slots.
//!
//! Each listener runs until the shutdown channel flips to `true`. Errors are
//! returned to the caller of that one listener and never affect other devices.

use crate::config::DeviceConfig;
use crate::decoder::govee::{H5075_MANUFACTURER_ID, decode_h5075};
use crate::decoder::li3::Li3Decoder;
use crate::radio::{Fragment, Radio, RadioError};
use crate::registry::BoundDevice;
use crate::snapshot::SnapshotWriter;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// Errors that end a listener.
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("{identity} was not found in the discovery scan")]
    DeviceNotFound { identity: String },
    #[error("{identity} has no characteristic {characteristic} under service {service}")]
    CharacteristicNotFound {
        identity: String,
        service: String,
        characteristic: String,
    },
    #[error("Timed out connecting to {identity} after {timeout:?}")]
    ConnectTimeout { identity: String, timeout: Duration },
    #[error("Session with {identity} failed: {source}")]
    Session {
        identity: String,
        #[source]
        source: RadioError,
    },
    #[error("Telemetry stream from {identity} ended")]
    StreamClosed { identity: String },
}

impl ListenError {
    /// Whether the transport failed after the device was found, as opposed
    /// to the device or its characteristic being absent.
    pub fn is_session_failure(&self) -> bool {
        matches!(
            self,
            ListenError::ConnectTimeout { .. }
                | ListenError::Session { .. }
                | ListenError::StreamClosed { .. }
        )
    }
}

/// Resolves once shutdown is signalled or the shutdown sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn session_error(config: &DeviceConfig) -> impl FnOnce(RadioError) -> ListenError + '_ {
    move |source| ListenError::Session {
        identity: config.identity.clone(),
        source,
    }
}

/// Stream battery telemetry from a bound device into `writer`.
///
/// The characteristic is always unsubscribed before returning, whether the
/// listener stops for shutdown or because the stream failed. If the listener
/// future is dropped instead, dropping the session stops the notifications.
pub async fn listen_battery(
    radio: &dyn Radio,
    device: &BoundDevice,
    mut writer: SnapshotWriter,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ListenError> {
    let config = &device.config;
    let Some(handle) = &device.handle else {
        return Err(ListenError::DeviceNotFound {
            identity: config.identity.clone(),
        });
    };

    info!("Attempting to start a notify");
    let mut session = tokio::time::timeout(config.discovery_timeout, radio.open_session(handle))
        .await
        .map_err(|_| ListenError::ConnectTimeout {
            identity: config.identity.clone(),
            timeout: config.discovery_timeout,
        })?
        .map_err(session_error(config))?;

    let services = session
        .list_services()
        .await
        .map_err(session_error(config))?;
    if !services
        .iter()
        .any(|s| s.exposes(&config.service_id, &config.characteristic_id))
    {
        return Err(ListenError::CharacteristicNotFound {
            identity: config.identity.clone(),
            service: config.service_id.clone(),
            characteristic: config.characteristic_id.clone(),
        });
    }

    let fragments = session
        .subscribe(&config.service_id, &config.characteristic_id)
        .await
        .map_err(session_error(config))?;
    info!(
        service = %config.service_id,
        characteristic = %config.characteristic_id,
        "Started notify"
    );

    let result = decode_fragments(config, fragments, &mut writer, &mut shutdown).await;

    info!(characteristic = %config.characteristic_id, "Cleaning up notify");
    if let Err(e) = session.unsubscribe(&config.characteristic_id).await {
        warn!(error = %e, "Failed to stop notify");
    }
    result
}

async fn decode_fragments(
    config: &DeviceConfig,
    mut fragments: mpsc::Receiver<Fragment>,
    writer: &mut SnapshotWriter,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ListenError> {
    let mut decoder = Li3Decoder::new();
    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => return Ok(()),
            fragment = fragments.recv() => {
                let Some(fragment) = fragment else {
                    return Err(ListenError::StreamClosed {
                        identity: config.identity.clone(),
                    });
                };
                if let Some(telemetry) = decoder.feed(&fragment) {
                    let version = writer.publish(telemetry);
                    debug!(version, "Updated stats");
                }
            }
        }
    }
}

/// Decode H5075 advertisements from `config.address` into `writer`.
pub async fn listen_hygrometer(
    radio: &dyn Radio,
    config: &DeviceConfig,
    mut writer: SnapshotWriter,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ListenError> {
    let mut advertisements = radio
        .watch_advertisements(H5075_MANUFACTURER_ID)
        .await
        .map_err(session_error(config))?;
    info!("Listening for advertisements");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return Ok(()),
            advertisement = advertisements.recv() => {
                let Some(advertisement) = advertisement else {
                    return Err(ListenError::StreamClosed {
                        identity: config.identity.clone(),
                    });
                };
                if advertisement.address != config.address {
                    trace!(address = %advertisement.address, "Ignoring advertisement");
                    continue;
                }
                match decode_h5075(&advertisement.data, advertisement.rssi) {
                    Ok(reading) => {
                        let version = writer.publish(reading);
                        debug!(version, "Updated stats");
                    }
                    Err(e) => error!(error = %e, "Failed to decode advertisement"),
                }
            }
        }
    }
}
