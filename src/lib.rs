//! `vand` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, logging setup
//! and process exit codes. The monitoring logic lives in [`crate::app`] where
//! it can be tested deterministically with an injected radio and metrics sink.

pub mod app;
pub mod config;
pub mod decoder;
pub mod http;
pub mod listener;
pub mod mac_address;
pub mod metrics;
pub mod radio;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use app::RunError;
pub use config::{Config, ConfigError, DeviceConfig, parse_duration};
pub use decoder::DecodeError;
pub use decoder::li3::Li3Decoder;
pub use mac_address::MacAddress;
pub use metrics::{GaugeHandle, Labels, MetricsSink, PrometheusRegistry};
pub use radio::{Radio, RadioError, Session};
pub use snapshot::{SnapshotReader, SnapshotWriter, snapshot_slot};
pub use telemetry::{BatteryTelemetry, DeviceKind, HygrometerTelemetry, Reading, TelemetrySnapshot};
