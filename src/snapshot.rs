//! Per-device latest-value slot shared between a listener and the scheduler.
//!
//! The listener owns the only [`SnapshotWriter`]; the scheduler holds the
//! [`SnapshotReader`]. Publishing swaps in a whole new `Arc`, so a reader sees
//! either the previous snapshot or the new one, never a partial record.

use crate::telemetry::{Reading, TelemetrySnapshot};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// Create a connected, empty writer/reader pair.
pub fn snapshot_slot() -> (SnapshotWriter, SnapshotReader) {
    let (tx, rx) = watch::channel(None);
    (SnapshotWriter { tx, version: 0 }, SnapshotReader { rx })
}

#[derive(Debug)]
pub struct SnapshotWriter {
    tx: watch::Sender<Option<Arc<TelemetrySnapshot>>>,
    version: u64,
}

impl SnapshotWriter {
    /// Replace the current snapshot with `reading` and return the new version.
    pub fn publish(&mut self, reading: impl Into<Reading>) -> u64 {
        self.version += 1;
        let snapshot = TelemetrySnapshot {
            version: self.version,
            received_at: SystemTime::now(),
            reading: reading.into(),
        };
        self.tx.send_replace(Some(Arc::new(snapshot)));
        self.version
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Option<Arc<TelemetrySnapshot>>>,
}

impl SnapshotReader {
    /// The most recent snapshot, or `None` if nothing has been decoded yet.
    pub fn latest(&self) -> Option<Arc<TelemetrySnapshot>> {
        self.rx.borrow().clone()
    }
}
