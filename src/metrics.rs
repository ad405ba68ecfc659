//! Gauge sink the scheduler publishes into.
//!
//! [`MetricsSink`] and [`GaugeHandle`] are the narrow capability the scheduler
//! needs. [`PrometheusRegistry`] implements them on top of `prometheus-client`
//! and renders the text exposition format for the HTTP endpoint.

use parking_lot::Mutex;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Label name → value. Ordered so the exported series are stable.
pub type Labels = BTreeMap<String, String>;

/// A gauge that can hold one value per label set.
pub trait GaugeHandle: Send + Sync {
    fn set(&self, labels: &Labels, value: f64);
}

/// Something gauges can be declared on.
pub trait MetricsSink: Send + Sync {
    fn declare_gauge(&self, name: &str, help: &str) -> Arc<dyn GaugeHandle>;
}

type GaugeFamily = Family<Vec<(String, String)>, Gauge<f64, AtomicU64>>;

/// A `prometheus-client` registry shared between the scheduler and the HTTP server.
#[derive(Default)]
pub struct PrometheusRegistry {
    registry: Mutex<Registry>,
    gauges: Mutex<BTreeMap<String, Arc<PrometheusGauge>>>,
}

impl PrometheusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry.lock())?;
        Ok(body)
    }
}

impl MetricsSink for PrometheusRegistry {
    /// Declaring the same name twice returns the already registered gauge.
    fn declare_gauge(&self, name: &str, help: &str) -> Arc<dyn GaugeHandle> {
        let mut gauges = self.gauges.lock();
        if let Some(existing) = gauges.get(name) {
            return existing.clone();
        }

        let family = GaugeFamily::default();
        self.registry.lock().register(name, help, family.clone());
        let gauge = Arc::new(PrometheusGauge { family });
        gauges.insert(name.to_string(), gauge.clone());
        gauge
    }
}

struct PrometheusGauge {
    family: GaugeFamily,
}

impl GaugeHandle for PrometheusGauge {
    fn set(&self, labels: &Labels, value: f64) {
        let labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.family.get_or_create(&labels).set(value);
    }
}
