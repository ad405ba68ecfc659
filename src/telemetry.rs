//! Decoded telemetry values and the metric layout for each device kind.

use std::fmt;
use std::time::SystemTime;

/// Name and help text of one exported gauge, without the kind prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSpec {
    pub name: &'static str,
    pub help: &'static str,
}

const fn metric(name: &'static str, help: &'static str) -> MetricSpec {
    MetricSpec { name, help }
}

/// The kinds of peripheral the daemon knows how to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    /// Lithium battery pack with a BMS streaming CSV over a GATT notification.
    Li3Battery,
    /// Govee H5075 hygrometer broadcasting readings in its advertisements.
    GoveeHygrometer,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Li3Battery, DeviceKind::GoveeHygrometer];

    /// Prefix prepended to every gauge of this kind.
    pub fn metric_prefix(self) -> &'static str {
        match self {
            DeviceKind::Li3Battery => "li3_",
            DeviceKind::GoveeHygrometer => "govee_",
        }
    }

    /// Gauges exported for this kind, in the order [`Reading::values`] yields them.
    pub fn metrics(self) -> &'static [MetricSpec] {
        match self {
            DeviceKind::Li3Battery => &BatteryTelemetry::METRICS,
            DeviceKind::GoveeHygrometer => &HygrometerTelemetry::METRICS,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Li3Battery => write!(f, "li3"),
            DeviceKind::GoveeHygrometer => write!(f, "govee"),
        }
    }
}

/// One complete battery record, e.g. `1309,327,327,328,327,32,39,0,79,000000`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryTelemetry {
    /// Pack voltage in volts
    pub battery_voltage: f64,
    pub cell_1_voltage: f64,
    pub cell_2_voltage: f64,
    pub cell_3_voltage: f64,
    pub cell_4_voltage: f64,
    pub bms_temperature: f64,
    pub battery_temperature: f64,
    /// Charge or draw as reported by the BMS (unit undocumented)
    pub battery_power: f64,
    /// State of charge in percent
    pub battery_soc: f64,
    /// BMS fault code, transmitted as hex
    pub fault_code: u32,
}

impl BatteryTelemetry {
    pub const METRICS: [MetricSpec; 10] = [
        metric("battery_voltage", "Current volts of the battery"),
        metric("cell_1_voltage", "Battery Cell 1 Voltage"),
        metric("cell_2_voltage", "Battery Cell 2 Voltage"),
        metric("cell_3_voltage", "Battery Cell 3 Voltage"),
        metric("cell_4_voltage", "Battery Cell 4 Voltage"),
        metric("bms_temperature", "The temperature of the BMS"),
        metric(
            "battery_temperature",
            "Battery temperature, the pack will not charge when too cold or hot",
        ),
        metric("battery_power", "Battery current power charge or draw"),
        metric("battery_soc", "Percentage of battery charge left"),
        metric("fault_code", "Type of battery fault (hex converted to int)"),
    ];

    pub fn values(&self) -> [f64; 10] {
        [
            self.battery_voltage,
            self.cell_1_voltage,
            self.cell_2_voltage,
            self.cell_3_voltage,
            self.cell_4_voltage,
            self.bms_temperature,
            self.battery_temperature,
            self.battery_power,
            self.battery_soc,
            f64::from(self.fault_code),
        ]
    }
}

/// One decoded hygrometer advertisement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HygrometerTelemetry {
    pub battery_pct_left: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// Signal strength of the advertisement in dBm, 0 when unknown
    pub rssi: i16,
    pub temperature_c: f64,
    pub temperature_f: f64,
}

impl HygrometerTelemetry {
    pub const METRICS: [MetricSpec; 5] = [
        metric("battery_pct_left", "Percentage of battery left"),
        metric("humidity", "Humidity percentage"),
        metric("rssi", "Bluetooth signal strength of the last advertisement"),
        metric("temperature_c", "Current temperature in Celsius"),
        metric("temperature_f", "Current temperature in Fahrenheit"),
    ];

    pub fn values(&self) -> [f64; 5] {
        [
            self.battery_pct_left,
            self.humidity,
            f64::from(self.rssi),
            self.temperature_c,
            self.temperature_f,
        ]
    }
}

/// A decoded value of either kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    Battery(BatteryTelemetry),
    Hygrometer(HygrometerTelemetry),
}

impl Reading {
    pub fn kind(&self) -> DeviceKind {
        match self {
            Reading::Battery(_) => DeviceKind::Li3Battery,
            Reading::Hygrometer(_) => DeviceKind::GoveeHygrometer,
        }
    }

    /// Gauge values aligned with `self.kind().metrics()`.
    pub fn values(&self) -> Vec<f64> {
        match self {
            Reading::Battery(b) => b.values().to_vec(),
            Reading::Hygrometer(h) => h.values().to_vec(),
        }
    }
}

impl From<BatteryTelemetry> for Reading {
    fn from(value: BatteryTelemetry) -> Self {
        Reading::Battery(value)
    }
}

impl From<HygrometerTelemetry> for Reading {
    fn from(value: HygrometerTelemetry) -> Self {
        Reading::Hygrometer(value)
    }
}

/// The latest complete reading of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    /// Starts at 1 and increases with every published reading of the device.
    pub version: u64,
    pub received_at: SystemTime,
    pub reading: Reading,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::expected_battery;

    #[test]
    fn test_metrics_align_with_values() {
        assert_eq!(
            BatteryTelemetry::METRICS.len(),
            expected_battery().values().len()
        );
        for kind in DeviceKind::ALL {
            let names: Vec<_> = kind.metrics().iter().map(|m| m.name).collect();
            let mut deduped = names.clone();
            deduped.sort_unstable();
            deduped.dedup();
            assert_eq!(names.len(), deduped.len(), "duplicate metric in {kind}");
        }
    }

    #[test]
    fn test_battery_values_order() {
        let values = expected_battery().values();
        assert_eq!(values[0], 13.09);
        assert_eq!(values[4], 3.27);
        assert_eq!(values[8], 79.0);
        assert_eq!(values[9], 0.0);
    }

    #[test]
    fn test_reading_kind() {
        let reading = Reading::from(expected_battery());
        assert_eq!(reading.kind(), DeviceKind::Li3Battery);
        assert_eq!(reading.values().len(), reading.kind().metrics().len());

        let hygrometer = Reading::from(HygrometerTelemetry {
            battery_pct_left: 100.0,
            humidity: 54.3,
            rssi: -70,
            temperature_c: 23.55,
            temperature_f: 74.4,
        });
        assert_eq!(hygrometer.kind(), DeviceKind::GoveeHygrometer);
        assert_eq!(hygrometer.values()[2], -70.0);
    }

    #[test]
    fn test_kind_display_and_prefix() {
        assert_eq!(DeviceKind::Li3Battery.to_string(), "li3");
        assert_eq!(DeviceKind::GoveeHygrometer.metric_prefix(), "govee_");
    }
}
