//! Govee H5075 hygrometer advertisement decoding.
//!
//! The manufacturer data (after the 2-byte company id) is laid out as:
//!
//! ```text
//! byte 0      unknown, always 0x00
//! bytes 1..4  big-endian u24: temperature * 10000 + humidity * 10
//! byte 4      battery percentage
//! ```

use super::DecodeError;
use crate::telemetry::HygrometerTelemetry;

/// Company id the H5075 advertises its readings under.
pub const H5075_MANUFACTURER_ID: u16 = 0xEC88;

const READING_OFFSET: usize = 1;
const BATTERY_OFFSET: usize = 4;
const MIN_PAYLOAD_LEN: usize = BATTERY_OFFSET + 1;

/// Decode an H5075 manufacturer data payload.
pub fn decode_h5075(data: &[u8], rssi: Option<i16>) -> Result<HygrometerTelemetry, DecodeError> {
    if data.len() < MIN_PAYLOAD_LEN {
        return Err(DecodeError::Truncated {
            expected: MIN_PAYLOAD_LEN,
            found: data.len(),
        });
    }

    let encoded = u32::from_be_bytes([
        0,
        data[READING_OFFSET],
        data[READING_OFFSET + 1],
        data[READING_OFFSET + 2],
    ]);

    Ok(HygrometerTelemetry {
        battery_pct_left: f64::from(data[BATTERY_OFFSET]),
        humidity: humidity(encoded),
        rssi: rssi.unwrap_or(0),
        temperature_c: temperature_c(encoded),
        temperature_f: temperature_f(encoded),
    })
}

fn temperature_c(encoded: u32) -> f64 {
    round2(f64::from(encoded) / 10_000.0)
}

fn temperature_f(encoded: u32) -> f64 {
    round2(f64::from(encoded) / 10_000.0 * 1.8 + 32.0)
}

fn humidity(encoded: u32) -> f64 {
    round2(f64::from(encoded % 1000) / 10.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
