//! Reassembly of Li3 battery telemetry from GATT notification fragments.
//!
//! The BMS streams a comma separated record such as
//! `1309,327,327,328,327,32,39,0,79,000000`, but the radio delivers it in
//! pieces and interleaves an unrelated control frame (`&,1,114,006880`):
//!
//! ```text
//! "1309,327,327,328,327"     starts a record
//! "&,1,114,006880"           noise, dropped
//! ",32,39,0,79,000000"       continues the record, which is now complete
//! ```
//!
//! [`advance`] is the pure transition function; [`Li3Decoder`] owns the
//! buffer for one device and logs what happens.

use super::DecodeError;
use crate::telemetry::BatteryTelemetry;
use tracing::{debug, warn};

/// Separator between fields, and the first byte of a continuation fragment.
pub const FIELD_SEPARATOR: char = ',';

/// Marker found in the control frame the BMS interleaves with telemetry.
/// Its meaning is undocumented, so the frame is recognised by this marker only.
pub const NOISE_MARKER: &str = "&";

/// Number of fields in a complete battery record.
pub const FIELD_COUNT: usize = 10;

/// The first five fields are hundredths of a volt.
const VOLTAGE_FIELDS: usize = 5;
const VOLTAGE_SCALE: f64 = 100.0;

/// Whether a buffer holds part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Empty,
    Accumulating,
}

/// A record under construction. Only ever empty or a prefix of a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblyBuffer(String);

impl AssemblyBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AssemblyState {
        if self.0.is_empty() {
            AssemblyState::Empty
        } else {
            AssemblyState::Accumulating
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssemblyBuffer {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What a single fragment did to the decoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The fragment was buffered; no complete record yet.
    Accumulating,
    /// The fragment was a control frame and was dropped.
    Noise,
    /// The fragment completed a record.
    Complete {
        record: String,
        telemetry: BatteryTelemetry,
    },
    /// A record boundary was reached but the record did not parse, or the
    /// fragment itself was unusable.
    Malformed(DecodeError),
}

/// Feed one fragment into `buffer`.
///
/// - A fragment starting with [`FIELD_SEPARATOR`] continues the buffered
///   record. The joined record is parsed; on success the buffer is cleared.
///   On failure the joined text stays buffered, unless it already has more
///   fields than a record holds, in which case it is dropped.
/// - A fragment containing [`NOISE_MARKER`] is dropped.
/// - Anything else starts a new record, replacing whatever was buffered. If
///   that fragment is already a whole record it completes immediately.
pub fn advance(buffer: AssemblyBuffer, fragment: &[u8]) -> (AssemblyBuffer, Transition) {
    let text = match std::str::from_utf8(fragment) {
        Ok(text) if text.is_ascii() => trim_end(text),
        _ => {
            return (
                buffer,
                Transition::Malformed(DecodeError::NotAscii(fragment.to_vec())),
            );
        }
    };

    if text.starts_with(FIELD_SEPARATOR) {
        let mut record = buffer.0;
        record.push_str(text);
        return match parse_record(&record) {
            Ok(telemetry) => (AssemblyBuffer::new(), Transition::Complete { record, telemetry }),
            // Already past the field count: no later fragment can repair it.
            Err(e @ DecodeError::FieldCount { found, expected, .. }) if found > expected => {
                (AssemblyBuffer::new(), Transition::Malformed(e))
            }
            Err(e) => (AssemblyBuffer(record), Transition::Malformed(e)),
        };
    }

    if text.contains(NOISE_MARKER) {
        return (buffer, Transition::Noise);
    }

    match parse_record(text) {
        Ok(telemetry) => (
            AssemblyBuffer::new(),
            Transition::Complete {
                record: text.to_string(),
                telemetry,
            },
        ),
        Err(_) => (AssemblyBuffer::from(text), Transition::Accumulating),
    }
}

fn trim_end(text: &str) -> &str {
    text.trim_end_matches(|c: char| c.is_ascii_whitespace() || c.is_ascii_control())
}

/// Parse a complete record into telemetry.
pub fn parse_record(record: &str) -> Result<BatteryTelemetry, DecodeError> {
    let fields: Vec<&str> = record.split(FIELD_SEPARATOR).map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(DecodeError::FieldCount {
            record: record.to_string(),
            expected: FIELD_COUNT,
            found: fields.len(),
        });
    }

    let mut numbers = [0f64; FIELD_COUNT - 1];
    for (index, value) in fields[..FIELD_COUNT - 1].iter().enumerate() {
        let number: f64 = value
            .parse()
            .ok()
            .filter(|n: &f64| n.is_finite())
            .ok_or_else(|| invalid_field(record, index, value, "number"))?;
        numbers[index] = if index < VOLTAGE_FIELDS {
            number / VOLTAGE_SCALE
        } else {
            number
        };
    }

    let fault = fields[FIELD_COUNT - 1];
    let fault_code = u32::from_str_radix(fault, 16)
        .map_err(|_| invalid_field(record, FIELD_COUNT - 1, fault, "hex integer"))?;

    Ok(BatteryTelemetry {
        battery_voltage: numbers[0],
        cell_1_voltage: numbers[1],
        cell_2_voltage: numbers[2],
        cell_3_voltage: numbers[3],
        cell_4_voltage: numbers[4],
        bms_temperature: numbers[5],
        battery_temperature: numbers[6],
        battery_power: numbers[7],
        battery_soc: numbers[8],
        fault_code,
    })
}

fn invalid_field(record: &str, index: usize, value: &str, kind: &'static str) -> DecodeError {
    DecodeError::InvalidField {
        record: record.to_string(),
        index,
        value: value.to_string(),
        kind,
    }
}

/// Stateful decoder for one battery, owned by that battery's listener.
#[derive(Debug, Default)]
pub struct Li3Decoder {
    buffer: AssemblyBuffer,
    last_record: Option<String>,
}

impl Li3Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification payload; returns telemetry when a record completes.
    pub fn feed(&mut self, fragment: &[u8]) -> Option<BatteryTelemetry> {
        let (buffer, transition) = advance(std::mem::take(&mut self.buffer), fragment);
        self.buffer = buffer;

        match transition {
            Transition::Accumulating => {
                debug!(buffer = self.buffer.as_str(), "Started record");
                None
            }
            Transition::Noise => {
                debug!(fragment = %String::from_utf8_lossy(fragment), "Dropped control frame");
                None
            }
            Transition::Complete { record, telemetry } => {
                debug!(record = %record, "Decoded record");
                self.last_record = Some(record);
                Some(telemetry)
            }
            Transition::Malformed(e) => {
                warn!(error = %e, "Discarding malformed telemetry");
                None
            }
        }
    }

    pub fn buffer(&self) -> &AssemblyBuffer {
        &self.buffer
    }

    /// The raw text of the last record that decoded successfully.
    pub fn last_record(&self) -> Option<&str> {
        self.last_record.as_deref()
    }
}
