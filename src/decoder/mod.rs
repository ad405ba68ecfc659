//! Payload decoders for the supported peripherals.
//!
//! - [`li3`] reassembles CSV records split across GATT notifications.
//! - [`govee`] decodes fixed-width manufacturer data from advertisements.

pub mod govee;
pub mod li3;

use thiserror::Error;

/// Errors produced while decoding a payload. None of them are fatal: the
/// offending input is dropped and decoding continues with the next one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Fragment is not ASCII: {0:02x?}")]
    NotAscii(Vec<u8>),
    #[error("Malformed record '{record}': expected {expected} fields, got {found}")]
    FieldCount {
        record: String,
        expected: usize,
        found: usize,
    },
    #[error("Malformed record '{record}': field {index} ('{value}') is not a valid {kind}")]
    InvalidField {
        record: String,
        index: usize,
        value: String,
        kind: &'static str,
    },
    #[error("Payload too short: expected at least {expected} bytes, got {found}")]
    Truncated { expected: usize, found: usize },
}
