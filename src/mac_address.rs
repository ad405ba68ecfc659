//! Radio address type for configured and discovered peripherals.
//!
//! Configs carry addresses as text while the radio backend hands out raw
//! bytes; both are normalised into [`MacAddress`] so that binding a config to
//! a discovery result is a plain equality check.

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A Bluetooth device address stored as a compact 6-byte array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MacAddress(pub [u8; 6]);

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Why an address string was rejected.
#[derive(Error, Debug, PartialEq)]
pub enum ParseMacError {
    #[error("invalid MAC address '{0}': expected six octets")]
    OctetCount(String),
    #[error("invalid MAC address '{address}': octet {index} is not two hex digits")]
    Octet { address: String, index: usize },
}

/// Accepts `AA:BB:CC:DD:EE:FF` and `aa-bb-cc-dd-ee-ff`, with surrounding
/// whitespace.
impl FromStr for MacAddress {
    type Err = ParseMacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s.trim();
        let mut bytes = [0u8; 6];
        let mut octets = address.split([':', '-']);

        for (index, byte) in bytes.iter_mut().enumerate() {
            let octet = octets
                .next()
                .ok_or_else(|| ParseMacError::OctetCount(address.to_string()))?;
            if octet.len() != 2 {
                return Err(ParseMacError::Octet {
                    address: address.to_string(),
                    index,
                });
            }
            *byte = u8::from_str_radix(octet, 16).map_err(|_| ParseMacError::Octet {
                address: address.to_string(),
                index,
            })?;
        }
        if octets.next().is_some() {
            return Err(ParseMacError::OctetCount(address.to_string()));
        }

        Ok(MacAddress(bytes))
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "bluer")]
impl From<bluer::Address> for MacAddress {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluer")]
impl From<MacAddress> for bluer::Address {
    fn from(addr: MacAddress) -> Self {
        bluer::Address(addr.0)
    }
}
