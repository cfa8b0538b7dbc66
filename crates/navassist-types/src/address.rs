//! Peripheral hardware identifiers.
//!
//! Linux and Windows (and Android) identify peripherals by their 48-bit
//! Bluetooth address. CoreBluetooth never exposes MAC addresses and hands out
//! a per-host UUID instead, so both forms are accepted.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ParseError;

/// A validated peripheral identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum PeripheralAddress {
    /// 48-bit Bluetooth device address, most significant byte first.
    Mac([u8; 6]),
    /// Platform-assigned identifier (macOS/iOS).
    Platform(Uuid),
}

impl PeripheralAddress {
    /// Parse an address, accepting `AA:BB:CC:DD:EE:FF`, `AA-BB-CC-DD-EE-FF`,
    /// `AABBCCDDEEFF` or a hyphenated UUID.
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let trimmed = input.trim();
        if let Some(mac) = parse_mac(trimmed) {
            return Ok(Self::Mac(mac));
        }
        // Only the hyphenated form; a bare 32-digit hex string is too easy to
        // confuse with garbage.
        if trimmed.len() == 36
            && let Ok(uuid) = Uuid::parse_str(trimmed)
        {
            return Ok(Self::Platform(uuid));
        }
        Err(ParseError::InvalidAddress(input.to_string()))
    }

    /// Whether this is the all-zero address CoreBluetooth reports in place of a MAC.
    pub fn is_unspecified(&self) -> bool {
        matches!(self, Self::Mac(bytes) if bytes.iter().all(|b| *b == 0))
    }
}

fn parse_mac(s: &str) -> Option<[u8; 6]> {
    let hex: String = if s.len() == 17 {
        let delim = s.as_bytes()[2];
        if delim != b':' && delim != b'-' {
            return None;
        }
        let mut out = String::with_capacity(12);
        for (i, part) in s.split(delim as char).enumerate() {
            if i >= 6 || part.len() != 2 {
                return None;
            }
            out.push_str(part);
        }
        out
    } else if s.len() == 12 {
        s.to_string()
    } else {
        return None;
    };

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(bytes)
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mac(b) => write!(
                f,
                "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
            Self::Platform(uuid) => write!(f, "{}", uuid.hyphenated()),
        }
    }
}

impl FromStr for PeripheralAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PeripheralAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeripheralAddress> for String {
    fn from(value: PeripheralAddress) -> Self {
        value.to_string()
    }
}
