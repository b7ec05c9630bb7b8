//! Bluetooth hardware addresses.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;

/// A 6-byte Bluetooth device address (BD_ADDR).
///
/// Parsing is case-insensitive and accepts `:` or `-` separators as well as
/// 12 bare hex digits, so two spellings of the same MAC compare equal.
/// The canonical textual form is upper-case and colon separated.
///
/// ```
/// use bluehub_types::Address;
///
/// let a: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
/// let b: Address = "AA-BB-CC-DD-EE-FF".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "AA:BB:CC:DD:EE:FF");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 6]);

impl Address {
    /// Build an address from its six bytes, most significant first.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The raw bytes, most significant first.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 6] {
        self.0
    }

    /// The organizationally unique identifier (first three bytes).
    #[must_use]
    pub const fn oui(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// `true` for `00:00:00:00:00:00`, which some platforms report when the
    /// real address is hidden.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }

    /// Returns `Some(address)` if `s` parses as a MAC address.
    ///
    /// Convenience for call sites that accept either a name or an address.
    #[must_use]
    pub fn try_parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

impl FromStr for Address {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let hex: String = trimmed
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        let separators = trimmed.len() - hex.len();
        if hex.len() != 12 || (separators != 0 && separators != 5) {
            return Err(ParseError::InvalidAddress(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = hex
                .get(i * 2..i * 2 + 2)
                .ok_or_else(|| ParseError::InvalidAddress(s.to_string()))?;
            *byte = u8::from_str_radix(pair, 16)
                .map_err(|_| ParseError::InvalidAddress(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl From<[u8; 6]> for Address {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_formats() {
        let expected = Address::new([0xAA, 0xBB, 0xCC, 0x01, 0x02, 0x03]);
        assert_eq!("AA:BB:CC:01:02:03".parse::<Address>().unwrap(), expected);
        assert_eq!("aa:bb:cc:01:02:03".parse::<Address>().unwrap(), expected);
        assert_eq!("aa-bb-cc-01-02-03".parse::<Address>().unwrap(), expected);
        assert_eq!("aabbcc010203".parse::<Address>().unwrap(), expected);
        assert_eq!(" AA:BB:CC:01:02:03 ".parse::<Address>().unwrap(), expected);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Address>().is_err());
        assert!("Sensor1".parse::<Address>().is_err());
        assert!("AA:BB:CC:DD:EE".parse::<Address>().is_err());
        assert!("AA:BB:CC:DD:EE:GG".parse::<Address>().is_err());
        assert!("AA:BB:CC:DD:EE:FF:00".parse::<Address>().is_err());
        assert!("AA:BBCC:DD:EE:FF".parse::<Address>().is_err());
    }

    #[test]
    fn test_oui_and_zero() {
        let addr: Address = "00:1A:7D:DA:71:13".parse().unwrap();
        assert_eq!(addr.oui(), [0x00, 0x1A, 0x7D]);
        assert!(!addr.is_zero());
        assert!(Address::default().is_zero());
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let addr: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: Address = serde_json::from_str("\"aa-bb-cc-dd-ee-ff\"").unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        #[test]
        fn display_then_parse_is_identity(bytes in any::<[u8; 6]>()) {
            let addr = Address::new(bytes);
            let lower = addr.to_string().to_lowercase();
            prop_assert_eq!(lower.parse::<Address>().unwrap(), addr);
        }
    }
}
