//! OUI prefix to manufacturer resolution.
//!
//! Classic Bluetooth devices expose their public address, whose first three
//! bytes identify the vendor. A small built-in table covers common vendors;
//! a full table can be loaded from a Wireshark `manuf` file.

use std::collections::HashMap;

use crate::address::Address;
use crate::error::{ParseError, ParseResult};

const BUILTIN: &[([u8; 3], &str)] = &[
    ([0x00, 0x02, 0x5B], "Cambridge Silicon Radio"),
    ([0x00, 0x0A, 0x95], "Apple"),
    ([0x00, 0x12, 0x47], "Samsung"),
    ([0x00, 0x13, 0x7B], "Movon"),
    ([0x00, 0x15, 0x83], "IVT"),
    ([0x00, 0x16, 0x94], "Sennheiser"),
    ([0x00, 0x18, 0x09], "Cresyn"),
    ([0x00, 0x1A, 0x7D], "cyber-blue"),
    ([0x00, 0x1B, 0xDC], "Vencer"),
    ([0x00, 0x1D, 0xD8], "Microsoft"),
    ([0x00, 0x1E, 0x7C], "Taiwick"),
    ([0x00, 0x21, 0x3C], "AliphCom"),
    ([0x00, 0x23, 0x01], "Witron"),
    ([0x00, 0x24, 0x1C], "FuGang"),
    ([0x00, 0x25, 0xDB], "ATI"),
    ([0x04, 0x52, 0xC7], "Bose"),
    ([0x08, 0xDF, 0x1F], "Bose"),
    ([0x28, 0x11, 0xA5], "Bose"),
    ([0x2C, 0x41, 0xA1], "Bose"),
    ([0x38, 0x18, 0x4C], "Sony"),
    ([0x40, 0xEF, 0x4C], "Fihonest"),
    ([0x5C, 0xF3, 0x70], "CC&C"),
    ([0x70, 0x26, 0x05], "Sony"),
    ([0x74, 0x5C, 0x4B], "GN Audio"),
    ([0x88, 0xC6, 0x26], "Logitech"),
    ([0xAC, 0x12, 0x2F], "Fantasia"),
    ([0xB8, 0x27, 0xEB], "Raspberry Pi Foundation"),
    ([0xB8, 0xD6, 0x1A], "Espressif"),
    ([0xC8, 0x2B, 0x96], "Espressif"),
    ([0xD8, 0x3A, 0xDD], "Raspberry Pi Trading"),
    ([0xDC, 0xA6, 0x32], "Raspberry Pi Trading"),
    ([0xE4, 0x5F, 0x01], "Raspberry Pi Trading"),
    ([0xF0, 0x5C, 0x77], "Google"),
    ([0xF4, 0x4E, 0xFD], "Actions Semiconductor"),
];

/// Address prefix to vendor name lookup table.
#[derive(Debug, Clone, Default)]
pub struct OuiDirectory {
    entries: HashMap<[u8; 3], String>,
}

impl OuiDirectory {
    /// A directory pre-populated with the built-in vendor table.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN
                .iter()
                .map(|(oui, name)| (*oui, (*name).to_string()))
                .collect(),
        }
    }

    /// Parse a Wireshark `manuf`-style table.
    ///
    /// Lines look like `00:1A:7D<TAB>cyber-blue<TAB>cyber-blue(HK)Ltd`; the
    /// long name is preferred when present. Blank lines and `#` comments are
    /// skipped, as are entries with a mask (`/28`, `/36`) since those cover
    /// sub-OUI ranges.
    pub fn parse(text: &str) -> ParseResult<Self> {
        let mut entries = HashMap::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('\t').filter(|f| !f.is_empty());
            let prefix = fields.next().unwrap_or_default();
            if prefix.contains('/') {
                continue;
            }
            let short = fields.next().ok_or_else(|| ParseError::InvalidOuiEntry {
                line: idx + 1,
                reason: "missing vendor name".into(),
            })?;
            let name = fields.next().unwrap_or(short).trim();
            let oui = parse_prefix(prefix).ok_or_else(|| ParseError::InvalidOuiEntry {
                line: idx + 1,
                reason: format!("bad prefix '{prefix}'"),
            })?;
            entries.insert(oui, name.to_string());
        }
        Ok(Self { entries })
    }

    /// Overlay entries from `other`, which win on conflict.
    pub fn extend(&mut self, other: OuiDirectory) {
        self.entries.extend(other.entries);
    }

    /// Vendor name for an address, if its prefix is known.
    #[must_use]
    pub fn lookup(&self, address: &Address) -> Option<&str> {
        self.entries.get(&address.oui()).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_prefix(prefix: &str) -> Option<[u8; 3]> {
    let hex: String = prefix
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if hex.len() != 6 {
        return None;
    }
    let mut out = [0u8; 3];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(hex.get(i * 2..i * 2 + 2)?, 16).ok()?;
    }
    Some(out)
}
