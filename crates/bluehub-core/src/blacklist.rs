//! Exclusion rules for discovered devices.

use std::collections::HashSet;

use bluehub_types::{Address, BluetoothDevice};

use crate::config::BlacklistConfig;

/// Matches devices that should be ignored by discovery.
///
/// Addresses compare case-insensitively (through [`Address`]), names match
/// exactly and manufacturers case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct DevicesBlacklist {
    addresses: HashSet<Address>,
    names: HashSet<String>,
    manufacturers: HashSet<String>,
}

impl DevicesBlacklist {
    pub fn new(
        addresses: impl IntoIterator<Item = Address>,
        names: impl IntoIterator<Item = String>,
        manufacturers: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            addresses: addresses.into_iter().collect(),
            names: names.into_iter().collect(),
            manufacturers: manufacturers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
        }
    }

    /// Build from config. Unparsable addresses are skipped; config
    /// validation reports them.
    pub fn from_config(config: &BlacklistConfig) -> Self {
        Self::new(
            config
                .addresses
                .iter()
                .filter_map(|a| Address::try_parse(a)),
            config.names.iter().cloned(),
            config.manufacturers.iter().cloned(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty() && self.names.is_empty() && self.manufacturers.is_empty()
    }

    /// Is this device excluded?
    pub fn matches(&self, device: &BluetoothDevice) -> bool {
        self.addresses.contains(&device.address)
            || device
                .name
                .as_ref()
                .is_some_and(|n| self.names.contains(n))
            || device
                .manufacturer
                .as_ref()
                .is_some_and(|m| self.manufacturers.contains(&m.to_lowercase()))
    }
}
