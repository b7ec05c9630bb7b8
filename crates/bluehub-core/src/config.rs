//! Runtime configuration for the Bluetooth core.
//!
//! Durations are expressed in whole seconds so the structure maps directly
//! onto a TOML section:
//!
//! ```toml
//! interface = "hci0"
//! poll_interval = 30
//! tracked_devices = ["AA:BB:CC:DD:EE:FF"]
//!
//! [legacy]
//! service_discovery_workers = 4
//! service_discovery_retry = "until-success"
//!
//! [blacklist]
//! names = ["Noisy Beacon"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use bluehub_types::Address;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level Bluetooth settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter to use (`hci0`). `None` picks the first/default adapter.
    pub interface: Option<String>,
    /// Pause between background discovery passes, in seconds.
    pub poll_interval: u64,
    /// Length of each background discovery pass, in seconds.
    pub scan_duration: u64,
    /// Default connect timeout, in seconds.
    pub connect_timeout: u64,
    /// Bound on joining a connection task when closing it, in seconds.
    pub disconnect_timeout: u64,
    /// Minimum spacing between signal-update events per device, in seconds.
    pub signal_update_interval: u64,
    /// Addresses that are never reported as lost.
    pub tracked_devices: Vec<String>,
    /// Optional Wireshark `manuf` file extending the OUI table.
    pub oui_file: Option<PathBuf>,
    /// Capacity of the broadcast event channel.
    pub event_capacity: usize,
    pub ble: BleConfig,
    pub legacy: LegacyConfig,
    pub blacklist: BlacklistConfig,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            interface: None,
            poll_interval: 30,
            scan_duration: 10,
            connect_timeout: 20,
            disconnect_timeout: 5,
            signal_update_interval: 30,
            tracked_devices: Vec::new(),
            oui_file: None,
            event_capacity: 256,
            ble: BleConfig::default(),
            legacy: LegacyConfig::default(),
            blacklist: BlacklistConfig::default(),
        }
    }
}

/// BLE manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    pub enabled: bool,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Classic (BR/EDR) manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyConfig {
    pub enabled: bool,
    /// Concurrent service lookups during a scan.
    pub service_discovery_workers: usize,
    /// Overall bound on a scan's service lookups, in seconds.
    pub service_discovery_timeout: u64,
    pub service_discovery_retry: ServiceDiscoveryRetry,
}

impl Default for LegacyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_discovery_workers: 4,
            service_discovery_timeout: 30,
            service_discovery_retry: ServiceDiscoveryRetry::UntilSuccess,
        }
    }
}

/// What happens to a device whose service lookup failed or timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceDiscoveryRetry {
    /// The device is marked as looked-up after the first attempt,
    /// successful or not, and never retried.
    Once,
    /// Only successful lookups are remembered; failures are retried on the
    /// next scan.
    #[default]
    UntilSuccess,
}

/// Devices excluded from discovery results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub addresses: Vec<String>,
    pub names: Vec<String>,
    pub manufacturers: Vec<String>,
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `legacy.service_discovery_workers`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl BluetoothConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.scan_duration)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout)
    }

    pub fn signal_update_interval(&self) -> Duration {
        Duration::from_secs(self.signal_update_interval)
    }

    pub fn service_discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.legacy.service_discovery_timeout)
    }

    /// Parsed `tracked_devices`. Call [`validate`](Self::validate) first;
    /// unparsable entries are skipped here.
    pub fn tracked_addresses(&self) -> Vec<Address> {
        self.tracked_devices
            .iter()
            .filter_map(|s| Address::try_parse(s))
            .collect()
    }

    /// Collect every problem with the configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.to_string(),
                message,
            })
        };

        if self.scan_duration == 0 {
            push("scan_duration", "must be at least 1 second".into());
        }
        if self.connect_timeout == 0 {
            push("connect_timeout", "must be at least 1 second".into());
        }
        if self.poll_interval > 86_400 {
            push("poll_interval", "must not exceed one day".into());
        }
        if self.event_capacity == 0 {
            push("event_capacity", "must be greater than zero".into());
        }
        if !self.ble.enabled && !self.legacy.enabled {
            push("ble.enabled", "at least one of ble/legacy must be enabled".into());
        }
        if self.legacy.service_discovery_workers == 0 {
            push(
                "legacy.service_discovery_workers",
                "must be greater than zero".into(),
            );
        }
        if self.legacy.service_discovery_timeout == 0 {
            push(
                "legacy.service_discovery_timeout",
                "must be at least 1 second".into(),
            );
        }
        for (i, addr) in self.tracked_devices.iter().enumerate() {
            if Address::try_parse(addr).is_none() {
                push(
                    &format!("tracked_devices[{i}]"),
                    format!("'{addr}' is not a Bluetooth address"),
                );
            }
        }
        for (i, addr) in self.blacklist.addresses.iter().enumerate() {
            if Address::try_parse(addr).is_none() {
                push(
                    &format!("blacklist.addresses[{i}]"),
                    format!("'{addr}' is not a Bluetooth address"),
                );
            }
        }
        errors
    }

    /// [`validate`](Self::validate), folded into a single [`Error`].
    pub fn check(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::invalid_config(joined))
    }
}
