//! Classic Bluetooth (BR/EDR): inquiry, SDP and RFCOMM/L2CAP streams.

use std::sync::Arc;

mod backend;
#[cfg(target_os = "linux")]
mod bluez_backend;
mod manager;

pub use backend::{
    LegacyBackend, LegacyDiscovery, LegacyStream, ServiceRecord, StreamTarget,
    UnavailableLegacyBackend,
};
#[cfg(target_os = "linux")]
pub use bluez_backend::BluezLegacyBackend;
pub use manager::{ConnectionKey, LegacyManager};

/// The platform's classic stack: BlueZ on Linux, unavailable elsewhere.
#[cfg(target_os = "linux")]
pub fn default_backend(interface: Option<String>) -> Arc<dyn LegacyBackend> {
    Arc::new(BluezLegacyBackend::new(interface))
}

#[cfg(not(target_os = "linux"))]
pub fn default_backend(_interface: Option<String>) -> Arc<dyn LegacyBackend> {
    Arc::new(UnavailableLegacyBackend)
}
