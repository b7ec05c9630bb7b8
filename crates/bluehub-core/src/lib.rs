//! Bluetooth discovery, connection and entity reconciliation core.
//!
//! This crate discovers nearby Bluetooth devices (both Low Energy and
//! classic BR/EDR), keeps one reconciled entity per device address, and
//! exposes connect/read/write actions over GATT, RFCOMM and L2CAP.
//!
//! # Features
//!
//! - **Dual stack discovery**: BLE advertisements via btleplug, classic inquiry
//!   and SDP lookups via BlueZ
//! - **Entity reconciliation**: every observation is merged into one cached
//!   [`BluetoothDevice`] per address and emits lifecycle [`BluetoothEvent`]s
//! - **Blacklisting**: by address, exact name or manufacturer
//! - **Connections**: GATT sessions, RFCOMM and L2CAP streams, OBEX file push
//! - **Scan control**: pausing and resuming background discovery on request,
//!   optionally for a fixed duration
//! - **Device plugins**: vendor-specific parsing and control (e.g. Switchbot)
//! - **Persistence**: pluggable [`EntityStore`] fed by a background queue
//!
//! # Managers
//!
//! | Manager | Transport | Discovery | I/O |
//! |---------|-----------|-----------|-----|
//! | [`BleManager`] | Bluetooth Low Energy | Advertisements | GATT characteristics |
//! | [`LegacyManager`] | BR/EDR | Inquiry + SDP | RFCOMM / L2CAP streams |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bluehub_core::{BluetoothConfig, BluetoothPlugin, ConnectOptions, ScanRequest};
//!
//! #[tokio::main]
//! async fn main() -> bluehub_core::Result<()> {
//!     let plugin = Arc::new(BluetoothPlugin::builder(BluetoothConfig::default()).build()?);
//!
//!     // Scan both stacks
//!     let devices = plugin.scan(ScanRequest::default()).await?;
//!     println!("Found {} devices", devices.len());
//!
//!     // Open an RFCOMM channel by device name
//!     plugin.write("Sensor1", b"ping", &ConnectOptions::new().port(1)).await?;
//!     let reply = plugin.read("Sensor1", &ConnectOptions::new().port(1), None).await?;
//!     println!("{} bytes", reply.len());
//!
//!     plugin.stop().await;
//!     Ok(())
//! }
//! ```

pub mod blacklist;
pub mod ble;
pub mod bluez;
pub mod cache;
pub mod config;
pub mod coordination;
pub mod error;
pub mod event_handler;
pub mod events;
pub mod legacy;
pub mod manager;
pub mod mock;
pub mod obex;
pub mod plugin;
pub mod plugins;
pub mod store;
pub mod supervisor;
pub mod util;

// Core exports
pub use config::{
    BlacklistConfig, BleConfig, BluetoothConfig, LegacyConfig, ServiceDiscoveryRetry,
    ValidationError,
};
pub use error::{ConnectionFailureReason, DeviceNotFoundReason, Error, ErrorKind, Result};
pub use plugin::{BluetoothPlugin, BluetoothPluginBuilder, ScanRequest};
pub use supervisor::{BlockingBluetooth, TaskSupervisor};

pub use blacklist::DevicesBlacklist;
pub use ble::{BleBackend, BleManager, BtleplugBackend};
pub use cache::EntityCache;
pub use coordination::{Coordination, DeviceQueue, DeviceReceiver, ScanGate};
pub use event_handler::EventHandler;
pub use events::{BluetoothEvent, EventBus, EventDispatcher, EventKind, EventReceiver, Link};
pub use legacy::{LegacyBackend, LegacyManager};
pub use manager::{BluetoothManager, ConnectOptions, Lifecycle, ManagerContext, ManagerKind};
pub use plugins::{DevicePlugin, PluginRegistry};
pub use store::{EntityStore, MemoryStore};

// Re-export from bluehub-types
pub use bluehub_types::uuids;
pub use bluehub_types::{Address, BluetoothDevice, BluetoothService, DeviceClass, OuiDirectory};
