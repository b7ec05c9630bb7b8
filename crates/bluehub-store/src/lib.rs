//! SQLite persistence for bluehub Bluetooth entities.
//!
//! This crate provides the on-disk [`EntityStore`](bluehub_core::EntityStore)
//! used by the bluehub daemon: one row per device address holding the
//! merged [`BluetoothDevice`](bluehub_types::BluetoothDevice).
//!
//! # Features
//!
//! - Merge-on-write with the same rules as the in-process cache
//! - Lookup by address or device name
//! - Schema version tracking
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bluehub_core::{BluetoothConfig, BluetoothPlugin};
//! use bluehub_store::Store;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Store::open_default()?;
//! for device in store.list_devices()? {
//!     println!("{} {:?}", device.address, device.name);
//! }
//!
//! let plugin = BluetoothPlugin::builder(BluetoothConfig::default())
//!     .store(Arc::new(store))
//!     .build()?;
//! # drop(plugin);
//! # Ok(())
//! # }
//! ```

mod error;
mod schema;
mod store;

pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/bluehub/entities.db`
/// - macOS: `~/Library/Application Support/bluehub/entities.db`
/// - Windows: `C:\Users\<user>\AppData\Local\bluehub\entities.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("bluehub")
        .join("entities.db")
}
