//! Platform-agnostic Bluetooth entity types for bluehub.
//!
//! This crate holds the value types shared by the discovery core
//! (bluehub-core), the persistence layer (bluehub-store) and the CLI.
//!
//! # Features
//!
//! - [`Address`]: case-insensitive 6-byte MAC address
//! - [`BluetoothDevice`] / [`BluetoothService`] entities with merge semantics
//! - Class-of-Device decoding ([`DeviceClass`])
//! - Service-class directory and well-known UUIDs ([`uuids`])
//! - OUI manufacturer lookup ([`OuiDirectory`])
//!
//! # Example
//!
//! ```
//! use bluehub_types::{Address, BluetoothDevice};
//!
//! let addr: Address = "aa:bb:cc:dd:ee:ff".parse().unwrap();
//! let mut known = BluetoothDevice::new(addr).with_name("Sensor1");
//!
//! let mut seen = BluetoothDevice::new(addr);
//! seen.rssi = Some(-70);
//! known.merge(seen);
//!
//! assert_eq!(known.name.as_deref(), Some("Sensor1"));
//! assert_eq!(known.rssi, Some(-70));
//! ```

pub mod address;
pub mod class;
pub mod device;
pub mod error;
pub mod manufacturer;
pub mod uuid;

pub use address::Address;
pub use class::{DeviceClass, MajorDeviceClass, MajorServiceClass};
pub use device::{BluetoothDevice, BluetoothService, ChildEntity, Protocol, SwitchEntity};
pub use error::{ParseError, ParseResult};
pub use manufacturer::OuiDirectory;
pub use uuid as uuids;
