//! Bluetooth Low Energy: advertisement scanning and GATT sessions.

mod backend;
mod btleplug_backend;
mod manager;

pub use backend::{Advertisement, BleBackend, GattSession};
pub use btleplug_backend::BtleplugBackend;
pub use manager::BleManager;
