//! Persisted entity store seam.
//!
//! The façade persists every device the managers queue through an
//! [`EntityStore`] and reads persisted rows back when answering `scan` and
//! `status`. `bluehub-store` provides the SQLite implementation;
//! [`MemoryStore`] keeps everything in process.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use bluehub_types::{Address, BluetoothDevice};

use crate::error::Result;

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get(&self, address: &Address) -> Result<Option<BluetoothDevice>>;

    /// Look a device up by address or exact name.
    async fn find(&self, key: &str) -> Result<Option<BluetoothDevice>>;

    /// Merge each device into its persisted row (inserting new ones) and
    /// return the merged rows, in input order.
    async fn merge(&self, devices: Vec<BluetoothDevice>) -> Result<Vec<BluetoothDevice>>;

    async fn all(&self) -> Result<Vec<BluetoothDevice>>;
}

/// In-process [`EntityStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<BTreeMap<Address, BluetoothDevice>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get(&self, address: &Address) -> Result<Option<BluetoothDevice>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(address).cloned())
    }

    async fn find(&self, key: &str) -> Result<Option<BluetoothDevice>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(address) = Address::try_parse(key) {
            return Ok(rows.get(&address).cloned());
        }
        Ok(rows.values().find(|d| d.is_identified_by(key)).cloned())
    }

    async fn merge(&self, devices: Vec<BluetoothDevice>) -> Result<Vec<BluetoothDevice>> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let merged = devices
            .into_iter()
            .map(|device| match rows.get_mut(&device.address) {
                Some(row) => {
                    row.merge(device);
                    row.clone()
                }
                None => {
                    rows.insert(device.address, device.clone());
                    device
                }
            })
            .collect();
        Ok(merged)
    }

    async fn all(&self) -> Result<Vec<BluetoothDevice>> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[tokio::test]
    async fn test_merge_inserts_then_merges() {
        let store = MemoryStore::new();
        let merged = store
            .merge(vec![BluetoothDevice::new(addr()).with_name("Sensor1")])
            .await
            .unwrap();
        assert_eq!(merged[0].name.as_deref(), Some("Sensor1"));

        let mut update = BluetoothDevice::new(addr());
        update.connected = Some(true);
        let merged = store.merge(vec![update]).await.unwrap();
        assert_eq!(merged[0].name.as_deref(), Some("Sensor1"));
        assert_eq!(merged[0].connected, Some(true));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_find_by_name_or_address() {
        let store = MemoryStore::new();
        store
            .merge(vec![BluetoothDevice::new(addr()).with_name("Sensor1")])
            .await
            .unwrap();
        assert!(store.find("Sensor1").await.unwrap().is_some());
        assert!(store.find("aa:bb:cc:dd:ee:ff").await.unwrap().is_some());
        assert!(store.find("Other").await.unwrap().is_none());
        assert!(store.get(&addr()).await.unwrap().is_some());
    }
}
