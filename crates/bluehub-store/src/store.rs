//! Main store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bluehub_core::EntityStore;
use bluehub_types::{Address, BluetoothDevice};
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::schema;

/// SQLite-based store for Bluetooth entities.
///
/// Each device address owns one row holding the merged entity. Merging
/// follows [`BluetoothDevice::merge`], so the store and the in-process
/// cache always agree on how observations combine.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        schema::initialize(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a device by address.
    pub fn get_device(&self, address: &Address) -> Result<Option<BluetoothDevice>> {
        let conn = self.conn();
        load(&conn, address)
    }

    /// Find a device by address, or else by exact name. When several
    /// devices share the name, the most recently updated one wins.
    pub fn find_device(&self, key: &str) -> Result<Option<BluetoothDevice>> {
        if let Some(address) = Address::try_parse(key) {
            return self.get_device(&address);
        }

        let conn = self.conn();
        let entity: Option<String> = conn
            .query_row(
                "SELECT entity FROM devices WHERE name = ?1
                 ORDER BY updated_at DESC LIMIT 1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        entity.map(|json| decode(&json)).transpose()
    }

    /// List all devices, ordered by address.
    pub fn list_devices(&self) -> Result<Vec<BluetoothDevice>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT entity FROM devices ORDER BY address")?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter().map(|json| decode(json)).collect()
    }

    pub fn device_count(&self) -> Result<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Merge each device into its stored row, inserting new rows, in one
    /// transaction. Returns the merged rows in input order.
    pub fn merge_devices(&self, devices: Vec<BluetoothDevice>) -> Result<Vec<BluetoothDevice>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut merged = Vec::with_capacity(devices.len());
        for device in devices {
            let row = match load(&tx, &device.address)? {
                Some(mut row) => {
                    row.merge(device);
                    row
                }
                None => device,
            };
            save(&tx, &row)?;
            merged.push(row);
        }
        tx.commit()?;

        debug!(devices = merged.len(), "Merged devices into store");
        Ok(merged)
    }

    /// Delete a device. Returns whether a row existed.
    pub fn remove_device(&self, address: &Address) -> Result<bool> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM devices WHERE address = ?1",
            [address.to_string()],
        )?;
        Ok(removed > 0)
    }
}

fn decode(json: &str) -> Result<BluetoothDevice> {
    Ok(serde_json::from_str(json)?)
}

fn load(conn: &Connection, address: &Address) -> Result<Option<BluetoothDevice>> {
    let entity = conn
        .query_row(
            "SELECT entity FROM devices WHERE address = ?1",
            [address.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    entity.map(|json| decode(&json)).transpose()
}

fn save(tx: &Transaction<'_>, device: &BluetoothDevice) -> Result<()> {
    let entity = serde_json::to_string(device)?;
    tx.execute(
        "INSERT INTO devices (address, name, supports_ble, supports_legacy, updated_at, entity)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(address) DO UPDATE SET
            name = excluded.name,
            supports_ble = excluded.supports_ble,
            supports_legacy = excluded.supports_legacy,
            updated_at = excluded.updated_at,
            entity = excluded.entity",
        rusqlite::params![
            device.address.to_string(),
            device.name,
            device.supports_ble,
            device.supports_legacy,
            device.updated_at,
            entity,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl EntityStore for Store {
    async fn get(&self, address: &Address) -> bluehub_core::Result<Option<BluetoothDevice>> {
        Ok(self.get_device(address)?)
    }

    async fn find(&self, key: &str) -> bluehub_core::Result<Option<BluetoothDevice>> {
        Ok(self.find_device(key)?)
    }

    async fn merge(
        &self,
        devices: Vec<BluetoothDevice>,
    ) -> bluehub_core::Result<Vec<BluetoothDevice>> {
        Ok(self.merge_devices(devices)?)
    }

    async fn all(&self) -> bluehub_core::Result<Vec<BluetoothDevice>> {
        Ok(self.list_devices()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluehub_types::{BluetoothService, ChildEntity, Protocol};
    use time::OffsetDateTime;

    fn addr(text: &str) -> Address {
        text.parse().unwrap()
    }

    #[test]
    fn test_merge_inserts_then_merges() {
        let store = Store::open_in_memory().unwrap();
        let address = addr("AA:BB:CC:DD:EE:FF");

        let mut first = BluetoothDevice::new(address).with_name("Sensor1");
        first.supports_legacy = true;
        first.reachable = Some(true);
        store.merge_devices(vec![first]).unwrap();

        let mut update = BluetoothDevice::new(address);
        update.supports_ble = true;
        update.rssi = Some(-42);
        let merged = store.merge_devices(vec![update]).unwrap();

        let row = &merged[0];
        assert_eq!(row.name.as_deref(), Some("Sensor1"));
        assert!(row.supports_ble && row.supports_legacy);
        assert_eq!(row.rssi, Some(-42));
        // reachable follows the newer observation, even when unset
        assert_eq!(row.reachable, None);
        assert_eq!(store.get_device(&address).unwrap().as_ref(), Some(row));
        assert_eq!(store.device_count().unwrap(), 1);
    }

    #[test]
    fn test_children_survive_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let address = addr("00:11:22:33:44:55");
        let mut device = BluetoothDevice::new(address);
        device.add_child(ChildEntity::Service(BluetoothService::legacy(
            address,
            Protocol::Rfcomm,
            Some(3),
            Some(bluehub_types::uuids::SERIAL_PORT),
        )));
        device.updated_at = Some(OffsetDateTime::now_utc());
        store.merge_devices(vec![device.clone()]).unwrap();

        let stored = store.get_device(&address).unwrap().unwrap();
        assert_eq!(stored.children, device.children);
        assert!(stored.find_service(Some(3), None).is_some());
    }

    #[test]
    fn test_find_by_name_or_address() {
        let store = Store::open_in_memory().unwrap();
        store
            .merge_devices(vec![
                BluetoothDevice::new(addr("AA:BB:CC:DD:EE:01")).with_name("Sensor1"),
                BluetoothDevice::new(addr("AA:BB:CC:DD:EE:02")).with_name("Sensor2"),
            ])
            .unwrap();

        let found = store.find_device("Sensor2").unwrap().unwrap();
        assert_eq!(found.address, addr("AA:BB:CC:DD:EE:02"));
        let found = store.find_device("aa:bb:cc:dd:ee:01").unwrap().unwrap();
        assert_eq!(found.name.as_deref(), Some("Sensor1"));
        assert!(store.find_device("Sensor3").unwrap().is_none());
    }

    #[test]
    fn test_list_and_remove() {
        let store = Store::open_in_memory().unwrap();
        store
            .merge_devices(vec![
                BluetoothDevice::new(addr("AA:BB:CC:DD:EE:02")),
                BluetoothDevice::new(addr("AA:BB:CC:DD:EE:01")),
            ])
            .unwrap();

        let listed: Vec<Address> = store
            .list_devices()
            .unwrap()
            .into_iter()
            .map(|d| d.address)
            .collect();
        assert_eq!(listed, vec![addr("AA:BB:CC:DD:EE:01"), addr("AA:BB:CC:DD:EE:02")]);

        assert!(store.remove_device(&addr("AA:BB:CC:DD:EE:01")).unwrap());
        assert!(!store.remove_device(&addr("AA:BB:CC:DD:EE:01")).unwrap());
        assert_eq!(store.device_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_entity_store_trait() {
        let store = Store::open_in_memory().unwrap();
        let address = addr("AA:BB:CC:DD:EE:FF");
        let dyn_store: &dyn EntityStore = &store;

        dyn_store
            .merge(vec![BluetoothDevice::new(address).with_name("Sensor1")])
            .await
            .unwrap();
        assert!(dyn_store.get(&address).await.unwrap().is_some());
        assert!(dyn_store.find("Sensor1").await.unwrap().is_some());
        assert_eq!(dyn_store.all().await.unwrap().len(), 1);
    }
}
