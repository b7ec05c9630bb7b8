//! On-disk behaviour of the SQLite store, alone and behind the façade.

use std::sync::Arc;
use std::time::Duration;

use bluehub_core::ble::Advertisement;
use bluehub_core::mock::{MockBleBackend, MockLegacyBackend};
use bluehub_core::{BluetoothConfig, BluetoothPlugin, ScanRequest};
use bluehub_store::Store;
use bluehub_types::{Address, BluetoothDevice};

fn addr() -> Address {
    "AA:BB:CC:DD:EE:FF".parse().unwrap()
}

#[test]
fn test_reopen_keeps_devices() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("entities.db");

    {
        let store = Store::open(&path).unwrap();
        store
            .merge_devices(vec![BluetoothDevice::new(addr()).with_name("Sensor1")])
            .unwrap();
    }

    let store = Store::open(&path).unwrap();
    let device = store.find_device("Sensor1").unwrap().unwrap();
    assert_eq!(device.address, addr());
}

#[tokio::test]
async fn test_plugin_persists_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("entities.db");
    let store = Arc::new(Store::open(&path).unwrap());

    let ble = Arc::new(MockBleBackend::new());
    let mut adv = Advertisement::new(addr());
    adv.name = Some("Sensor1".into());
    adv.rssi = Some(-61);
    ble.advertise(adv);

    let plugin = BluetoothPlugin::builder(BluetoothConfig::default())
        .ble_backend(ble)
        .legacy_backend(Arc::new(MockLegacyBackend::new()))
        .store(store.clone())
        .build()
        .unwrap();

    plugin
        .scan(ScanRequest::default().duration(Duration::from_millis(20)))
        .await
        .unwrap();
    assert_eq!(plugin.flush().await.unwrap(), 1);

    let row = store.get_device(&addr()).unwrap().unwrap();
    assert_eq!(row.name.as_deref(), Some("Sensor1"));
    assert_eq!(row.rssi, Some(-61));
    assert!(row.supports_ble);

    let status = plugin.status(&["Sensor1".to_string()]).await.unwrap();
    assert_eq!(status.len(), 1);
}
