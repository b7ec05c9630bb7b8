//! Seam between the BLE manager and the platform BLE stack.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluehub_types::{Address, BluetoothDevice, BluetoothService, ChildEntity};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::bluez;
use crate::error::Result;
use crate::util::to_hex;

/// One advertisement (or property update) seen during a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub address: Address,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub tx_power: Option<i16>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
    pub services: Vec<Uuid>,
    pub connected: Option<bool>,
}

impl Advertisement {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Candidate device record for the event handler.
    ///
    /// Manufacturer and service data end up hex-encoded under
    /// `data.manufacturer_data` / `data.service_data`; advertised services
    /// become BLE service children.
    pub fn into_device(self) -> BluetoothDevice {
        let mut device = BluetoothDevice::new(self.address);
        device.name = self.name;
        device.rssi = self.rssi;
        device.tx_power = self.tx_power;
        device.connected = self.connected;
        device.supports_ble = true;
        device.reachable = Some(true);

        if !self.manufacturer_data.is_empty() {
            let entries: Map<String, Value> = self
                .manufacturer_data
                .iter()
                .map(|(id, bytes)| (id.to_string(), Value::from(to_hex(bytes))))
                .collect();
            device
                .data
                .insert("manufacturer_data".into(), Value::Object(entries));
        }
        if !self.service_data.is_empty() {
            let entries: Map<String, Value> = self
                .service_data
                .iter()
                .map(|(uuid, bytes)| (uuid.to_string(), Value::from(to_hex(bytes))))
                .collect();
            device
                .data
                .insert("service_data".into(), Value::Object(entries));
        }
        for uuid in self.services {
            device.add_child(ChildEntity::Service(BluetoothService::ble(self.address, uuid)));
        }
        device
    }
}

/// An open GATT session.
///
/// Sessions are opened and closed on the same task by the BLE manager.
#[async_trait]
pub trait GattSession: Send + Sync {
    fn address(&self) -> Address;

    async fn is_connected(&self) -> bool;

    /// UUIDs of the primary services discovered on connect.
    async fn services(&self) -> Result<Vec<Uuid>>;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>>;

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

/// Platform BLE stack.
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Scan for `duration`, calling `on_advertisement` for every packet.
    /// A non-empty `service_uuids` restricts results to devices
    /// advertising one of them.
    async fn scan(
        &self,
        duration: Duration,
        service_uuids: &[Uuid],
        on_advertisement: &(dyn Fn(Advertisement) + Send + Sync),
    ) -> Result<()>;

    /// Open a GATT session, discovering services.
    async fn connect(&self, address: Address, timeout: Duration) -> Result<Arc<dyn GattSession>>;

    /// Drop a link this process holds no session for.
    async fn force_disconnect(&self, address: Address, interface: Option<&str>) -> Result<()> {
        bluez::disconnect_device(address, interface).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluehub_types::uuids;

    #[test]
    fn test_advertisement_into_device() {
        let address: Address = "AA:BB:CC:DD:EE:FF".parse().unwrap();
        let mut adv = Advertisement::new(address);
        adv.name = Some("Bot".into());
        adv.rssi = Some(-61);
        adv.manufacturer_data.insert(0x0969, vec![0xC1, 0x22]);
        adv.services.push(uuids::SWITCHBOT_SERVICE);

        let device = adv.into_device();
        assert!(device.supports_ble);
        assert_eq!(device.reachable, Some(true));
        assert_eq!(device.connected, None);
        assert_eq!(device.data["manufacturer_data"]["2409"], "c122");
        assert!(device.has_service(&uuids::SWITCHBOT_SERVICE));
        assert!(device.data.get("service_data").is_none());
    }
}
