//! [`BleBackend`] on top of btleplug.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bluehub_types::Address;

use super::backend::{Advertisement, BleBackend, GattSession};
use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};

/// Default timeout for characteristic reads and writes.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

fn to_address(addr: BDAddr) -> Address {
    Address::new(addr.into_inner())
}

/// A powered off adapter becomes a fatal connection failure; anything else
/// stays a plain stack error.
fn adapter_error(err: btleplug::Error) -> Error {
    match ConnectionFailureReason::from_btleplug(&err) {
        ConnectionFailureReason::AdapterUnavailable => {
            Error::connection_failed("adapter", ConnectionFailureReason::AdapterUnavailable)
        }
        _ => Error::Bluetooth(err),
    }
}

/// btleplug-backed BLE stack. The adapter is looked up on first use.
pub struct BtleplugBackend {
    interface: Option<String>,
    adapter: OnceCell<Adapter>,
}

impl BtleplugBackend {
    /// Use the adapter whose info starts with `interface` (e.g. `hci0`), or
    /// the first adapter when `None`.
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            adapter: OnceCell::new(),
        }
    }

    async fn adapter(&self) -> Result<&Adapter> {
        self.adapter
            .get_or_try_init(|| open_adapter(self.interface.as_deref()))
            .await
    }

    async fn find_peripheral(&self, address: Address) -> Result<Option<Peripheral>> {
        let adapter = self.adapter().await?;
        for peripheral in adapter.peripherals().await? {
            if to_address(peripheral.address()) == address {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

async fn open_adapter(interface: Option<&str>) -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    let Some(wanted) = interface else {
        return adapters
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter));
    };
    for adapter in adapters {
        let info = adapter.adapter_info().await.unwrap_or_default();
        if info.starts_with(wanted) {
            info!(adapter = %info, "Using Bluetooth adapter");
            return Ok(adapter);
        }
    }
    Err(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))
}

async fn advertisement_of(peripheral: &Peripheral) -> Option<Advertisement> {
    let props = peripheral.properties().await.ok()??;
    let address = to_address(props.address);
    if address.is_zero() {
        return None;
    }
    Some(Advertisement {
        address,
        name: props.local_name,
        rssi: props.rssi,
        tx_power: props.tx_power_level,
        manufacturer_data: props.manufacturer_data,
        service_data: props.service_data,
        services: props.services,
        connected: peripheral.is_connected().await.ok(),
    })
}

#[async_trait]
impl BleBackend for BtleplugBackend {
    async fn scan(
        &self,
        duration: Duration,
        service_uuids: &[Uuid],
        on_advertisement: &(dyn Fn(Advertisement) + Send + Sync),
    ) -> Result<()> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;
        adapter
            .start_scan(ScanFilter {
                services: service_uuids.to_vec(),
            })
            .await
            .map_err(adapter_error)?;
        debug!(duration_secs = duration.as_secs(), "BLE scan started");

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        loop {
            let event = tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => event,
            };
            let id = match event {
                Some(CentralEvent::DeviceDiscovered(id))
                | Some(CentralEvent::DeviceUpdated(id))
                | Some(CentralEvent::ManufacturerDataAdvertisement { id, .. })
                | Some(CentralEvent::ServiceDataAdvertisement { id, .. })
                | Some(CentralEvent::ServicesAdvertisement { id, .. }) => id,
                Some(_) => continue,
                None => break,
            };
            let Ok(peripheral) = adapter.peripheral(&id).await else {
                continue;
            };
            if let Some(adv) = advertisement_of(&peripheral).await {
                on_advertisement(adv);
            }
        }

        if let Err(e) = adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {e}");
        }
        Ok(())
    }

    async fn connect(&self, address: Address, connect_timeout: Duration) -> Result<Arc<dyn GattSession>> {
        let peripheral = self
            .find_peripheral(address)
            .await?
            .ok_or_else(|| Error::device_not_found(address.to_string()))?;

        if !peripheral.is_connected().await? {
            timeout(connect_timeout, peripheral.connect())
                .await
                .map_err(|_| Error::timeout("connect", connect_timeout))?
                .map_err(|e| {
                    Error::connection_failed(
                        address.to_string(),
                        ConnectionFailureReason::from_btleplug(&e),
                    )
                })?;
        }
        timeout(connect_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover_services", connect_timeout))??;
        debug!(%address, services = peripheral.services().len(), "GATT session open");

        Ok(Arc::new(BtleplugSession {
            address,
            peripheral,
        }))
    }
}

struct BtleplugSession {
    address: Address,
    peripheral: Peripheral,
}

impl BtleplugSession {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| Error::service_not_found(self.address.to_string(), None, Some(uuid)))
    }
}

#[async_trait]
impl GattSession for BtleplugSession {
    fn address(&self) -> Address {
        self.address
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        Ok(self.peripheral.services().iter().map(|s| s.uuid).collect())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let c = self.characteristic(characteristic)?;
        timeout(IO_TIMEOUT, self.peripheral.read(&c))
            .await
            .map_err(|_| Error::timeout("read", IO_TIMEOUT))?
            .map_err(Error::from)
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let c = self.characteristic(characteristic)?;
        let write_type = if c.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        timeout(IO_TIMEOUT, self.peripheral.write(&c, data, write_type))
            .await
            .map_err(|_| Error::timeout("write", IO_TIMEOUT))?
            .map_err(Error::from)
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bdaddr_conversion() {
        let addr = BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(to_address(addr).to_string(), "AA:BB:CC:DD:EE:FF");
    }

    #[tokio::test]
    #[ignore = "requires BLE hardware"]
    async fn test_hardware_scan() {
        let backend = BtleplugBackend::new(None);
        let seen = std::sync::Mutex::new(Vec::new());
        backend
            .scan(Duration::from_secs(5), &[], &|adv| seen.lock().unwrap().push(adv.address))
            .await
            .unwrap();
        println!("saw {} advertisements", seen.lock().unwrap().len());
    }
}
