//! Mock Bluetooth stacks for testing.
//!
//! [`MockBleBackend`] and [`MockLegacyBackend`] stand in for the platform
//! stacks so the managers and the façade can be exercised without
//! hardware. Both are scripted up front (which devices are in range, what
//! services they expose) and record what the managers asked of them.
//!
//! # Features
//!
//! - **Failure injection**: failing service lookups and stream opens
//! - **Latency simulation**: connect, open and SDP delays (pair with
//!   `#[tokio::test(start_paused = true)]`)
//! - **Peer access**: classic streams are in-memory duplex pipes whose far
//!   end can be taken by the test or handed to a callback

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluehub_types::Address;
use tokio::io::DuplexStream;
use uuid::Uuid;

use crate::ble::{Advertisement, BleBackend, GattSession};
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::legacy::{LegacyBackend, LegacyDiscovery, LegacyStream, ServiceRecord, StreamTarget};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A random, non-zero device address.
pub fn random_address() -> Address {
    loop {
        let address = Address::new(rand::random::<[u8; 6]>());
        if !address.is_zero() {
            return address;
        }
    }
}

/// State shared between the backend and the sessions it hands out.
#[derive(Default)]
struct GattState {
    characteristics: Mutex<HashMap<(Address, Uuid), Vec<u8>>>,
    writes: Mutex<Vec<(Address, Uuid, Vec<u8>)>>,
    open_sessions: AtomicUsize,
}

/// Scripted BLE stack.
///
/// # Example
///
/// ```
/// use bluehub_core::ble::Advertisement;
/// use bluehub_core::mock::MockBleBackend;
///
/// let backend = MockBleBackend::new();
/// let mut adv = Advertisement::new("AA:BB:CC:DD:EE:FF".parse().unwrap());
/// adv.name = Some("Sensor1".into());
/// backend.advertise(adv);
/// assert_eq!(backend.scan_count(), 0);
/// ```
#[derive(Default)]
pub struct MockBleBackend {
    advertisements: Mutex<Vec<Advertisement>>,
    bluez_devices: Mutex<HashSet<Address>>,
    force_disconnects: Mutex<Vec<Address>>,
    connect_delay: Mutex<Duration>,
    powered_off: AtomicBool,
    scan_count: AtomicU32,
    connect_count: AtomicU32,
    gatt: Arc<GattState>,
}

impl std::fmt::Debug for MockBleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBleBackend")
            .field("advertisements", &lock(&self.advertisements).len())
            .field("scan_count", &self.scan_count())
            .field("connect_count", &self.connect_count())
            .finish()
    }
}

impl MockBleBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a device in range, replacing any earlier advertisement from the
    /// same address.
    pub fn advertise(&self, advertisement: Advertisement) {
        let mut advertisements = lock(&self.advertisements);
        advertisements.retain(|a| a.address != advertisement.address);
        advertisements.push(advertisement);
    }

    /// Take every device out of range.
    pub fn clear_advertisements(&self) {
        lock(&self.advertisements).clear();
    }

    /// Make `address` visible on the (simulated) system bus.
    pub fn add_bluez_device(&self, address: Address) {
        lock(&self.bluez_devices).insert(address);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *lock(&self.connect_delay) = delay;
    }

    /// Make every later scan fail as if the adapter were switched off.
    pub fn power_off(&self) {
        self.powered_off.store(true, Ordering::SeqCst);
    }

    pub fn set_characteristic(&self, address: Address, characteristic: Uuid, value: Vec<u8>) {
        lock(&self.gatt.characteristics).insert((address, characteristic), value);
    }

    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Sessions opened and not yet disconnected.
    pub fn open_sessions(&self) -> usize {
        self.gatt.open_sessions.load(Ordering::SeqCst)
    }

    /// Every force-disconnect request, in order.
    pub fn force_disconnects(&self) -> Vec<Address> {
        lock(&self.force_disconnects).clone()
    }

    /// Every characteristic write, in order.
    pub fn writes(&self) -> Vec<(Address, Uuid, Vec<u8>)> {
        lock(&self.gatt.writes).clone()
    }
}

#[async_trait]
impl BleBackend for MockBleBackend {
    async fn scan(
        &self,
        _duration: Duration,
        service_uuids: &[Uuid],
        on_advertisement: &(dyn Fn(Advertisement) + Send + Sync),
    ) -> Result<()> {
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        if self.powered_off.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                "hci0",
                ConnectionFailureReason::AdapterUnavailable,
            ));
        }
        let advertisements = lock(&self.advertisements).clone();
        for adv in advertisements {
            if service_uuids.is_empty() || adv.services.iter().any(|s| service_uuids.contains(s)) {
                on_advertisement(adv);
            }
        }
        Ok(())
    }

    async fn connect(&self, address: Address, _timeout: Duration) -> Result<Arc<dyn GattSession>> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !lock(&self.advertisements).iter().any(|a| a.address == address) {
            return Err(Error::device_not_found(address.to_string()));
        }
        self.gatt.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockGattSession {
            address,
            connected: AtomicBool::new(true),
            gatt: Arc::clone(&self.gatt),
        }))
    }

    async fn force_disconnect(&self, address: Address, _interface: Option<&str>) -> Result<()> {
        lock(&self.force_disconnects).push(address);
        if lock(&self.bluez_devices).contains(&address) {
            Ok(())
        } else {
            Err(Error::unsupported(format!("{address} is not a BlueZ device path")))
        }
    }
}

/// Session handed out by [`MockBleBackend`].
pub struct MockGattSession {
    address: Address,
    connected: AtomicBool,
    gatt: Arc<GattState>,
}

#[async_trait]
impl GattSession for MockGattSession {
    fn address(&self) -> Address {
        self.address
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        Ok(lock(&self.gatt.characteristics)
            .keys()
            .filter(|(address, _)| *address == self.address)
            .map(|(_, uuid)| *uuid)
            .collect())
    }

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        lock(&self.gatt.characteristics)
            .get(&(self.address, characteristic))
            .cloned()
            .ok_or_else(|| Error::service_not_found(self.address.to_string(), None, Some(characteristic)))
    }

    async fn write(&self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        lock(&self.gatt.writes).push((self.address, characteristic, data.to_vec()));
        lock(&self.gatt.characteristics).insert((self.address, characteristic), data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.gatt.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

type PeerHandler = Arc<dyn Fn(StreamTarget, DuplexStream) + Send + Sync>;

/// Scripted classic stack.
#[derive(Default)]
pub struct MockLegacyBackend {
    devices: Mutex<Vec<LegacyDiscovery>>,
    services: Mutex<HashMap<Address, Vec<ServiceRecord>>>,
    service_delays: Mutex<HashMap<Address, Duration>>,
    failing_services: Mutex<HashSet<Address>>,
    service_lookups: Mutex<Vec<Address>>,
    open_delay: Mutex<Duration>,
    fail_open: AtomicBool,
    discover_count: AtomicU32,
    open_count: AtomicU32,
    peers: Mutex<VecDeque<(StreamTarget, DuplexStream)>>,
    handler: Mutex<Option<PeerHandler>>,
}

impl MockLegacyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: LegacyDiscovery) {
        let mut devices = lock(&self.devices);
        devices.retain(|d| d.address != device.address);
        devices.push(device);
    }

    pub fn remove_device(&self, address: &Address) {
        lock(&self.devices).retain(|d| d.address != *address);
    }

    pub fn set_services(&self, address: Address, records: Vec<ServiceRecord>) {
        lock(&self.services).insert(address, records);
    }

    /// Delay the SDP lookup of `address`. `Duration::ZERO` removes the delay.
    pub fn set_service_delay(&self, address: Address, delay: Duration) {
        lock(&self.service_delays).insert(address, delay);
    }

    /// Make every SDP lookup of `address` fail.
    pub fn fail_services(&self, address: Address) {
        lock(&self.failing_services).insert(address);
    }

    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.open_delay) = delay;
    }

    /// Make every subsequent stream open fail.
    pub fn fail_open(&self) {
        self.fail_open.store(true, Ordering::SeqCst);
    }

    /// Hand the far end of every subsequently opened stream to `handler`
    /// instead of queueing it for [`take_peer`](Self::take_peer).
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn(StreamTarget, DuplexStream) + Send + Sync + 'static,
    {
        *lock(&self.handler) = Some(Arc::new(handler));
    }

    /// Far end of the oldest opened stream not yet taken.
    pub fn take_peer(&self) -> Option<(StreamTarget, DuplexStream)> {
        lock(&self.peers).pop_front()
    }

    /// Addresses passed to `find_services`, in call order.
    pub fn service_lookups(&self) -> Vec<Address> {
        lock(&self.service_lookups).clone()
    }

    pub fn discover_count(&self) -> u32 {
        self.discover_count.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegacyBackend for MockLegacyBackend {
    async fn discover(&self, _duration: Duration) -> Result<Vec<LegacyDiscovery>> {
        self.discover_count.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.devices).clone())
    }

    async fn find_services(&self, address: Address) -> Result<Vec<ServiceRecord>> {
        lock(&self.service_lookups).push(address);
        let delay = lock(&self.service_delays)
            .get(&address)
            .copied()
            .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing_services).contains(&address) {
            return Err(Error::transport(format!("SDP lookup of {address} failed")));
        }
        Ok(lock(&self.services).get(&address).cloned().unwrap_or_default())
    }

    async fn open(&self, target: &StreamTarget) -> Result<Box<dyn LegacyStream>> {
        self.open_count.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.open_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::transport(format!(
                "connection to {} refused",
                target.address
            )));
        }

        let (local, peer) = tokio::io::duplex(64 * 1024);
        let handler = lock(&self.handler).clone();
        match handler {
            Some(handler) => handler(target.clone(), peer),
            None => lock(&self.peers).push_back((target.clone(), peer)),
        }
        Ok(Box::new(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluehub_types::Protocol;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn test_random_address_is_not_zero() {
        for _ in 0..32 {
            assert!(!random_address().is_zero());
        }
    }

    #[tokio::test]
    async fn test_ble_scan_filters_by_service() {
        let backend = MockBleBackend::new();
        let mut adv = Advertisement::new(random_address());
        adv.services.push(bluehub_types::uuids::BATTERY_SERVICE);
        backend.advertise(adv);
        backend.advertise(Advertisement::new(random_address()));

        let seen = Mutex::new(0);
        backend
            .scan(Duration::ZERO, &[bluehub_types::uuids::BATTERY_SERVICE], &|_| {
                *lock(&seen) += 1
            })
            .await
            .unwrap();
        assert_eq!(*lock(&seen), 1);
        assert_eq!(backend.scan_count(), 1);
    }

    #[tokio::test]
    async fn test_legacy_stream_reaches_peer() {
        let backend = MockLegacyBackend::new();
        let target = StreamTarget {
            address: random_address(),
            protocol: Protocol::Rfcomm,
            port: Some(1),
            uuid: None,
        };
        let mut stream = backend.open(&target).await.unwrap();
        stream.write_all(b"hi").await.unwrap();

        let (seen, mut peer) = backend.take_peer().unwrap();
        assert_eq!(seen, target);
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }
}
