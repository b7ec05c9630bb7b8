//! Merge-on-insert cache of known devices.
//!
//! The cache keeps at most one record per address. Each record lives in its
//! own slot with its own lock, so observations of different devices merge in
//! parallel while two observations of the same device are serialized. The
//! outer maps are only locked long enough to find or create a slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bluehub_types::{Address, BluetoothDevice};

/// Shared storage cell for one device. Empty only while its first insert
/// is in flight.
pub type DeviceSlot = Arc<Mutex<Option<BluetoothDevice>>>;

#[derive(Debug, Default)]
pub struct EntityCache {
    slots: RwLock<HashMap<Address, DeviceSlot>>,
    names: RwLock<HashMap<String, Address>>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a device up by address, then by name.
    pub fn get(&self, key: &str) -> Option<BluetoothDevice> {
        let slot = self.entry(key)?;
        let device = lock(&slot).clone();
        device
    }

    pub fn get_by_address(&self, address: &Address) -> Option<BluetoothDevice> {
        let slot = read(&self.slots).get(address).cloned()?;
        let device = lock(&slot).clone();
        device
    }

    /// The shared slot for a device, by address then by name.
    ///
    /// Two keys naming the same device return the same `Arc`.
    pub fn entry(&self, key: &str) -> Option<DeviceSlot> {
        if let Some(address) = Address::try_parse(key)
            && let Some(slot) = read(&self.slots).get(&address)
        {
            return Some(slot.clone());
        }
        let address = read(&self.names).get(key).copied()?;
        read(&self.slots).get(&address).cloned()
    }

    /// Merge `device` into the cache and return the resulting record.
    pub fn add(&self, device: BluetoothDevice) -> BluetoothDevice {
        self.upsert_with(device, |_, _| ()).0
    }

    /// Merge `device` into the cache, first running `inspect` on the prior
    /// record (if any) and the incoming one.
    ///
    /// `inspect` runs under the device's slot lock, so no other insert for
    /// the same address can slip between it and the merge.
    pub fn upsert_with<R>(
        &self,
        device: BluetoothDevice,
        inspect: impl FnOnce(Option<&BluetoothDevice>, &BluetoothDevice) -> R,
    ) -> (BluetoothDevice, R) {
        self.upsert_and_publish(device, inspect, |_, _| {})
    }

    /// [`upsert_with`](Self::upsert_with), then `publish` the merged record
    /// and the outcome before the slot lock is released.
    ///
    /// Publications for one address therefore happen in merge order.
    /// `publish` must not touch the cache.
    pub fn upsert_and_publish<R>(
        &self,
        device: BluetoothDevice,
        inspect: impl FnOnce(Option<&BluetoothDevice>, &BluetoothDevice) -> R,
        publish: impl FnOnce(&BluetoothDevice, &R),
    ) -> (BluetoothDevice, R) {
        let address = device.address;
        let slot = self.slot(address);

        let mut guard = lock(&slot);
        let outcome = inspect(guard.as_ref(), &device);
        let (merged, old_name) = match guard.take() {
            Some(mut existing) => {
                let old_name = existing.name.clone();
                existing.merge(device);
                (existing, old_name)
            }
            None => (device, None),
        };

        // Slot lock before the name index, never the other way round.
        if merged.name != old_name {
            let mut names = write(&self.names);
            if let Some(old) = old_name
                && names.get(&old) == Some(&address)
            {
                names.remove(&old);
            }
            if let Some(name) = &merged.name {
                names.insert(name.clone(), address);
            }
        }

        publish(&merged, &outcome);
        *guard = Some(merged.clone());
        drop(guard);
        (merged, outcome)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> Vec<Address> {
        read(&self.slots).keys().copied().collect()
    }

    pub fn values(&self) -> Vec<BluetoothDevice> {
        self.items().into_iter().map(|(_, d)| d).collect()
    }

    pub fn items(&self) -> Vec<(Address, BluetoothDevice)> {
        let slots: Vec<(Address, DeviceSlot)> = read(&self.slots)
            .iter()
            .map(|(a, s)| (*a, s.clone()))
            .collect();
        slots
            .into_iter()
            .filter_map(|(a, slot)| lock(&slot).clone().map(|d| (a, d)))
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, address: Address) -> DeviceSlot {
        if let Some(slot) = read(&self.slots).get(&address) {
            return slot.clone();
        }
        write(&self.slots).entry(address).or_default().clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluehub_types::{BluetoothService, ChildEntity, Protocol};
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::thread;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    fn device() -> BluetoothDevice {
        BluetoothDevice::new(ADDR.parse().unwrap())
    }

    #[test]
    fn test_add_then_get_by_address_and_name() {
        let cache = EntityCache::new();
        cache.add(device().with_name("Sensor1"));

        let by_addr = cache.get("aa:bb:cc:dd:ee:ff").unwrap();
        let by_name = cache.get("Sensor1").unwrap();
        assert_eq!(by_addr, by_name);
        assert!(Arc::ptr_eq(
            &cache.entry("Sensor1").unwrap(),
            &cache.entry(ADDR).unwrap()
        ));
        assert!(cache.contains("Sensor1"));
        assert!(!cache.contains("Sensor2"));
    }

    #[test]
    fn test_add_merges_into_single_record() {
        let cache = EntityCache::new();
        let mut first = device().with_name("Sensor1");
        first.connected = Some(true);
        first.add_child(ChildEntity::Service(
            BluetoothService::legacy(first.address, Protocol::Rfcomm, Some(1), None)
                .with_name("first"),
        ));
        cache.add(first);

        let mut second = device();
        second.rssi = Some(-40);
        second.add_child(ChildEntity::Service(
            BluetoothService::legacy(second.address, Protocol::Rfcomm, Some(1), None)
                .with_name("second"),
        ));
        let merged = cache.add(second);

        assert_eq!(cache.len(), 1);
        assert_eq!(merged.name.as_deref(), Some("Sensor1"));
        assert_eq!(merged.connected, Some(true));
        assert_eq!(merged.rssi, Some(-40));
        assert_eq!(merged.children.len(), 1);
        assert_eq!(
            merged.find_service(Some(1), None).unwrap().name.as_deref(),
            Some("second")
        );
    }

    #[test]
    fn test_rename_moves_name_index() {
        let cache = EntityCache::new();
        cache.add(device().with_name("Old"));
        cache.add(device().with_name("New"));
        assert!(cache.get("Old").is_none());
        assert!(cache.get("New").is_some());
    }

    #[test]
    fn test_upsert_with_sees_prior() {
        let cache = EntityCache::new();
        let (_, had_prior) = cache.upsert_with(device(), |prior, _| prior.is_some());
        assert!(!had_prior);
        let (_, had_prior) = cache.upsert_with(device(), |prior, _| prior.is_some());
        assert!(had_prior);
    }

    #[test]
    fn test_concurrent_renames_leave_one_name() {
        let cache = Arc::new(EntityCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        cache.add(device().with_name(format!("n{i}-{j}")));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let name = cache.get(ADDR).unwrap().name.unwrap();
        let indexed: Vec<String> = (0..8)
            .flat_map(|i| (0..50).map(move |j| format!("n{i}-{j}")))
            .filter(|n| cache.contains(n))
            .collect();
        assert_eq!(indexed, vec![name]);
    }

    #[test]
    fn test_publish_sees_merged_record_in_order() {
        let cache = EntityCache::new();
        let published = Mutex::new(Vec::new());
        for rssi in [-70, -60, -50] {
            let mut d = device();
            d.rssi = Some(rssi);
            cache.upsert_and_publish(d, |prior, _| prior.is_some(), |merged, had_prior| {
                published.lock().unwrap().push((merged.rssi, *had_prior));
            });
        }
        assert_eq!(
            published.into_inner().unwrap(),
            vec![(Some(-70), false), (Some(-60), true), (Some(-50), true)]
        );
    }

    #[test]
    fn test_snapshots() {
        let cache = EntityCache::new();
        cache.add(device());
        cache.add(BluetoothDevice::new("11:22:33:44:55:66".parse().unwrap()));
        assert_eq!(cache.keys().len(), 2);
        assert_eq!(cache.values().len(), 2);
        assert_eq!(cache.items().len(), 2);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_concurrent_adds_keep_one_record_per_address() {
        let cache = Arc::new(EntityCache::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for j in 0..50 {
                        let mut d = device();
                        d.minor_device_classes.insert(format!("c{i}-{j}"));
                        cache.add(d);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(ADDR).unwrap().minor_device_classes.len(), 400);
    }

    fn classes() -> impl Strategy<Value = BTreeSet<String>> {
        proptest::collection::btree_set("[a-f]{1,2}", 0..5)
    }

    proptest! {
        #[test]
        fn two_adds_produce_union_and_latest_connected(
            minor1 in classes(),
            minor2 in classes(),
            conn1 in proptest::option::of(any::<bool>()),
            conn2 in proptest::option::of(any::<bool>()),
            port1 in 1u16..4,
            port2 in 1u16..4,
        ) {
            let cache = EntityCache::new();
            let mut e1 = device();
            e1.minor_device_classes = minor1.clone();
            e1.connected = conn1;
            e1.add_child(ChildEntity::Service(
                BluetoothService::legacy(e1.address, Protocol::Rfcomm, Some(port1), None)
                    .with_name("e1"),
            ));
            let mut e2 = device();
            e2.minor_device_classes = minor2.clone();
            e2.connected = conn2;
            e2.add_child(ChildEntity::Service(
                BluetoothService::legacy(e2.address, Protocol::Rfcomm, Some(port2), None)
                    .with_name("e2"),
            ));

            cache.add(e1);
            cache.add(e2);

            prop_assert_eq!(cache.len(), 1);
            let stored = cache.get(ADDR).unwrap();
            let union: BTreeSet<String> = minor1.union(&minor2).cloned().collect();
            prop_assert_eq!(&stored.minor_device_classes, &union);
            prop_assert_eq!(stored.connected, conn2.or(conn1));
            let expected_children = if port1 == port2 { 1 } else { 2 };
            prop_assert_eq!(stored.children.len(), expected_children);
            let svc = stored.find_service(Some(port2), None).unwrap();
            prop_assert_eq!(svc.name.as_deref(), Some("e2"));
        }
    }
}
