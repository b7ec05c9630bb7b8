//! Device and service entities.

use core::fmt;
use core::str::FromStr;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::address::Address;
use crate::class::{DeviceClass, MajorDeviceClass, MajorServiceClass};
use crate::error::ParseError;

/// Transport protocol of a classic Bluetooth service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Rfcomm,
    L2cap,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rfcomm => f.write_str("RFCOMM"),
            Self::L2cap => f.write_str("L2CAP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RFCOMM" => Ok(Self::Rfcomm),
            "L2CAP" => Ok(Self::L2cap),
            _ => Err(ParseError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A service offered by a device: a GATT service for BLE, an SDP record
/// (protocol + port) for classic Bluetooth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BluetoothService {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub service_class: String,
    pub is_ble: bool,
    #[serde(default)]
    pub connected: bool,
}

impl BluetoothService {
    /// A GATT service advertised or discovered over BLE.
    #[must_use]
    pub fn ble(address: Address, uuid: Uuid) -> Self {
        Self {
            address,
            port: None,
            uuid: Some(uuid),
            protocol: None,
            name: None,
            service_class: crate::uuid::service_class_name(&uuid).to_string(),
            is_ble: true,
            connected: false,
        }
    }

    /// A classic service found through SDP.
    #[must_use]
    pub fn legacy(
        address: Address,
        protocol: Protocol,
        port: Option<u16>,
        uuid: Option<Uuid>,
    ) -> Self {
        let service_class = uuid
            .as_ref()
            .map_or("Unknown", crate::uuid::service_class_name)
            .to_string();
        Self {
            address,
            port,
            uuid,
            protocol: Some(protocol),
            name: None,
            service_class,
            is_ble: false,
            connected: false,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Secondary id under which the service is stored on its device.
    #[must_use]
    pub fn id(&self) -> String {
        match (self.is_ble, self.protocol, self.port, self.uuid) {
            (false, Some(protocol), Some(port), _) => {
                format!("{}:{}:{}", self.address, protocol, port)
            }
            (_, _, _, Some(uuid)) => format!("{}:{}", self.address, uuid),
            (_, _, Some(port), None) => format!("{}:{}", self.address, port),
            _ => format!("{}:service", self.address),
        }
    }

    /// Does this service answer to the given port and/or UUID?
    ///
    /// Both criteria must match when both are given.
    #[must_use]
    pub fn matches(&self, port: Option<u16>, uuid: Option<&Uuid>) -> bool {
        if port.is_none() && uuid.is_none() {
            return false;
        }
        port.is_none_or(|p| self.port == Some(p)) && uuid.is_none_or(|u| self.uuid.as_ref() == Some(u))
    }
}

/// A controllable on/off entity derived from a device by a capability plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchEntity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    /// Name of the capability plugin that owns this entity.
    pub plugin: String,
}

/// Entities nested under a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildEntity {
    Service(BluetoothService),
    Switch(SwitchEntity),
}

impl ChildEntity {
    #[must_use]
    pub fn id(&self) -> String {
        match self {
            Self::Service(s) => s.id(),
            Self::Switch(s) => s.id.clone(),
        }
    }

    #[must_use]
    pub fn as_service(&self) -> Option<&BluetoothService> {
        match self {
            Self::Service(s) => Some(s),
            Self::Switch(_) => None,
        }
    }
}

/// Everything known about one Bluetooth peripheral.
///
/// A device may be observed through BLE advertisements, classic inquiry, or
/// both; partial observations are combined with [`BluetoothDevice::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BluetoothDevice {
    pub address: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major_device_class: Option<MajorDeviceClass>,
    #[serde(default)]
    pub minor_device_classes: BTreeSet<String>,
    #[serde(default)]
    pub major_service_classes: BTreeSet<MajorServiceClass>,
    #[serde(default)]
    pub supports_ble: bool,
    #[serde(default)]
    pub supports_legacy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reachable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power: Option<i16>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub children: BTreeMap<String, ChildEntity>,
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<OffsetDateTime>,
}

impl BluetoothDevice {
    /// An empty record for `address`; every other field is unknown.
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            manufacturer: None,
            major_device_class: None,
            minor_device_classes: BTreeSet::new(),
            major_service_classes: BTreeSet::new(),
            supports_ble: false,
            supports_legacy: false,
            connected: None,
            reachable: None,
            rssi: None,
            tx_power: None,
            data: Map::new(),
            meta: Map::new(),
            children: BTreeMap::new(),
            updated_at: None,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Apply a decoded Class of Device.
    pub fn set_class(&mut self, class: DeviceClass) {
        self.major_device_class = class.major;
        self.minor_device_classes = class.minor;
        self.major_service_classes = class.services;
    }

    /// Insert or replace a child entity under its id.
    pub fn add_child(&mut self, child: ChildEntity) {
        self.children.insert(child.id(), child);
    }

    /// All services nested under this device.
    pub fn services(&self) -> impl Iterator<Item = &BluetoothService> {
        self.children.values().filter_map(ChildEntity::as_service)
    }

    /// The first service matching `port` and/or `uuid`.
    #[must_use]
    pub fn find_service(&self, port: Option<u16>, uuid: Option<&Uuid>) -> Option<&BluetoothService> {
        self.services().find(|s| s.matches(port, uuid))
    }

    /// Whether the device offers a service with this UUID.
    #[must_use]
    pub fn has_service(&self, uuid: &Uuid) -> bool {
        self.services().any(|s| s.uuid.as_ref() == Some(uuid))
    }

    /// Does `key` identify this device, by address or by exact name?
    #[must_use]
    pub fn is_identified_by(&self, key: &str) -> bool {
        Address::try_parse(key).is_some_and(|a| a == self.address)
            || self.name.as_deref() == Some(key)
    }

    /// Fold a newer observation of the same device into this one.
    ///
    /// - class sets are unioned;
    /// - `name`, `manufacturer`, `major_device_class`, `connected`, `rssi`
    ///   and `tx_power` take the newer value only when it is set;
    /// - `supports_ble` / `supports_legacy` are OR-ed and never downgraded;
    /// - `reachable` is always taken from `newer`, even when unset, since
    ///   lost-device detection relies on it being cleared;
    /// - `data` / `meta` are shallow-merged, newer keys winning;
    /// - `children` are unioned by id, newer winning.
    pub fn merge(&mut self, newer: BluetoothDevice) {
        debug_assert_eq!(self.address, newer.address);

        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.name, newer.name);
        take(&mut self.manufacturer, newer.manufacturer);
        take(&mut self.major_device_class, newer.major_device_class);
        take(&mut self.connected, newer.connected);
        take(&mut self.rssi, newer.rssi);
        take(&mut self.tx_power, newer.tx_power);
        self.reachable = newer.reachable;

        self.minor_device_classes.extend(newer.minor_device_classes);
        self.major_service_classes.extend(newer.major_service_classes);
        self.supports_ble |= newer.supports_ble;
        self.supports_legacy |= newer.supports_legacy;

        self.data.extend(newer.data);
        self.meta.extend(newer.meta);
        self.children.extend(newer.children);

        self.updated_at = match (self.updated_at, newer.updated_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => Some(b.or(a).unwrap_or_else(OffsetDateTime::now_utc)),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid as uuids;
    use proptest::prelude::*;

    fn addr() -> Address {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_service_ids() {
        let rfcomm = BluetoothService::legacy(addr(), Protocol::Rfcomm, Some(3), None);
        assert_eq!(rfcomm.id(), "AA:BB:CC:DD:EE:FF:RFCOMM:3");
        let gatt = BluetoothService::ble(addr(), uuids::BATTERY_SERVICE);
        assert_eq!(
            gatt.id(),
            "AA:BB:CC:DD:EE:FF:0000180f-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(gatt.service_class, "Battery");
    }

    #[test]
    fn test_service_matching() {
        let svc = BluetoothService::legacy(
            addr(),
            Protocol::Rfcomm,
            Some(5),
            Some(uuids::SERIAL_PORT),
        );
        assert!(svc.matches(Some(5), None));
        assert!(svc.matches(None, Some(&uuids::SERIAL_PORT)));
        assert!(svc.matches(Some(5), Some(&uuids::SERIAL_PORT)));
        assert!(!svc.matches(Some(6), Some(&uuids::SERIAL_PORT)));
        assert!(!svc.matches(None, None));
    }

    #[test]
    fn test_merge_scalars_keep_known_values() {
        let mut old = BluetoothDevice::new(addr()).with_name("Sensor1");
        old.rssi = Some(-60);
        old.connected = Some(true);
        old.manufacturer = Some("Acme".into());

        let mut newer = BluetoothDevice::new(addr());
        newer.tx_power = Some(4);
        old.merge(newer);

        assert_eq!(old.name.as_deref(), Some("Sensor1"));
        assert_eq!(old.rssi, Some(-60));
        assert_eq!(old.tx_power, Some(4));
        assert_eq!(old.connected, Some(true));
        assert_eq!(old.manufacturer.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_merge_overwrites_reachable_unconditionally() {
        let mut old = BluetoothDevice::new(addr());
        old.reachable = Some(true);
        old.merge(BluetoothDevice::new(addr()));
        assert_eq!(old.reachable, None);

        let mut lost = BluetoothDevice::new(addr());
        lost.reachable = Some(false);
        old.merge(lost);
        assert_eq!(old.reachable, Some(false));
    }

    #[test]
    fn test_merge_support_flags_never_downgrade() {
        let mut old = BluetoothDevice::new(addr());
        old.supports_ble = true;
        let mut newer = BluetoothDevice::new(addr());
        newer.supports_legacy = true;
        old.merge(newer);
        assert!(old.supports_ble);
        assert!(old.supports_legacy);
    }

    #[test]
    fn test_merge_maps_and_children() {
        let mut old = BluetoothDevice::new(addr());
        old.data.insert("a".into(), Value::from(1));
        old.data.insert("b".into(), Value::from(1));
        old.add_child(ChildEntity::Service(
            BluetoothService::legacy(addr(), Protocol::Rfcomm, Some(1), None).with_name("old"),
        ));
        old.add_child(ChildEntity::Service(BluetoothService::legacy(
            addr(),
            Protocol::Rfcomm,
            Some(2),
            None,
        )));

        let mut newer = BluetoothDevice::new(addr());
        newer.data.insert("b".into(), Value::from(2));
        newer.meta.insert("icon".into(), Value::from("bt"));
        newer.add_child(ChildEntity::Service(
            BluetoothService::legacy(addr(), Protocol::Rfcomm, Some(1), None).with_name("new"),
        ));
        old.merge(newer);

        assert_eq!(old.data["a"], Value::from(1));
        assert_eq!(old.data["b"], Value::from(2));
        assert_eq!(old.meta["icon"], Value::from("bt"));
        assert_eq!(old.children.len(), 2);
        let first = old.find_service(Some(1), None).unwrap();
        assert_eq!(first.name.as_deref(), Some("new"));
    }

    #[test]
    fn test_merge_bumps_updated_at() {
        let mut old = BluetoothDevice::new(addr());
        assert!(old.updated_at.is_none());
        old.merge(BluetoothDevice::new(addr()));
        assert!(old.updated_at.is_some());

        let early = OffsetDateTime::UNIX_EPOCH;
        let late = early + time::Duration::seconds(60);
        old.updated_at = Some(late);
        let mut stale = BluetoothDevice::new(addr());
        stale.updated_at = Some(early);
        old.merge(stale);
        assert_eq!(old.updated_at, Some(late));
    }

    #[test]
    fn test_is_identified_by() {
        let dev = BluetoothDevice::new(addr()).with_name("Sensor1");
        assert!(dev.is_identified_by("aa:bb:cc:dd:ee:ff"));
        assert!(dev.is_identified_by("Sensor1"));
        assert!(!dev.is_identified_by("sensor1"));
        assert!(!dev.is_identified_by("11:22:33:44:55:66"));
    }

    #[test]
    fn test_serde_shape() {
        let mut dev = BluetoothDevice::new(addr()).with_name("Sensor1");
        dev.supports_legacy = true;
        dev.add_child(ChildEntity::Service(BluetoothService::legacy(
            addr(),
            Protocol::Rfcomm,
            Some(5),
            None,
        )));
        let json = serde_json::to_value(&dev).unwrap();
        assert_eq!(json["address"], "AA:BB:CC:DD:EE:FF");
        assert!(json.get("rssi").is_none());
        let child = &json["children"]["AA:BB:CC:DD:EE:FF:RFCOMM:5"];
        assert_eq!(child["type"], "service");
        assert_eq!(child["protocol"], "RFCOMM");

        let back: BluetoothDevice = serde_json::from_value(json).unwrap();
        assert_eq!(back, dev);
    }

    fn class_set() -> impl Strategy<Value = BTreeSet<String>> {
        proptest::collection::btree_set("[a-e]", 0..4)
    }

    proptest! {
        #[test]
        fn merge_unions_classes_and_prefers_new_connected(
            a_minor in class_set(),
            b_minor in class_set(),
            a_conn in proptest::option::of(any::<bool>()),
            b_conn in proptest::option::of(any::<bool>()),
        ) {
            let mut a = BluetoothDevice::new(addr());
            a.minor_device_classes = a_minor.clone();
            a.connected = a_conn;
            let mut b = BluetoothDevice::new(addr());
            b.minor_device_classes = b_minor.clone();
            b.connected = b_conn;

            a.merge(b);
            let union: BTreeSet<String> = a_minor.union(&b_minor).cloned().collect();
            prop_assert_eq!(a.minor_device_classes, union);
            prop_assert_eq!(a.connected, b_conn.or(a_conn));
        }
    }
}
