//! Well-known Bluetooth service UUIDs and the service-class directory.
//!
//! Classic (SDP) and BLE (GATT) services share the Bluetooth base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`, so a single table names both.

use uuid::{Uuid, uuid};

/// The Bluetooth SIG base UUID; 16-bit assigned numbers are placed in
/// bytes 2-3.
pub const BASE_UUID: Uuid = uuid!("00000000-0000-1000-8000-00805f9b34fb");

// --- Classic profiles ---

/// Serial Port Profile.
pub const SERIAL_PORT: Uuid = uuid!("00001101-0000-1000-8000-00805f9b34fb");

/// OBEX Object Push, used by `send_file`.
pub const OBEX_OBJECT_PUSH: Uuid = uuid!("00001105-0000-1000-8000-00805f9b34fb");

/// OBEX File Transfer.
pub const OBEX_FILE_TRANSFER: Uuid = uuid!("00001106-0000-1000-8000-00805f9b34fb");

// --- GATT services ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device Information service.
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

// --- Vendor services ---

/// Switchbot bot/plug primary service.
pub const SWITCHBOT_SERVICE: Uuid = uuid!("cba20d00-224d-11e6-9fb8-0002a5d5c51b");

/// Switchbot command characteristic (write).
pub const SWITCHBOT_COMMAND: Uuid = uuid!("cba20002-224d-11e6-9fb8-0002a5d5c51b");

/// Switchbot notification characteristic.
pub const SWITCHBOT_NOTIFY: Uuid = uuid!("cba20003-224d-11e6-9fb8-0002a5d5c51b");

/// Expand a 16-bit assigned number onto the Bluetooth base UUID.
#[must_use]
pub const fn from_u16(short: u16) -> Uuid {
    let mut bytes = *BASE_UUID.as_bytes();
    let [hi, lo] = short.to_be_bytes();
    bytes[2] = hi;
    bytes[3] = lo;
    Uuid::from_bytes(bytes)
}

/// The 16-bit assigned number of a UUID on the Bluetooth base, if it is one.
#[must_use]
pub fn to_u16(uuid: &Uuid) -> Option<u16> {
    let bytes = uuid.as_bytes();
    let base = BASE_UUID.as_bytes();
    if bytes[0] == 0 && bytes[1] == 0 && bytes[4..] == base[4..] {
        Some(u16::from_be_bytes([bytes[2], bytes[3]]))
    } else {
        None
    }
}

const SERVICE_CLASSES: &[(u16, &str)] = &[
    (0x1000, "Service Discovery Server"),
    (0x1001, "Browse Group Descriptor"),
    (0x1101, "Serial Port"),
    (0x1102, "LAN Access Using PPP"),
    (0x1103, "Dialup Networking"),
    (0x1104, "IrMC Sync"),
    (0x1105, "OBEX Object Push"),
    (0x1106, "OBEX File Transfer"),
    (0x1108, "Headset"),
    (0x110A, "Audio Source"),
    (0x110B, "Audio Sink"),
    (0x110C, "A/V Remote Control Target"),
    (0x110D, "Advanced Audio Distribution"),
    (0x110E, "A/V Remote Control"),
    (0x110F, "A/V Remote Control Controller"),
    (0x1112, "Headset Audio Gateway"),
    (0x1115, "PAN User"),
    (0x1116, "Network Access Point"),
    (0x1117, "Group Network"),
    (0x111E, "Handsfree"),
    (0x111F, "Handsfree Audio Gateway"),
    (0x1124, "Human Interface Device"),
    (0x112D, "SIM Access"),
    (0x112E, "Phonebook Access Client"),
    (0x112F, "Phonebook Access Server"),
    (0x1130, "Phonebook Access"),
    (0x1131, "Headset HS"),
    (0x1132, "Message Access Server"),
    (0x1133, "Message Notification Server"),
    (0x1134, "Message Access Profile"),
    (0x1200, "PnP Information"),
    (0x1203, "Generic Audio"),
    (0x1800, "Generic Access"),
    (0x1801, "Generic Attribute"),
    (0x1802, "Immediate Alert"),
    (0x1803, "Link Loss"),
    (0x1804, "Tx Power"),
    (0x1805, "Current Time"),
    (0x1809, "Health Thermometer"),
    (0x180A, "Device Information"),
    (0x180D, "Heart Rate"),
    (0x180F, "Battery"),
    (0x1810, "Blood Pressure"),
    (0x1812, "Human Interface Device over GATT"),
    (0x1816, "Cycling Speed and Cadence"),
    (0x1819, "Location and Navigation"),
    (0x181A, "Environmental Sensing"),
    (0x181C, "User Data"),
    (0x181D, "Weight Scale"),
    (0xFE9F, "Google"),
    (0xFEAA, "Eddystone"),
    (0xFD6F, "Exposure Notification"),
];

const VENDOR_CLASSES: &[(Uuid, &str)] = &[
    (SWITCHBOT_SERVICE, "Switchbot"),
    (SWITCHBOT_COMMAND, "Switchbot Command"),
    (SWITCHBOT_NOTIFY, "Switchbot Notify"),
];

/// Human-readable service class for a UUID, falling back to `"Unknown"`.
///
/// ```
/// use bluehub_types::uuids;
///
/// assert_eq!(uuids::service_class_name(&uuids::OBEX_OBJECT_PUSH), "OBEX Object Push");
/// assert_eq!(uuids::service_class_name(&uuid::Uuid::nil()), "Unknown");
/// ```
#[must_use]
pub fn service_class_name(uuid: &Uuid) -> &'static str {
    if let Some(short) = to_u16(uuid)
        && let Some((_, name)) = SERVICE_CLASSES.iter().find(|(id, _)| *id == short)
    {
        return name;
    }
    VENDOR_CLASSES
        .iter()
        .find(|(id, _)| id == uuid)
        .map_or("Unknown", |(_, name)| name)
}
