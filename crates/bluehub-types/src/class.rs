//! Class-of-Device taxonomy for classic Bluetooth.
//!
//! The 24-bit Class of Device field reported during inquiry packs three
//! things together:
//!
//! | Bits  | Meaning                                  |
//! |-------|------------------------------------------|
//! | 0-1   | Format type (always `00`)                |
//! | 2-7   | Minor device class (depends on major)    |
//! | 8-12  | Major device class                       |
//! | 13-23 | Major service classes (one bit each)     |
//!
//! [`DeviceClass::decode`] splits a raw value into the typed pieces that end
//! up on [`BluetoothDevice`](crate::BluetoothDevice).

use core::fmt;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Major device class (bits 8-12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MajorDeviceClass {
    Miscellaneous,
    Computer,
    Phone,
    NetworkAccessPoint,
    AudioVideo,
    Peripheral,
    Imaging,
    Wearable,
    Toy,
    Health,
    Uncategorized,
}

impl MajorDeviceClass {
    /// Map the 5-bit major class field. Reserved values yield `None`.
    #[must_use]
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits & 0x1F {
            0x00 => Self::Miscellaneous,
            0x01 => Self::Computer,
            0x02 => Self::Phone,
            0x03 => Self::NetworkAccessPoint,
            0x04 => Self::AudioVideo,
            0x05 => Self::Peripheral,
            0x06 => Self::Imaging,
            0x07 => Self::Wearable,
            0x08 => Self::Toy,
            0x09 => Self::Health,
            0x1F => Self::Uncategorized,
            _ => return None,
        })
    }
}

impl fmt::Display for MajorDeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Miscellaneous => "Miscellaneous",
            Self::Computer => "Computer",
            Self::Phone => "Phone",
            Self::NetworkAccessPoint => "LAN/Network Access Point",
            Self::AudioVideo => "Audio/Video",
            Self::Peripheral => "Peripheral",
            Self::Imaging => "Imaging",
            Self::Wearable => "Wearable",
            Self::Toy => "Toy",
            Self::Health => "Health",
            Self::Uncategorized => "Uncategorized",
        };
        f.write_str(s)
    }
}

/// Major service classes (bits 13-23). A device can advertise several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum MajorServiceClass {
    LimitedDiscoverableMode,
    LeAudio,
    Positioning,
    Networking,
    Rendering,
    Capturing,
    ObjectTransfer,
    Audio,
    Telephony,
    Information,
}

impl MajorServiceClass {
    const BITS: [(u32, MajorServiceClass); 10] = [
        (13, Self::LimitedDiscoverableMode),
        (14, Self::LeAudio),
        (16, Self::Positioning),
        (17, Self::Networking),
        (18, Self::Rendering),
        (19, Self::Capturing),
        (20, Self::ObjectTransfer),
        (21, Self::Audio),
        (22, Self::Telephony),
        (23, Self::Information),
    ];

    /// All service classes whose bit is set in a raw Class of Device value.
    #[must_use]
    pub fn from_class(raw: u32) -> BTreeSet<Self> {
        Self::BITS
            .iter()
            .filter(|(bit, _)| raw & (1 << bit) != 0)
            .map(|(_, class)| *class)
            .collect()
    }
}

impl fmt::Display for MajorServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LimitedDiscoverableMode => "Limited Discoverable Mode",
            Self::LeAudio => "LE Audio",
            Self::Positioning => "Positioning",
            Self::Networking => "Networking",
            Self::Rendering => "Rendering",
            Self::Capturing => "Capturing",
            Self::ObjectTransfer => "Object Transfer",
            Self::Audio => "Audio",
            Self::Telephony => "Telephony",
            Self::Information => "Information",
        };
        f.write_str(s)
    }
}

/// A decoded Class of Device value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceClass {
    pub major: Option<MajorDeviceClass>,
    /// Minor class names. Peripheral and Imaging devices can carry several.
    pub minor: BTreeSet<String>,
    pub services: BTreeSet<MajorServiceClass>,
}

impl DeviceClass {
    /// Decode a raw 24-bit Class of Device value.
    ///
    /// ```
    /// use bluehub_types::{DeviceClass, MajorDeviceClass, MajorServiceClass};
    ///
    /// // Smartphone with Networking, Capturing, Object Transfer, Audio, Telephony.
    /// let class = DeviceClass::decode(0x7A020C);
    /// assert_eq!(class.major, Some(MajorDeviceClass::Phone));
    /// assert!(class.minor.contains("Smartphone"));
    /// assert!(class.services.contains(&MajorServiceClass::Telephony));
    /// ```
    #[must_use]
    pub fn decode(raw: u32) -> Self {
        let major = MajorDeviceClass::from_bits(((raw >> 8) & 0x1F) as u8);
        let minor_bits = ((raw >> 2) & 0x3F) as u8;
        let minor = match major {
            Some(m) => minor_classes(m, minor_bits)
                .into_iter()
                .map(str::to_string)
                .collect(),
            None => BTreeSet::new(),
        };
        Self {
            major,
            minor,
            services: MajorServiceClass::from_class(raw),
        }
    }
}

fn minor_classes(major: MajorDeviceClass, minor: u8) -> Vec<&'static str> {
    match major {
        MajorDeviceClass::Computer => lookup(
            minor,
            &[
                "Uncategorized",
                "Desktop workstation",
                "Server-class computer",
                "Laptop",
                "Handheld PC/PDA",
                "Palm-size PC/PDA",
                "Wearable computer",
                "Tablet",
            ],
        ),
        MajorDeviceClass::Phone => lookup(
            minor,
            &[
                "Uncategorized",
                "Cellular",
                "Cordless",
                "Smartphone",
                "Wired modem or voice gateway",
                "Common ISDN access",
            ],
        ),
        MajorDeviceClass::NetworkAccessPoint => lookup(
            minor >> 3,
            &[
                "Fully available",
                "1% to 17% utilized",
                "17% to 33% utilized",
                "33% to 50% utilized",
                "50% to 67% utilized",
                "67% to 83% utilized",
                "83% to 99% utilized",
                "No service available",
            ],
        ),
        MajorDeviceClass::AudioVideo => lookup(
            minor,
            &[
                "Uncategorized",
                "Wearable Headset Device",
                "Hands-free Device",
                "",
                "Microphone",
                "Loudspeaker",
                "Headphones",
                "Portable Audio",
                "Car audio",
                "Set-top box",
                "HiFi Audio Device",
                "VCR",
                "Video Camera",
                "Camcorder",
                "Video Monitor",
                "Video Display and Loudspeaker",
                "Video Conferencing",
                "",
                "Gaming/Toy",
            ],
        ),
        MajorDeviceClass::Peripheral => {
            let mut out = Vec::new();
            match minor >> 4 {
                1 => out.push("Keyboard"),
                2 => out.push("Pointing device"),
                3 => out.extend(["Keyboard", "Pointing device"]),
                _ => {}
            }
            out.extend(lookup(
                minor & 0x0F,
                &[
                    "",
                    "Joystick",
                    "Gamepad",
                    "Remote control",
                    "Sensing device",
                    "Digitizer tablet",
                    "Card Reader",
                    "Digital Pen",
                    "Handheld scanner",
                    "Handheld gestural input device",
                ],
            ));
            out
        }
        MajorDeviceClass::Imaging => [
            (0x04, "Display"),
            (0x08, "Camera"),
            (0x10, "Scanner"),
            (0x20, "Printer"),
        ]
        .into_iter()
        .filter(|(bit, _)| minor & bit != 0)
        .map(|(_, name)| name)
        .collect(),
        MajorDeviceClass::Wearable => lookup(
            minor,
            &["", "Wristwatch", "Pager", "Jacket", "Helmet", "Glasses"],
        ),
        MajorDeviceClass::Toy => lookup(
            minor,
            &[
                "",
                "Robot",
                "Vehicle",
                "Doll/Action figure",
                "Controller",
                "Game",
            ],
        ),
        MajorDeviceClass::Health => lookup(
            minor,
            &[
                "Undefined",
                "Blood Pressure Monitor",
                "Thermometer",
                "Weighing Scale",
                "Glucose Meter",
                "Pulse Oximeter",
                "Heart/Pulse Rate Monitor",
                "Health Data Display",
                "Step Counter",
                "Body Composition Analyzer",
                "Peak Flow Monitor",
                "Medication Monitor",
                "Knee Prosthesis",
                "Ankle Prosthesis",
                "Generic Health Manager",
                "Personal Mobility Device",
            ],
        ),
        MajorDeviceClass::Miscellaneous | MajorDeviceClass::Uncategorized => Vec::new(),
    }
}

fn lookup(index: u8, table: &[&'static str]) -> Vec<&'static str> {
    table
        .get(index as usize)
        .filter(|name| !name.is_empty())
        .map(|name| vec![*name])
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_headset() {
        // Audio/Video, Wearable Headset, Audio + Rendering services
        let class = DeviceClass::decode(0x240404);
        assert_eq!(class.major, Some(MajorDeviceClass::AudioVideo));
        assert_eq!(
            class.minor.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["Wearable Headset Device"]
        );
        assert!(class.services.contains(&MajorServiceClass::Audio));
        assert!(class.services.contains(&MajorServiceClass::Rendering));
        assert_eq!(class.services.len(), 2);
    }

    #[test]
    fn test_decode_laptop() {
        let class = DeviceClass::decode(0x10010C);
        assert_eq!(class.major, Some(MajorDeviceClass::Computer));
        assert!(class.minor.contains("Laptop"));
        assert_eq!(
            class.services,
            BTreeSet::from([MajorServiceClass::ObjectTransfer])
        );
    }

    #[test]
    fn test_decode_combo_peripheral_has_multiple_minors() {
        // Peripheral, keyboard + pointing combo, remote control
        let raw = (0x05 << 8) | (((0b11 << 4) | 0x03) << 2);
        let class = DeviceClass::decode(raw);
        assert_eq!(class.major, Some(MajorDeviceClass::Peripheral));
        assert!(class.minor.contains("Keyboard"));
        assert!(class.minor.contains("Pointing device"));
        assert!(class.minor.contains("Remote control"));
    }

    #[test]
    fn test_decode_imaging_flags() {
        let raw = (0x06 << 8) | ((0x20 | 0x10) << 2);
        let class = DeviceClass::decode(raw);
        assert_eq!(class.major, Some(MajorDeviceClass::Imaging));
        assert_eq!(class.minor.len(), 2);
        assert!(class.minor.contains("Printer"));
        assert!(class.minor.contains("Scanner"));
    }

    #[test]
    fn test_decode_reserved_major() {
        let class = DeviceClass::decode(0x0A << 8);
        assert_eq!(class.major, None);
        assert!(class.minor.is_empty());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(MajorDeviceClass::AudioVideo.to_string(), "Audio/Video");
        assert_eq!(
            MajorServiceClass::ObjectTransfer.to_string(),
            "Object Transfer"
        );
    }
}
