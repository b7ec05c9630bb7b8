//! Output formatting for text and JSON output.

use anyhow::Result;
use bluehub_core::BluetoothEvent;
use bluehub_core::util::to_hex;
use bluehub_types::{BluetoothDevice, ChildEntity};
use owo_colors::OwoColorize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool, compact: bool) -> Self {
        Self { no_color, compact }
    }

    /// Serialize to JSON, respecting the compact flag.
    pub fn as_json<T: serde::Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        Ok(json + "\n")
    }

    fn paint_name(&self, name: &str) -> String {
        if self.no_color {
            name.to_string()
        } else {
            format!("{}", name.cyan())
        }
    }
}

/// Ten-step bar for an RSSI value, -100 dBm empty and -30 dBm full.
#[must_use]
pub fn format_signal_bar(rssi: Option<i16>, no_color: bool) -> String {
    let Some(rssi) = rssi else {
        return "N/A".to_string();
    };

    let filled = (f32::from(rssi.saturating_add(100).clamp(0, 70)) / 7.0).round() as usize;
    let filled = filled.min(10);
    let bar = format!("{}{}", "#".repeat(filled), ".".repeat(10 - filled));

    if no_color {
        format!("{} {:>4}", bar, rssi)
    } else if filled >= 7 {
        format!("{} {:>4}", bar.green(), rssi)
    } else if filled >= 4 {
        format!("{} {:>4}", bar.yellow(), rssi)
    } else {
        format!("{} {:>4}", bar.red(), rssi)
    }
}

fn transport(device: &BluetoothDevice) -> &'static str {
    match (device.supports_ble, device.supports_legacy) {
        (true, true) => "Dual",
        (true, false) => "BLE",
        (false, true) => "Classic",
        (false, false) => "Unknown",
    }
}

fn state(device: &BluetoothDevice) -> &'static str {
    match (device.connected, device.reachable) {
        (Some(true), _) => "connected",
        (_, Some(true)) => "reachable",
        (_, Some(false)) => "lost",
        _ => "-",
    }
}

/// Table of devices, one row each.
#[must_use]
pub fn format_devices_text(devices: &[BluetoothDevice], opts: &FormatOptions) -> String {
    if devices.is_empty() {
        return "No devices found.\n".to_string();
    }

    #[derive(Tabled)]
    struct DeviceRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Address")]
        address: String,
        #[tabled(rename = "Type")]
        transport: &'static str,
        #[tabled(rename = "Signal")]
        signal: String,
        #[tabled(rename = "State")]
        state: &'static str,
        #[tabled(rename = "Manufacturer")]
        manufacturer: String,
    }

    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| DeviceRow {
            name: opts.paint_name(d.name.as_deref().unwrap_or("Unknown")),
            address: d.address.to_string(),
            transport: transport(d),
            signal: format_signal_bar(d.rssi, opts.no_color),
            state: state(d),
            manufacturer: d.manufacturer.clone().unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    let count = if opts.no_color {
        devices.len().to_string()
    } else {
        format!("{}", devices.len().to_string().green().bold())
    };
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    format!("Found {} device(s)\n\n{}\n", count, table)
}

/// Detailed view of one device including its services and switches.
#[must_use]
pub fn format_device_text(device: &BluetoothDevice, opts: &FormatOptions) -> String {
    let mut out = format!(
        "{} ({})\n",
        opts.paint_name(device.name.as_deref().unwrap_or("Unknown")),
        device.address
    );
    out.push_str(&format!("  Type:         {}\n", transport(device)));
    out.push_str(&format!("  State:        {}\n", state(device)));
    if let Some(manufacturer) = &device.manufacturer {
        out.push_str(&format!("  Manufacturer: {manufacturer}\n"));
    }
    if let Some(major) = &device.major_device_class {
        out.push_str(&format!("  Class:        {major}\n"));
    }
    if device.rssi.is_some() {
        out.push_str(&format!(
            "  Signal:       {}\n",
            format_signal_bar(device.rssi, opts.no_color)
        ));
    }

    for child in device.children.values() {
        match child {
            ChildEntity::Service(service) => {
                let kind = match (service.is_ble, service.protocol) {
                    (true, _) => "GATT".to_string(),
                    (false, Some(protocol)) => protocol.to_string(),
                    (false, None) => "SDP".to_string(),
                };
                let port = service.port.map(|p| format!(" port {p}")).unwrap_or_default();
                let name = service.name.as_deref().unwrap_or(&service.service_class);
                let link = if service.connected { " [connected]" } else { "" };
                out.push_str(&format!("  - {kind}{port}: {name}{link}\n"));
            }
            ChildEntity::Switch(switch) => {
                let value = match switch.state {
                    Some(true) => "on",
                    Some(false) => "off",
                    None => "unknown",
                };
                out.push_str(&format!("  - {} ({}): {value}\n", switch.name, switch.plugin));
            }
        }
    }
    out
}

/// Render bytes read from a device, as hex or as lossy UTF-8.
#[must_use]
pub fn format_bytes(data: &[u8], text: bool) -> String {
    if text {
        format!("{}\n", String::from_utf8_lossy(data))
    } else {
        format!("{}\n", to_hex(data))
    }
}

/// One line per event for `run --events` in text mode.
#[must_use]
pub fn format_event_text(event: &BluetoothEvent, opts: &FormatOptions) -> String {
    let tag = if opts.no_color {
        event.name().to_string()
    } else {
        format!("{}", event.name().bold())
    };
    match event.address() {
        Some(address) => format!("{tag} {address}\n"),
        None => format!("{tag}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluehub_types::{Address, BluetoothService, Protocol, uuids};

    fn device() -> BluetoothDevice {
        let address: Address = "00:11:22:33:44:55".parse().unwrap();
        let mut device = BluetoothDevice::new(address).with_name("Sensor1");
        device.supports_legacy = true;
        device.reachable = Some(true);
        device.rssi = Some(-50);
        device.add_child(ChildEntity::Service(BluetoothService::legacy(
            address,
            Protocol::Rfcomm,
            Some(3),
            Some(uuids::SERIAL_PORT),
        )));
        device
    }

    #[test]
    fn test_signal_bar() {
        assert_eq!(format_signal_bar(None, true), "N/A");
        assert_eq!(format_signal_bar(Some(-30), true), "########## -30");
        assert_eq!(format_signal_bar(Some(-100), true), ".......... -100");
    }

    #[test]
    fn test_devices_table() {
        let opts = FormatOptions::new(true, false);
        let text = format_devices_text(&[device()], &opts);
        assert!(text.starts_with("Found 1 device(s)"));
        assert!(text.contains("Sensor1"));
        assert!(text.contains("00:11:22:33:44:55"));
        assert!(text.contains("Classic"));
        assert!(text.contains("reachable"));

        assert_eq!(format_devices_text(&[], &opts), "No devices found.\n");
    }

    #[test]
    fn test_device_detail_lists_services() {
        let text = format_device_text(&device(), &FormatOptions::new(true, false));
        assert!(text.contains("RFCOMM port 3"));
    }

    #[test]
    fn test_json_compact() {
        let opts = FormatOptions::new(true, true);
        let json = opts.as_json(&vec![device()]).unwrap();
        assert!(!json.trim_end().contains('\n'));
        let parsed: Vec<BluetoothDevice> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].name.as_deref(), Some("Sensor1"));
    }

    #[test]
    fn test_bytes_and_events() {
        assert_eq!(format_bytes(&[0x57, 0x01], false), "5701\n");
        assert_eq!(format_bytes(b"ok", true), "ok\n");

        let event = BluetoothEvent::ScanPaused { duration_secs: None };
        assert_eq!(
            format_event_text(&event, &FormatOptions::new(true, false)),
            "scan_paused\n"
        );
    }
}
