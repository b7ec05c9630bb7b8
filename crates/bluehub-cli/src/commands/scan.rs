//! Scan command implementation.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bluehub_core::{BluetoothPlugin, ScanRequest};
use tracing::info;
use uuid::Uuid;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_devices_text};
use crate::util::write_output;

/// Arguments for the scan command.
pub struct ScanArgs {
    pub duration: Option<u64>,
    pub devices: Vec<String>,
    pub services: Vec<Uuid>,
    pub format: OutputFormat,
}

impl ScanArgs {
    fn request(&self) -> ScanRequest {
        let mut request = ScanRequest::default();
        if let Some(secs) = self.duration {
            request = request.duration(Duration::from_secs(secs));
        }
        for device in &self.devices {
            request = request.device(device.clone());
        }
        for uuid in &self.services {
            request = request.service_uuid(*uuid);
        }
        request
    }
}

pub async fn cmd_scan(
    plugin: &BluetoothPlugin,
    args: ScanArgs,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    if !quiet && args.format == OutputFormat::Text {
        let secs = args
            .duration
            .unwrap_or(plugin.config().scan_duration);
        eprintln!("Scanning for Bluetooth devices ({secs}s)...");
    }

    let devices = plugin
        .scan(args.request())
        .await
        .context("Failed to scan for devices")?;
    info!("Found {} device(s)", devices.len());

    let content = match args.format {
        OutputFormat::Json => opts.as_json(&devices)?,
        OutputFormat::Text => format_devices_text(&devices, opts),
    };
    write_output(output, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluehub_core::uuids;

    #[test]
    fn test_request_from_args() {
        let args = ScanArgs {
            duration: Some(4),
            devices: vec!["Sensor1".into()],
            services: vec![uuids::OBEX_OBJECT_PUSH],
            format: OutputFormat::Text,
        };
        let request = args.request();
        assert_eq!(request.duration, Some(Duration::from_secs(4)));
        assert_eq!(request.devices, vec!["Sensor1".to_string()]);
        assert_eq!(request.service_uuids, vec![uuids::OBEX_OBJECT_PUSH]);

        let empty = ScanArgs {
            duration: None,
            devices: Vec::new(),
            services: Vec::new(),
            format: OutputFormat::Json,
        };
        assert_eq!(empty.request(), ScanRequest::default());
    }
}
