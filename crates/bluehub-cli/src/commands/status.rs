//! Status command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bluehub_core::BluetoothPlugin;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_device_text, format_devices_text};
use crate::util::write_output;

/// Show known devices. A single named device gets the detailed view.
pub async fn cmd_status(
    plugin: &BluetoothPlugin,
    devices: &[String],
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let found = plugin
        .status(devices)
        .await
        .context("Failed to query device status")?;

    let content = match format {
        OutputFormat::Json => opts.as_json(&found)?,
        OutputFormat::Text if devices.len() == 1 && found.len() == 1 => {
            format_device_text(&found[0], opts)
        }
        OutputFormat::Text => format_devices_text(&found, opts),
    };
    write_output(output, &content)
}
