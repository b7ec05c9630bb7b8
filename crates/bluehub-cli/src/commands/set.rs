//! Set command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bluehub_core::BluetoothPlugin;

use crate::format::{FormatOptions, format_device_text};
use crate::util::{parse_value, write_output};

pub async fn cmd_set(
    plugin: &BluetoothPlugin,
    device: &str,
    value: &str,
    output: Option<&PathBuf>,
    json: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let value = parse_value(value);
    let updated = plugin
        .set(device, &value)
        .await
        .with_context(|| format!("Failed to set {device} to {value}"))?;

    let content = if json {
        opts.as_json(&updated)?
    } else {
        format_device_text(&updated, opts)
    };
    write_output(output, &content)
}
