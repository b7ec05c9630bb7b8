//! Connect and disconnect commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bluehub_core::BluetoothPlugin;

use crate::cli::TargetArgs;
use crate::format::{FormatOptions, format_device_text};
use crate::util::write_output;

pub async fn cmd_connect(
    plugin: &BluetoothPlugin,
    target: &TargetArgs,
    output: Option<&PathBuf>,
    json: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let device = plugin
        .connect(&target.device, &target.options())
        .await
        .with_context(|| format!("Failed to connect to {}", target.device))?;

    let content = if json {
        opts.as_json(&device)?
    } else {
        format_device_text(&device, opts)
    };
    write_output(output, &content)
}

pub async fn cmd_disconnect(plugin: &BluetoothPlugin, target: &TargetArgs, quiet: bool) -> Result<()> {
    plugin
        .disconnect(&target.device, &target.options())
        .await
        .with_context(|| format!("Failed to disconnect from {}", target.device))?;
    if !quiet {
        eprintln!("Disconnected from {}", target.device);
    }
    Ok(())
}
