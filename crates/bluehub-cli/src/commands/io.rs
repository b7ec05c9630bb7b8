//! Read and write commands.

use std::path::PathBuf;

use anyhow::{Context, Result};
use bluehub_core::BluetoothPlugin;
use bluehub_core::util::to_hex;
use serde::Serialize;

use crate::cli::TargetArgs;
use crate::format::{FormatOptions, format_bytes};
use crate::util::{parse_payload, write_output};

#[derive(Serialize)]
struct ReadOutput<'a> {
    device: &'a str,
    size: usize,
    hex: String,
}

pub async fn cmd_read(
    plugin: &BluetoothPlugin,
    target: &TargetArgs,
    size: Option<usize>,
    text: bool,
    output: Option<&PathBuf>,
    json: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let data = plugin
        .read(&target.device, &target.options(), size)
        .await
        .with_context(|| format!("Failed to read from {}", target.device))?;

    let content = if json {
        opts.as_json(&ReadOutput {
            device: &target.device,
            size: data.len(),
            hex: to_hex(&data),
        })?
    } else {
        format_bytes(&data, text)
    };
    write_output(output, &content)
}

pub async fn cmd_write(
    plugin: &BluetoothPlugin,
    target: &TargetArgs,
    data: &str,
    text: bool,
    quiet: bool,
) -> Result<()> {
    let payload = parse_payload(data, text)?;
    plugin
        .write(&target.device, &payload, &target.options())
        .await
        .with_context(|| format!("Failed to write to {}", target.device))?;
    if !quiet {
        eprintln!("Wrote {} byte(s) to {}", payload.len(), target.device);
    }
    Ok(())
}
