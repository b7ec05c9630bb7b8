//! File push over OBEX.

use std::path::Path;

use anyhow::{Context, Result, bail};
use bluehub_core::BluetoothPlugin;

use crate::cli::TargetArgs;

pub async fn cmd_send_file(
    plugin: &BluetoothPlugin,
    target: &TargetArgs,
    path: &Path,
    quiet: bool,
) -> Result<()> {
    if !path.is_file() {
        bail!("{} is not a file", path.display());
    }
    plugin
        .send_file(&target.device, path, &target.options())
        .await
        .with_context(|| format!("Failed to send {} to {}", path.display(), target.device))?;
    if !quiet {
        eprintln!("Sent {} to {}", path.display(), target.device);
    }
    Ok(())
}
