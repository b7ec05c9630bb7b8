//! Long-running discovery service.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bluehub_core::BluetoothPlugin;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::format::{FormatOptions, format_event_text};

/// Start the plugin and keep it running until Ctrl+C.
pub async fn cmd_run(
    plugin: Arc<BluetoothPlugin>,
    events: bool,
    json: bool,
    paused: Option<u64>,
    opts: FormatOptions,
) -> Result<()> {
    let shutdown = CancellationToken::new();

    let printer = events.then(|| plugin.subscribe()).flatten().map(|mut rx| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = rx.recv() => event,
                };
                match event {
                    Ok(event) => {
                        let line = if json {
                            serde_json::to_string(&event).map(|line| line + "\n")
                        } else {
                            Ok(format_event_text(&event, &opts))
                        };
                        match line {
                            Ok(line) => print!("{line}"),
                            Err(e) => warn!("Could not format event: {e}"),
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event printer lagged, skipped {n} event(s)");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    });

    if let Some(secs) = paused {
        plugin.scan_pause(Some(Duration::from_secs(secs)));
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl+C: {e}");
        }
        info!("Shutting down");
        signal.cancel();
    });

    info!("Running, press Ctrl+C to stop");
    plugin
        .run(shutdown.clone())
        .await
        .context("Bluetooth service failed")?;

    shutdown.cancel();
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    Ok(())
}
