//! bluehub command-line interface.

mod cli;
mod commands;
mod config;
mod format;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, OutputFormat};
use commands::*;
use config::Config;
use format::FormatOptions;
use util::build_plugin;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "bluehub", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;
    let opts = FormatOptions::new(cli.no_color, cli.compact);
    let output = cli.output.as_ref();
    let json = cli.json;
    let format = |requested: OutputFormat| if json { OutputFormat::Json } else { requested };

    let plugin = build_plugin(&config)?;

    let result = match cli.command {
        Commands::Scan {
            duration,
            device,
            service,
            format: requested,
        } => {
            let args = ScanArgs {
                duration,
                devices: device,
                services: service,
                format: format(requested),
            };
            cmd_scan(&plugin, args, output, cli.quiet, &opts).await
        }
        Commands::Status {
            devices,
            format: requested,
        } => cmd_status(&plugin, &devices, format(requested), output, &opts).await,
        Commands::Connect { target } => cmd_connect(&plugin, &target, output, json, &opts).await,
        Commands::Disconnect { target } => cmd_disconnect(&plugin, &target, cli.quiet).await,
        Commands::Read { target, size, text } => {
            cmd_read(&plugin, &target, size, text, output, json, &opts).await
        }
        Commands::Write { target, data, text } => {
            cmd_write(&plugin, &target, &data, text, cli.quiet).await
        }
        Commands::SendFile { target, path } => {
            cmd_send_file(&plugin, &target, &path, cli.quiet).await
        }
        Commands::Set { device, value } => {
            cmd_set(&plugin, &device, &value, output, json, &opts).await
        }
        Commands::Run { events, paused } => {
            return cmd_run(plugin, events, json, paused, opts).await;
        }
        Commands::Completions { .. } => Ok(()),
    };

    // One-shot commands close their connections and persist what they saw.
    plugin.stop().await;
    result
}
