//! CLI argument definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use bluehub_core::ConnectOptions;
use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::util::parse_uuid;

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Which device, and which of its services, an action targets
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Device address or name, or use BLUEHUB_DEVICE env var
    #[arg(short, long, env = "BLUEHUB_DEVICE")]
    pub device: String,

    /// RFCOMM channel or L2CAP PSM (classic devices)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Service UUID (classic) or characteristic UUID (BLE); 16-bit short
    /// forms such as `1101` are accepted
    #[arg(short, long, value_parser = parse_uuid)]
    pub uuid: Option<Uuid>,

    /// Adapter to use, e.g. hci0
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Connection timeout in seconds
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

impl TargetArgs {
    pub fn options(&self) -> ConnectOptions {
        let mut options = ConnectOptions::new();
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(uuid) = self.uuid {
            options = options.service_uuid(uuid);
        }
        if let Some(interface) = &self.interface {
            options = options.interface(interface.clone());
        }
        if let Some(timeout) = self.timeout {
            options = options.timeout(Duration::from_secs(timeout));
        }
        options
    }
}

#[derive(Parser)]
#[command(name = "bluehub")]
#[command(author, version, about = "Bluetooth discovery and device access", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "BLUEHUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby BLE and classic devices
    Scan {
        /// Total scan duration in seconds (split between BLE and classic)
        #[arg(short = 'D', long)]
        duration: Option<u64>,

        /// Only report these devices (address or name); repeatable
        #[arg(short, long, value_delimiter = ',')]
        device: Vec<String>,

        /// Only report devices offering this service; repeatable
        #[arg(short, long, value_delimiter = ',', value_parser = parse_uuid)]
        service: Vec<Uuid>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show known devices without scanning
    Status {
        /// Only show these devices (address or name)
        devices: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Connect to a device (GATT, or RFCOMM/L2CAP when a port or service is given)
    Connect {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Disconnect from a device
    Disconnect {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Read from a characteristic or a classic stream
    Read {
        #[command(flatten)]
        target: TargetArgs,

        /// Maximum number of bytes to read
        #[arg(short, long)]
        size: Option<usize>,

        /// Print the data as UTF-8 text instead of hex
        #[arg(long)]
        text: bool,
    },

    /// Write to a characteristic or a classic stream
    Write {
        #[command(flatten)]
        target: TargetArgs,

        /// Payload, hex-encoded unless --text is given
        data: String,

        /// Send the payload as UTF-8 text
        #[arg(long)]
        text: bool,
    },

    /// Push a file over OBEX Object Push
    SendFile {
        #[command(flatten)]
        target: TargetArgs,

        /// File to send
        path: PathBuf,
    },

    /// Actuate a device through its capability plugin (e.g. Switchbot)
    Set {
        /// Device address or name
        #[arg(short, long, env = "BLUEHUB_DEVICE")]
        device: String,

        /// Value as JSON (`true`, `"press"`) or a bare word (`on`, `off`, `press`)
        value: String,
    },

    /// Run discovery in the background and persist devices until interrupted
    Run {
        /// Print every event as a JSON line
        #[arg(long)]
        events: bool,

        /// Start with background discovery paused for this many seconds
        #[arg(long)]
        paused: Option<u64>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}
