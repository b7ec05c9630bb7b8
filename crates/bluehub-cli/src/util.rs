//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bluehub_core::util::from_hex;
use bluehub_core::{BluetoothPlugin, uuids};
use bluehub_store::Store;
use serde_json::Value;
use uuid::Uuid;

use crate::config::Config;

/// Parse a full UUID, or a 16-bit Bluetooth short UUID such as `1101` or
/// `0x1105`.
pub fn parse_uuid(s: &str) -> Result<Uuid, String> {
    let trimmed = s.trim();
    let short = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if short.len() <= 4
        && let Ok(value) = u16::from_str_radix(short, 16)
    {
        return Ok(uuids::from_u16(value));
    }
    Uuid::parse_str(trimmed).map_err(|e| format!("invalid UUID '{s}': {e}"))
}

/// Decode a write payload: hex by default (spaces and colons allowed),
/// raw UTF-8 when `text` is set.
pub fn parse_payload(data: &str, text: bool) -> Result<Vec<u8>> {
    if text {
        return Ok(data.as_bytes().to_vec());
    }
    let compact: String = data
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let compact = compact
        .strip_prefix("0x")
        .unwrap_or(&compact)
        .to_string();
    if compact.is_empty() {
        bail!("Payload is empty");
    }
    from_hex(&compact).with_context(|| format!("Invalid hex payload '{data}'"))
}

/// Interpret a `set` argument: JSON when it parses, otherwise a bare word
/// (`on`/`off` map to booleans, anything else stays a string).
pub fn parse_value(value: &str) -> Value {
    if let Ok(parsed) = serde_json::from_str::<Value>(value) {
        return parsed;
    }
    match value.to_ascii_lowercase().as_str() {
        "on" => Value::Bool(true),
        "off" => Value::Bool(false),
        _ => Value::String(value.to_string()),
    }
}

/// Assemble the plugin from the loaded configuration, backed by SQLite
/// unless the store is disabled.
pub fn build_plugin(config: &Config) -> Result<Arc<BluetoothPlugin>> {
    let mut builder = BluetoothPlugin::builder(config.bluetooth.clone());
    if config.store.enabled {
        let path = config.store.db_path();
        let store = Store::open(&path)
            .with_context(|| format!("Failed to open entity store at {}", path.display()))?;
        builder = builder.store(Arc::new(store));
    }
    let plugin = builder.build().context("Failed to initialize Bluetooth")?;
    Ok(Arc::new(plugin))
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_short_and_full() {
        assert_eq!(parse_uuid("1101").unwrap(), uuids::SERIAL_PORT);
        assert_eq!(parse_uuid("0x1105").unwrap(), uuids::OBEX_OBJECT_PUSH);
        assert_eq!(
            parse_uuid("cba20002-224d-11e6-9fb8-0002a5d5c51b").unwrap(),
            uuids::SWITCHBOT_COMMAND
        );
        assert!(parse_uuid("not-a-uuid").is_err());
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload("57 01 01", false).unwrap(), vec![0x57, 1, 1]);
        assert_eq!(parse_payload("0x5701", false).unwrap(), vec![0x57, 1]);
        assert_eq!(parse_payload("de:ad", false).unwrap(), vec![0xde, 0xad]);
        assert_eq!(parse_payload("hi", true).unwrap(), b"hi".to_vec());
        assert!(parse_payload("zz", false).is_err());
        assert!(parse_payload("", false).is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("true"), Value::Bool(true));
        assert_eq!(parse_value("ON"), Value::Bool(true));
        assert_eq!(parse_value("off"), Value::Bool(false));
        assert_eq!(parse_value("press"), Value::String("press".into()));
        assert_eq!(parse_value("\"press\""), Value::String("press".into()));
    }

    #[test]
    fn test_write_output_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(Some(&path), "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_build_plugin_without_store() {
        let mut config = Config::default();
        config.store.enabled = false;
        config.bluetooth.legacy.enabled = false;
        // building does not touch the adapter
        assert!(build_plugin(&config).is_ok());
    }
}
