//! Switchbot "Bot" push-button actuators.
//!
//! The Bot exposes a single command characteristic. Commands are three bytes:
//! `0x57 0x01` followed by `0x00` (press), `0x01` (on) or `0x02` (off).

use async_trait::async_trait;
use bluehub_types::{BluetoothDevice, ChildEntity, SwitchEntity, uuids};
use serde_json::Value;
use tracing::info;

use super::{DevicePlugin, GattAccess};
use crate::error::{Error, Result};

/// Manufacturer id Switchbot (Wonder Labs) advertises with.
pub const SWITCHBOT_MANUFACTURER_ID: u16 = 0x0969;

const PLUGIN_NAME: &str = "switchbot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Press,
    On,
    Off,
}

impl Command {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Self::On),
            Value::Bool(false) => Some(Self::Off),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "press" | "toggle" => Some(Self::Press),
                "on" | "true" => Some(Self::On),
                "off" | "false" => Some(Self::Off),
                _ => None,
            },
            _ => None,
        }
    }

    fn bytes(self) -> [u8; 3] {
        let op = match self {
            Self::Press => 0x00,
            Self::On => 0x01,
            Self::Off => 0x02,
        };
        [0x57, 0x01, op]
    }

    /// Switch state after the command; a press leaves it unknown.
    fn resulting_state(self) -> Option<bool> {
        match self {
            Self::Press => None,
            Self::On => Some(true),
            Self::Off => Some(false),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchbotPlugin;

impl SwitchbotPlugin {
    fn entity_id(device: &BluetoothDevice) -> String {
        format!("{}:switch", device.address)
    }
}

#[async_trait]
impl DevicePlugin for SwitchbotPlugin {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn supports_device(&self, device: &BluetoothDevice) -> bool {
        if device.has_service(&uuids::SWITCHBOT_SERVICE) {
            return true;
        }
        device
            .data
            .get("manufacturer_data")
            .and_then(Value::as_object)
            .is_some_and(|m| m.contains_key(&SWITCHBOT_MANUFACTURER_ID.to_string()))
    }

    fn extract_entities(&self, device: &BluetoothDevice) -> Vec<ChildEntity> {
        let name = device
            .name
            .clone()
            .unwrap_or_else(|| format!("Switchbot {}", device.address));
        vec![ChildEntity::Switch(SwitchEntity {
            id: Self::entity_id(device),
            name,
            state: None,
            plugin: PLUGIN_NAME.to_string(),
        })]
    }

    async fn set(
        &self,
        gatt: &dyn GattAccess,
        device: &BluetoothDevice,
        value: &Value,
    ) -> Result<BluetoothDevice> {
        let command = Command::from_value(value).ok_or_else(|| {
            Error::unsupported(format!(
                "Switchbot accepts true/false or \"on\"/\"off\"/\"press\", got {value}"
            ))
        })?;

        let address = device.address.to_string();
        gatt.write_characteristic(&address, uuids::SWITCHBOT_COMMAND, &command.bytes())
            .await?;
        info!(device = %address, ?command, "Switchbot command sent");

        let mut updated = device.clone();
        let mut entities = self.extract_entities(device);
        for entity in &mut entities {
            if let ChildEntity::Switch(switch) = entity {
                switch.state = command.resulting_state();
            }
        }
        for entity in entities {
            updated.add_child(entity);
        }
        Ok(updated)
    }
}
