//! Device-capability plugins.
//!
//! A capability plugin recognizes a family of devices from what discovery
//! saw (advertised services, manufacturer data) and exposes higher-level
//! entities on top of them, such as a Switchbot as an on/off switch.
//! Plugins are registered explicitly in a [`PluginRegistry`].

mod switchbot;

use std::sync::Arc;

use async_trait::async_trait;
use bluehub_types::{BluetoothDevice, ChildEntity};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

pub use switchbot::SwitchbotPlugin;

/// GATT characteristic access handed to plugins when they actuate a device.
#[async_trait]
pub trait GattAccess: Send + Sync {
    async fn read_characteristic(&self, device: &str, characteristic: Uuid) -> Result<Vec<u8>>;

    async fn write_characteristic(
        &self,
        device: &str,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<()>;
}

#[async_trait]
pub trait DevicePlugin: Send + Sync {
    /// Short identifier, stored on derived entities.
    fn name(&self) -> &'static str;

    fn supports_device(&self, device: &BluetoothDevice) -> bool;

    /// Entities to attach under a supported device.
    fn extract_entities(&self, device: &BluetoothDevice) -> Vec<ChildEntity>;

    /// Actuate a supported device, returning its updated record.
    async fn set(
        &self,
        gatt: &dyn GattAccess,
        device: &BluetoothDevice,
        value: &Value,
    ) -> Result<BluetoothDevice>;
}

/// Ordered set of capability plugins; the first match wins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn DevicePlugin>>,
}

impl PluginRegistry {
    /// A registry with no plugins.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every bundled plugin.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SwitchbotPlugin));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn DevicePlugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// First plugin that supports `device`.
    pub fn find_for(&self, device: &BluetoothDevice) -> Option<Arc<dyn DevicePlugin>> {
        self.plugins
            .iter()
            .find(|p| p.supports_device(device))
            .cloned()
    }

    /// Attach the entities of every supporting plugin to `device`.
    ///
    /// An advertisement says nothing about switch state, so a switch that
    /// `known` already reports keeps its last state.
    pub fn enrich(&self, device: &mut BluetoothDevice, known: Option<&BluetoothDevice>) {
        let entities: Vec<ChildEntity> = self
            .plugins
            .iter()
            .filter(|p| p.supports_device(device))
            .flat_map(|p| p.extract_entities(device))
            .collect();
        for mut entity in entities {
            if let ChildEntity::Switch(switch) = &mut entity
                && switch.state.is_none()
                && let Some(ChildEntity::Switch(prior)) =
                    known.and_then(|k| k.children.get(&switch.id))
            {
                switch.state = prior.state;
            }
            device.add_child(entity);
        }
    }
}
