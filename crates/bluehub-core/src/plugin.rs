//! The Bluetooth façade.
//!
//! [`BluetoothPlugin`] owns both managers, the shared coordination context
//! and the entity store, and exposes the public actions: `connect`,
//! `disconnect`, `scan`, `status`, `scan_pause`, `scan_resume`, `read`,
//! `write`, `set` and `send_file`. Actions on a single device are routed
//! to the BLE or classic manager by [`BluetoothPlugin::route_for`].
//!
//! # Example
//!
//! ```no_run
//! use bluehub_core::{BluetoothConfig, BluetoothPlugin, ConnectOptions};
//!
//! #[tokio::main]
//! async fn main() -> bluehub_core::Result<()> {
//!     let plugin = BluetoothPlugin::builder(BluetoothConfig::default()).build()?;
//!     let devices = plugin.scan(Default::default()).await?;
//!     for device in &devices {
//!         println!("{} {:?}", device.address, device.name);
//!     }
//!     plugin.connect("Sensor1", &ConnectOptions::new().port(1)).await?;
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bluehub_types::{Address, BluetoothDevice, OuiDirectory};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::ble::{BleBackend, BleManager, BtleplugBackend};
use crate::config::BluetoothConfig;
use crate::coordination::{Coordination, DeviceReceiver};
use crate::error::{Error, Result};
use crate::events::{BluetoothEvent, EventBus, EventDispatcher, EventReceiver};
use crate::legacy::{self, LegacyBackend, LegacyManager};
use crate::manager::{BluetoothManager, ConnectOptions, Lifecycle, ManagerContext, ManagerKind};
use crate::plugins::PluginRegistry;
use crate::store::{EntityStore, MemoryStore};

/// Largest number of queued devices persisted in one store call.
const PERSIST_BATCH: usize = 64;

/// Arguments of [`BluetoothPlugin::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanRequest {
    /// Total discovery time, split evenly between the managers.
    /// Defaults to the configured scan duration.
    pub duration: Option<Duration>,
    /// Only return devices identified by one of these addresses or names.
    pub devices: Vec<String>,
    /// Only return devices offering one of these services.
    pub service_uuids: Vec<Uuid>,
}

impl ScanRequest {
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    #[must_use]
    pub fn device(mut self, device: impl Into<String>) -> Self {
        self.devices.push(device.into());
        self
    }

    #[must_use]
    pub fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuids.push(uuid);
        self
    }

    fn selects(&self, device: &BluetoothDevice) -> bool {
        let by_device =
            self.devices.is_empty() || self.devices.iter().any(|k| device.is_identified_by(k));
        let by_service =
            self.service_uuids.is_empty() || self.service_uuids.iter().any(|u| device.has_service(u));
        by_device && by_service
    }
}

/// Builder for [`BluetoothPlugin`].
pub struct BluetoothPluginBuilder {
    config: BluetoothConfig,
    bus: Option<Arc<dyn EventBus>>,
    store: Option<Arc<dyn EntityStore>>,
    plugins: Option<PluginRegistry>,
    ble_backend: Option<Arc<dyn BleBackend>>,
    legacy_backend: Option<Arc<dyn LegacyBackend>>,
}

impl BluetoothPluginBuilder {
    /// Post events to an external bus instead of the bundled dispatcher.
    #[must_use]
    pub fn bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Some(plugins);
        self
    }

    #[must_use]
    pub fn ble_backend(mut self, backend: Arc<dyn BleBackend>) -> Self {
        self.ble_backend = Some(backend);
        self
    }

    #[must_use]
    pub fn legacy_backend(mut self, backend: Arc<dyn LegacyBackend>) -> Self {
        self.legacy_backend = Some(backend);
        self
    }

    /// Validate the configuration and assemble the managers.
    ///
    /// Without explicit backends, BLE uses btleplug and classic Bluetooth
    /// uses BlueZ on Linux. Without a store, entities are kept in memory.
    pub fn build(self) -> Result<BluetoothPlugin> {
        let config = self.config;
        config.check()?;

        let mut oui = OuiDirectory::builtin();
        if let Some(path) = &config.oui_file {
            let text = std::fs::read_to_string(path)?;
            let extra = OuiDirectory::parse(&text)?;
            debug!(path = %path.display(), entries = extra.len(), "Loaded OUI file");
            oui.extend(extra);
        }

        let (dispatcher, bus): (Option<EventDispatcher>, Arc<dyn EventBus>) = match self.bus {
            Some(bus) => (None, bus),
            None => {
                let dispatcher = EventDispatcher::new(config.event_capacity);
                (Some(dispatcher.clone()), Arc::new(dispatcher))
            }
        };
        let (coordination, queue) = Coordination::new(bus);
        let plugins = self.plugins.unwrap_or_else(PluginRegistry::with_defaults);
        let context = ManagerContext::new(coordination.clone(), config.clone())
            .with_plugins(plugins)
            .with_oui(oui);
        let stop_timeout = config.disconnect_timeout() + config.scan_duration();

        let ble = config.ble.enabled.then(|| {
            let backend = self
                .ble_backend
                .unwrap_or_else(|| Arc::new(BtleplugBackend::new(config.interface.clone())));
            Arc::new(BleManager::new(context.clone(), backend))
        });
        let legacy = config.legacy.enabled.then(|| {
            let backend = self
                .legacy_backend
                .unwrap_or_else(|| legacy::default_backend(config.interface.clone()));
            Arc::new(LegacyManager::new(context.clone(), backend))
        });

        let mut lifecycles = Vec::new();
        if let Some(ble) = &ble {
            lifecycles.push(Lifecycle::new(ble.clone(), stop_timeout));
        }
        if let Some(legacy) = &legacy {
            lifecycles.push(Lifecycle::new(legacy.clone(), stop_timeout));
        }

        Ok(BluetoothPlugin {
            coordination,
            context,
            dispatcher,
            store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            ble,
            legacy,
            lifecycles,
            queue: Mutex::new(Some(queue)),
            main: Mutex::new(None),
        })
    }
}

/// Owner of both managers and entry point for every Bluetooth action.
pub struct BluetoothPlugin {
    coordination: Coordination,
    context: ManagerContext,
    dispatcher: Option<EventDispatcher>,
    store: Arc<dyn EntityStore>,
    ble: Option<Arc<BleManager>>,
    legacy: Option<Arc<LegacyManager>>,
    lifecycles: Vec<Lifecycle>,
    /// Receiving end of the device queue while the persist loop is idle.
    queue: Mutex<Option<DeviceReceiver>>,
    main: Mutex<Option<(CancellationToken, JoinHandle<DeviceReceiver>)>>,
}

impl BluetoothPlugin {
    pub fn builder(config: BluetoothConfig) -> BluetoothPluginBuilder {
        BluetoothPluginBuilder {
            config,
            bus: None,
            store: None,
            plugins: None,
            ble_backend: None,
            legacy_backend: None,
        }
    }

    /// Subscribe to events. `None` when an external bus was supplied.
    pub fn subscribe(&self) -> Option<EventReceiver> {
        self.dispatcher.as_ref().map(EventDispatcher::subscribe)
    }

    pub fn config(&self) -> &BluetoothConfig {
        &self.context.config
    }

    pub fn coordination(&self) -> &Coordination {
        &self.coordination
    }

    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    pub fn ble(&self) -> Option<&Arc<BleManager>> {
        self.ble.as_ref()
    }

    pub fn legacy(&self) -> Option<&Arc<LegacyManager>> {
        self.legacy.as_ref()
    }

    fn manager(&self, kind: ManagerKind) -> Result<Arc<dyn BluetoothManager>> {
        let manager: Option<Arc<dyn BluetoothManager>> = match kind {
            ManagerKind::Ble => self.ble.clone().map(|m| m as Arc<dyn BluetoothManager>),
            ManagerKind::Legacy => self.legacy.clone().map(|m| m as Arc<dyn BluetoothManager>),
        };
        manager.ok_or_else(|| Error::unsupported(format!("the {kind} manager is disabled")))
    }

    fn legacy_manager(&self) -> Result<&Arc<LegacyManager>> {
        self.legacy
            .as_ref()
            .ok_or_else(|| Error::unsupported("the legacy manager is disabled"))
    }

    fn ble_manager(&self) -> Result<&Arc<BleManager>> {
        self.ble
            .as_ref()
            .ok_or_else(|| Error::unsupported("the BLE manager is disabled"))
    }

    /// What is currently known about `address`: the persisted row with the
    /// in-process record merged over it.
    async fn known(&self, address: &Address) -> Result<Option<BluetoothDevice>> {
        let row = self.store.get(address).await?;
        let cached = self.coordination.cache.get_by_address(address);
        Ok(match (row, cached) {
            (Some(mut row), Some(cached)) => {
                row.merge(cached);
                Some(row)
            }
            (row, cached) => row.or(cached),
        })
    }

    /// Find a device by address or name in the cache, then the store.
    pub async fn device(&self, key: &str) -> Result<Option<BluetoothDevice>> {
        if let Some(device) = self.coordination.cache.get(key) {
            return self.known(&device.address).await;
        }
        match self.store.find(key).await? {
            Some(row) => self.known(&row.address).await,
            None => Ok(None),
        }
    }

    /// Which manager handles a single-device action.
    ///
    /// Without a port or service UUID the device is assumed to be BLE.
    /// Otherwise the device's service matching the port/UUID decides; an
    /// unknown device is looked for with one discovery pass first. When no
    /// service matches, the UUID is taken as a GATT characteristic and BLE
    /// is used.
    pub async fn route_for(&self, device: &str, options: &ConnectOptions) -> Result<ManagerKind> {
        if options.port.is_none() && options.service_uuid.is_none() {
            return Ok(ManagerKind::Ble);
        }

        let mut known = self.device(device).await?;
        if known.is_none() {
            debug!(device, "Unknown device, scanning before routing");
            self.discover(self.context.config.scan_duration(), &[]).await?;
            known = self.device(device).await?;
        }

        let kind = known
            .as_ref()
            .and_then(|d| d.find_service(options.port, options.service_uuid.as_ref()))
            .map_or(ManagerKind::Ble, |service| {
                if service.is_ble {
                    ManagerKind::Ble
                } else {
                    ManagerKind::Legacy
                }
            });
        debug!(device, port = ?options.port, uuid = ?options.service_uuid, manager = %kind, "Routed");
        Ok(kind)
    }

    #[instrument(skip(self, options))]
    pub async fn connect(&self, device: &str, options: &ConnectOptions) -> Result<BluetoothDevice> {
        let kind = self.route_for(device, options).await?;
        self.manager(kind)?.connect(device, options).await
    }

    #[instrument(skip(self, options))]
    pub async fn disconnect(&self, device: &str, options: &ConnectOptions) -> Result<()> {
        let kind = self.route_for(device, options).await?;
        self.manager(kind)?.disconnect(device, options).await
    }

    pub async fn read(
        &self,
        device: &str,
        options: &ConnectOptions,
        size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let kind = self.route_for(device, options).await?;
        self.manager(kind)?.read(device, options, size).await
    }

    pub async fn write(&self, device: &str, data: &[u8], options: &ConnectOptions) -> Result<()> {
        let kind = self.route_for(device, options).await?;
        self.manager(kind)?.write(device, data, options).await
    }

    /// Run both managers' discovery concurrently for `total`, split evenly.
    /// Fails only when every enabled manager failed.
    async fn discover(&self, total: Duration, service_uuids: &[Uuid]) -> Result<Vec<Address>> {
        let enabled = u32::from(self.ble.is_some()) + u32::from(self.legacy.is_some());
        let share = total / enabled.max(1);

        let ble = async {
            match &self.ble {
                Some(manager) => Some(manager.scan(share, service_uuids).await),
                None => None,
            }
        };
        let legacy = async {
            match &self.legacy {
                Some(manager) => Some(manager.scan(share, service_uuids).await),
                None => None,
            }
        };
        let (ble, legacy) = tokio::join!(ble, legacy);

        let mut addresses = Vec::new();
        let mut succeeded = 0;
        let mut failure = None;
        for (kind, result) in [(ManagerKind::Ble, ble), (ManagerKind::Legacy, legacy)] {
            match result {
                Some(Ok(devices)) => {
                    succeeded += 1;
                    addresses.extend(devices.into_iter().map(|d| d.address));
                }
                Some(Err(e)) => {
                    warn!(manager = %kind, "Scan failed: {e}");
                    failure.get_or_insert(e);
                }
                None => {}
            }
        }
        match failure {
            Some(e) if succeeded == 0 => Err(e),
            _ => {
                addresses.sort();
                addresses.dedup();
                Ok(addresses)
            }
        }
    }

    /// Run a discovery pass and return the matching devices as known.
    #[instrument(skip(self, request), fields(duration = ?request.duration))]
    pub async fn scan(&self, request: ScanRequest) -> Result<Vec<BluetoothDevice>> {
        let total = request
            .duration
            .unwrap_or_else(|| self.context.config.scan_duration());
        let addresses = self.discover(total, &request.service_uuids).await?;

        let mut devices = Vec::with_capacity(addresses.len());
        for address in addresses {
            if let Some(device) = self.known(&address).await?
                && request.selects(&device)
            {
                devices.push(device);
            }
        }
        info!(found = devices.len(), "Scan finished");
        Ok(devices)
    }

    /// Currently known devices.
    ///
    /// While background discovery is enabled this never scans. When it is
    /// paused, a discovery pass runs first so the answer is not stale.
    pub async fn status(&self, devices: &[String]) -> Result<Vec<BluetoothDevice>> {
        if !self.coordination.scan_gate.is_enabled() {
            debug!("Discovery paused, scanning for status");
            self.discover(self.context.config.scan_duration(), &[]).await?;
        }

        let mut all: BTreeMap<Address, BluetoothDevice> = self
            .store
            .all()
            .await?
            .into_iter()
            .map(|d| (d.address, d))
            .collect();
        for (address, cached) in self.coordination.cache.items() {
            match all.get_mut(&address) {
                Some(row) => row.merge(cached),
                None => {
                    all.insert(address, cached);
                }
            }
        }

        Ok(all
            .into_values()
            .filter(|d| devices.is_empty() || devices.iter().any(|k| d.is_identified_by(k)))
            .collect())
    }

    /// Pause background discovery, resuming after `duration` if given.
    pub fn scan_pause(&self, duration: Option<Duration>) {
        self.coordination.scan_gate.pause(duration);
    }

    /// Resume background discovery, pausing again after `duration` if given.
    pub fn scan_resume(&self, duration: Option<Duration>) {
        self.coordination.scan_gate.resume(duration);
    }

    /// Actuate a device through the first capability plugin supporting it.
    #[instrument(skip(self, value))]
    pub async fn set(&self, device: &str, value: &Value) -> Result<BluetoothDevice> {
        let ble = self.ble_manager()?;
        let known = match self.device(device).await? {
            Some(known) => known,
            None => ble.resolve(device).await?,
        };
        let plugin = self.context.plugins.find_for(&known).ok_or_else(|| {
            Error::unsupported(format!("no plugin can control {}", known.address))
        })?;

        debug!(address = %known.address, plugin = plugin.name(), "Delegating set");
        let updated = plugin.set(ble.as_ref(), &known, value).await?;
        let merged = self.coordination.cache.add(updated);
        self.coordination.queue.push(merged.clone());
        Ok(merged)
    }

    /// Push a file to a device over OBEX Object Push.
    pub async fn send_file(&self, device: &str, path: &Path, options: &ConnectOptions) -> Result<()> {
        self.legacy_manager()?.send_file(device, path, options).await
    }

    /// Merge a batch of queued devices into the store and post
    /// `EntityUpdated` for each merged row.
    async fn persist(&self, batch: Vec<BluetoothDevice>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }
        let merged = self.store.merge(batch).await?;
        for device in &merged {
            self.coordination
                .post(BluetoothEvent::EntityUpdated { device: device.clone() });
        }
        Ok(merged.len())
    }

    /// Persist everything queued so far. Only drains while the background
    /// loop is not running (it owns the queue otherwise).
    pub async fn flush(&self) -> Result<usize> {
        let taken = self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(mut queue) = taken else {
            return Ok(0);
        };
        let mut batch = Vec::new();
        while let Ok(device) = queue.try_recv() {
            batch.push(device);
        }
        *self.queue.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue);
        self.persist(batch).await
    }

    /// Load persisted devices into the cache. Reachability and connection
    /// state are cleared; they only describe the previous session.
    async fn warm_cache(&self) -> Result<usize> {
        let rows = self.store.all().await?;
        let count = rows.len();
        for mut row in rows {
            row.reachable = None;
            row.connected = None;
            self.coordination.cache.add(row);
        }
        Ok(count)
    }

    /// Warm the cache, start both managers and the persist loop.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let taken = self.queue.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(queue) = taken else {
            debug!("Already running");
            return Ok(());
        };

        match self.warm_cache().await {
            Ok(count) => info!(devices = count, "Cache warmed from store"),
            Err(e) => warn!("Could not load persisted devices: {e}"),
        }
        for lifecycle in &self.lifecycles {
            lifecycle.start();
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn(persist_loop(Arc::downgrade(self), queue, cancel.clone()));
        *self.main.lock().unwrap_or_else(PoisonError::into_inner) = Some((cancel, task));
        info!("Bluetooth plugin started");
        Ok(())
    }

    /// True once the plugin is not running (or a stop was requested).
    pub fn should_stop(&self) -> bool {
        self.main
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|(cancel, task)| cancel.is_cancelled() || task.is_finished())
    }

    /// Stop both managers (closing their connections), stop the persist
    /// loop and persist whatever is still queued.
    pub async fn stop(&self) {
        for lifecycle in &self.lifecycles {
            lifecycle.stop().await;
        }

        let running = self.main.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((cancel, mut task)) = running {
            cancel.cancel();
            match tokio::time::timeout(self.context.config.disconnect_timeout(), &mut task).await {
                Ok(Ok(queue)) => {
                    *self.queue.lock().unwrap_or_else(PoisonError::into_inner) = Some(queue);
                }
                Ok(Err(e)) => warn!("Persist loop failed: {e}"),
                Err(_) => {
                    warn!("Persist loop did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        if let Err(e) = self.flush().await {
            warn!("Could not persist pending devices: {e}");
        }
        info!("Bluetooth plugin stopped");
    }

    /// Start, wait for `shutdown`, then stop.
    pub async fn run(self: &Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        self.start().await?;
        shutdown.cancelled().await;
        self.stop().await;
        Ok(())
    }
}

/// Drain the device queue into the store until cancelled. Returns the
/// queue so the plugin can be restarted.
async fn persist_loop(
    plugin: std::sync::Weak<BluetoothPlugin>,
    mut queue: DeviceReceiver,
    cancel: CancellationToken,
) -> DeviceReceiver {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => break,
            device = queue.recv() => match device {
                Some(device) => device,
                None => break,
            },
        };
        let mut batch = vec![first];
        while batch.len() < PERSIST_BATCH {
            match queue.try_recv() {
                Ok(device) => batch.push(device),
                Err(_) => break,
            }
        }

        let Some(plugin) = plugin.upgrade() else {
            break;
        };
        let size = batch.len();
        match plugin.persist(batch).await {
            Ok(n) => debug!(devices = n, "Persisted devices"),
            Err(e) => warn!(devices = size, "Could not persist devices: {e}"),
        }
    }
    queue
}
