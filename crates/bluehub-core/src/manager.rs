//! The contract shared by the BLE and classic managers.
//!
//! Both managers are driven the same way: the façade calls the action
//! methods of [`BluetoothManager`] directly, while a [`Lifecycle`] owns the
//! background `listen` loop. Everything the two managers share lives in
//! the [`ManagerContext`] built once by the façade.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluehub_types::{Address, BluetoothDevice, OuiDirectory};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::blacklist::DevicesBlacklist;
use crate::config::BluetoothConfig;
use crate::coordination::Coordination;
use crate::error::{Error, Result};
use crate::event_handler::EventHandler;
use crate::events::Link;
use crate::plugins::PluginRegistry;

/// Which manager owns a device or service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagerKind {
    Ble,
    Legacy,
}

impl fmt::Display for ManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ble => f.write_str("BLE"),
            Self::Legacy => f.write_str("legacy"),
        }
    }
}

/// Target selection and limits for connect / disconnect / read / write.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use bluehub_core::ConnectOptions;
///
/// let options = ConnectOptions::new()
///     .port(3)
///     .timeout(Duration::from_secs(5));
/// assert_eq!(options.port, Some(3));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// RFCOMM channel or L2CAP PSM of a classic service.
    pub port: Option<u16>,
    /// Service UUID (classic) or characteristic UUID (BLE).
    pub service_uuid: Option<Uuid>,
    /// Adapter override, e.g. `hci1`.
    pub interface: Option<String>,
    /// Overrides the configured connect timeout.
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = Some(uuid);
        self
    }

    #[must_use]
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The port/UUID pair carried on connection events.
    pub fn link(&self) -> Link {
        Link {
            port: self.port,
            service_uuid: self.service_uuid,
        }
    }
}

/// Shared dependencies injected into both managers.
#[derive(Clone)]
pub struct ManagerContext {
    pub coordination: Coordination,
    pub handler: Arc<EventHandler>,
    pub blacklist: Arc<DevicesBlacklist>,
    pub plugins: Arc<PluginRegistry>,
    pub config: Arc<BluetoothConfig>,
    pub oui: Arc<OuiDirectory>,
}

impl ManagerContext {
    /// Build a context with the bundled plugins and the built-in OUI table.
    pub fn new(coordination: Coordination, config: BluetoothConfig) -> Self {
        let handler = EventHandler::new(coordination.clone(), config.signal_update_interval());
        Self {
            handler: Arc::new(handler),
            blacklist: Arc::new(DevicesBlacklist::from_config(&config.blacklist)),
            plugins: Arc::new(PluginRegistry::with_defaults()),
            oui: Arc::new(OuiDirectory::builtin()),
            config: Arc::new(config),
            coordination,
        }
    }

    #[must_use]
    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    #[must_use]
    pub fn with_oui(mut self, oui: OuiDirectory) -> Self {
        self.oui = Arc::new(oui);
        self
    }

    /// Devices in the always-tracked set are never reported lost.
    pub fn is_tracked(&self, address: &Address) -> bool {
        self.config
            .tracked_devices
            .iter()
            .filter_map(|s| Address::try_parse(s))
            .any(|a| a == *address)
    }

    /// Effective connect timeout for a request.
    pub fn connect_timeout(&self, options: &ConnectOptions) -> Duration {
        options.timeout.unwrap_or_else(|| self.config.connect_timeout())
    }

    /// Is `device` excluded, judging both the fresh observation and what
    /// the cache already knows about it?
    pub fn is_blacklisted(&self, device: &BluetoothDevice) -> bool {
        if self.blacklist.is_empty() {
            return false;
        }
        self.blacklist.matches(device)
            || self
                .coordination
                .cache
                .get_by_address(&device.address)
                .is_some_and(|known| self.blacklist.matches(&known))
    }
}

/// Operations every discovery/connection engine provides.
///
/// All action methods fail with an [`Error`]; none of them return sentinel
/// values. Device arguments are an address or an exact device name.
#[async_trait]
pub trait BluetoothManager: Send + Sync {
    fn kind(&self) -> ManagerKind;

    fn context(&self) -> &ManagerContext;

    async fn connect(&self, device: &str, options: &ConnectOptions) -> Result<BluetoothDevice>;

    async fn disconnect(&self, device: &str, options: &ConnectOptions) -> Result<()>;

    /// Run one discovery pass and return the devices seen in it.
    async fn scan(&self, duration: Duration, service_uuids: &[Uuid]) -> Result<Vec<BluetoothDevice>>;

    async fn read(
        &self,
        device: &str,
        options: &ConnectOptions,
        size: Option<usize>,
    ) -> Result<Vec<u8>>;

    async fn write(&self, device: &str, data: &[u8], options: &ConnectOptions) -> Result<()>;

    /// Background discovery loop; returns when `cancel` fires.
    async fn listen(&self, cancel: CancellationToken) -> Result<()>;

    /// Close every connection this manager owns. Failures are logged.
    async fn close_all(&self);

    /// Find a device by address or name, scanning once if it is unknown.
    async fn resolve(&self, key: &str) -> Result<BluetoothDevice> {
        let cache = &self.context().coordination.cache;
        if let Some(device) = cache.get(key) {
            return Ok(device);
        }

        debug!(key, manager = %self.kind(), "Device not cached, scanning");
        let duration = self.context().config.scan_duration();
        if let Err(e) = self.scan(duration, &[]).await {
            warn!(key, "Scan while resolving device failed: {e}");
        }
        cache.get(key).ok_or_else(|| Error::device_not_found(key))
    }

    /// Address for `key`: cached device, literal address, or a scan.
    async fn address_of(&self, key: &str) -> Result<Address> {
        if let Some(device) = self.context().coordination.cache.get(key) {
            return Ok(device.address);
        }
        if let Some(address) = Address::try_parse(key) {
            return Ok(address);
        }
        Ok(self.resolve(key).await?.address)
    }
}

/// Start/stop control for a manager's background loop.
pub struct Lifecycle {
    manager: Arc<dyn BluetoothManager>,
    stop_timeout: Duration,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl Lifecycle {
    pub fn new(manager: Arc<dyn BluetoothManager>, stop_timeout: Duration) -> Self {
        Self {
            manager,
            stop_timeout,
            running: Mutex::new(None),
        }
    }

    pub fn manager(&self) -> &Arc<dyn BluetoothManager> {
        &self.manager
    }

    /// Spawn the `listen` loop. A no-op if it is already running.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let manager = Arc::clone(&self.manager);
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let kind = manager.kind();
            info!(manager = %kind, "Manager started");
            if let Err(e) = manager.listen(token).await {
                error!(manager = %kind, "Manager loop exited: {e}");
            }
        });
        *running = Some((cancel, task));
    }

    /// True once a stop was requested or the loop is not running.
    pub fn should_stop(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|(cancel, task)| cancel.is_cancelled() || task.is_finished())
    }

    /// Cancel the loop, close all connections, then wait (bounded) for the
    /// loop to exit.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let kind = self.manager.kind();

        let Some((cancel, mut task)) = running else {
            self.manager.close_all().await;
            return;
        };
        cancel.cancel();
        self.manager.close_all().await;

        if tokio::time::timeout(self.stop_timeout, &mut task).await.is_err() {
            warn!(manager = %kind, "Manager loop did not stop in time, aborting");
            task.abort();
        }
        info!(manager = %kind, "Manager stopped");
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some((cancel, task)) = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            cancel.cancel();
            task.abort();
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns `false` when
/// cancelled.
pub(crate) async fn pause_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct IdleManager {
        context: ManagerContext,
        closed: AtomicUsize,
        scans: AtomicUsize,
    }

    impl IdleManager {
        fn new() -> Self {
            let (coordination, _rx) = Coordination::new(Arc::new(EventDispatcher::default()));
            Self {
                context: ManagerContext::new(coordination, BluetoothConfig::default()),
                closed: AtomicUsize::new(0),
                scans: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BluetoothManager for IdleManager {
        fn kind(&self) -> ManagerKind {
            ManagerKind::Ble
        }

        fn context(&self) -> &ManagerContext {
            &self.context
        }

        async fn connect(&self, device: &str, _: &ConnectOptions) -> Result<BluetoothDevice> {
            self.resolve(device).await
        }

        async fn disconnect(&self, _: &str, _: &ConnectOptions) -> Result<()> {
            Ok(())
        }

        async fn scan(&self, _: Duration, _: &[Uuid]) -> Result<Vec<BluetoothDevice>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            let device = BluetoothDevice::new("11:22:33:44:55:66".parse()?).with_name("Late");
            self.context.coordination.cache.add(device.clone());
            Ok(vec![device])
        }

        async fn read(&self, _: &str, _: &ConnectOptions, _: Option<usize>) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn write(&self, _: &str, _: &[u8], _: &ConnectOptions) -> Result<()> {
            Ok(())
        }

        async fn listen(&self, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Ok(())
        }

        async fn close_all(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_connect_options_builder() {
        let uuid = Uuid::nil();
        let options = ConnectOptions::new()
            .port(5)
            .service_uuid(uuid)
            .interface("hci1");
        assert_eq!(
            options.link(),
            Link {
                port: Some(5),
                service_uuid: Some(uuid)
            }
        );
        assert_eq!(options.interface.as_deref(), Some("hci1"));
    }

    #[tokio::test]
    async fn test_resolve_scans_once_for_unknown_device() {
        let manager = IdleManager::new();
        let device = manager.resolve("Late").await.unwrap();
        assert_eq!(device.address.to_string(), "11:22:33:44:55:66");
        assert_eq!(manager.scans.load(Ordering::SeqCst), 1);

        manager.resolve("11:22:33:44:55:66").await.unwrap();
        assert_eq!(manager.scans.load(Ordering::SeqCst), 1);

        let err = manager.resolve("Nobody").await.unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound(_)));
        assert_eq!(manager.scans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_start_stop() {
        let manager = Arc::new(IdleManager::new());
        let lifecycle = Lifecycle::new(manager.clone(), Duration::from_secs(1));
        assert!(lifecycle.should_stop());

        lifecycle.start();
        assert!(!lifecycle.should_stop());

        lifecycle.stop().await;
        assert!(lifecycle.should_stop());
        assert_eq!(manager.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tracked_devices() {
        let (coordination, _rx) = Coordination::new(Arc::new(EventDispatcher::default()));
        let config = BluetoothConfig {
            tracked_devices: vec!["aa:bb:cc:dd:ee:ff".into()],
            ..BluetoothConfig::default()
        };
        let context = ManagerContext::new(coordination, config);
        assert!(context.is_tracked(&"AA:BB:CC:DD:EE:FF".parse().unwrap()));
        assert!(!context.is_tracked(&"11:22:33:44:55:66".parse().unwrap()));
    }
}
