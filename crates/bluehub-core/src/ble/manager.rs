//! BLE discovery and GATT connection management.
//!
//! Every GATT session is owned by a dedicated session task: the task opens
//! the session, hands it to the caller through a oneshot, then parks until
//! it is told to close (or the caller goes away) and disconnects the
//! session itself. Opening and closing therefore always happen on the same
//! task, and a caller that gives up waiting never leaks a session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluehub_types::{Address, BluetoothDevice};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backend::{Advertisement, BleBackend, GattSession};
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::events::{BluetoothEvent, EventKind, Link};
use crate::manager::{BluetoothManager, ConnectOptions, ManagerContext, ManagerKind, pause_or_cancel};
use crate::plugins::GattAccess;

/// A live session and the handles of the task that owns it.
struct BleConnection {
    session: Arc<dyn GattSession>,
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

pub struct BleManager {
    context: ManagerContext,
    backend: Arc<dyn BleBackend>,
    connections: Mutex<HashMap<Address, BleConnection>>,
    device_locks: Mutex<HashMap<Address, Arc<tokio::sync::Mutex<()>>>>,
}

impl BleManager {
    pub fn new(context: ManagerContext, backend: Arc<dyn BleBackend>) -> Self {
        Self {
            context,
            backend,
            connections: Mutex::new(HashMap::new()),
            device_locks: Mutex::new(HashMap::new()),
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<Address, BleConnection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_lock(&self, address: Address) -> Arc<tokio::sync::Mutex<()>> {
        self.device_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(address)
            .or_default()
            .clone()
    }

    /// Whether this manager holds a session for `address`.
    pub fn is_connected(&self, address: &Address) -> bool {
        self.connections().contains_key(address)
    }

    /// Live session for `address`, if any.
    async fn live_session(&self, address: Address) -> Option<Arc<dyn GattSession>> {
        let session = self.connections().get(&address).map(|c| c.session.clone())?;
        if session.is_connected().await {
            Some(session)
        } else {
            None
        }
    }

    /// Spawn a session task and wait for it to report the open session.
    async fn open_session(&self, address: Address, timeout: Duration) -> Result<BleConnection> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<Arc<dyn GattSession>>>();
        let (close_tx, close_rx) = oneshot::channel::<()>();
        let backend = Arc::clone(&self.backend);

        let task = tokio::spawn(async move {
            let session = match backend.connect(address, timeout).await {
                Ok(session) => session,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(session.clone())).is_ok() {
                // Closed explicitly, or the sender was dropped with the manager.
                let _ = close_rx.await;
            } else {
                debug!(%address, "Caller gave up before the session opened");
            }
            if let Err(e) = session.disconnect().await {
                warn!(%address, "Error while closing GATT session: {e}");
            }
        });

        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(session))) => Ok(BleConnection {
                session,
                close: close_tx,
                task,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::connection_failed(
                address.to_string(),
                ConnectionFailureReason::TaskAborted,
            )),
            Err(_) => Err(Error::timeout(format!("connect {address}"), timeout)),
        }
    }

    /// Signal a connection's task to close and wait for it (bounded).
    async fn close_connection(&self, address: Address, connection: BleConnection) {
        let BleConnection { close, mut task, .. } = connection;
        let _ = close.send(());
        let limit = self.context.config.disconnect_timeout();
        if tokio::time::timeout(limit, &mut task).await.is_err() {
            warn!(%address, "Session task did not exit in time, aborting");
            task.abort();
        }
    }

    /// Session to use for a one-off operation; the flag is `true` when the
    /// session is temporary and must be disconnected afterwards.
    ///
    /// Callers hold the device lock until a temporary session is closed.
    async fn session_for(
        &self,
        address: Address,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn GattSession>, bool)> {
        if let Some(session) = self.live_session(address).await {
            return Ok((session, false));
        }
        let timeout = self.context.connect_timeout(options);
        let session = self.backend.connect(address, timeout).await?;
        Ok((session, true))
    }

    fn characteristic(options: &ConnectOptions, device: &str) -> Result<Uuid> {
        options.service_uuid.ok_or_else(|| {
            Error::invalid_config(format!(
                "a characteristic UUID is required for BLE I/O on {device}"
            ))
        })
    }

    fn connection_failed(&self, address: Address, options: &ConnectOptions, err: &Error) {
        self.context.coordination.post(BluetoothEvent::ConnectionFailed {
            address,
            port: options.port,
            service_uuid: options.service_uuid,
            reason: err.to_string(),
        });
    }

    /// Record `address` as connected or disconnected through the
    /// coordination choke point.
    fn notify_link(&self, address: Address, connected: bool, link: Link) -> BluetoothDevice {
        let mut update = self
            .context
            .coordination
            .cache
            .get_by_address(&address)
            .unwrap_or_else(|| BluetoothDevice::new(address));
        update.connected = Some(connected);
        update.supports_ble = true;
        let kind = if connected {
            EventKind::Connected
        } else {
            EventKind::Disconnected
        };
        self.context.coordination.notify(kind, update, link)
    }

    /// Mark a device that dropped out of the scan results as lost.
    fn mark_lost(&self, address: Address) {
        let cache = &self.context.coordination.cache;
        let Some(known) = cache.get_by_address(&address) else {
            return;
        };
        if known.reachable != Some(true) {
            return;
        }

        if known.connected == Some(true) {
            let mut update = known.clone();
            update.connected = Some(false);
            self.context
                .coordination
                .notify(EventKind::Disconnected, update, Link::default());
        }
        let mut update = known;
        update.reachable = Some(false);
        update.connected = Some(false);
        info!(%address, name = ?update.name, "BLE device lost");
        self.context
            .coordination
            .notify(EventKind::Lost, update, Link::default());
    }

    fn handle_advertisement(&self, adv: Advertisement, seen: &Mutex<HashSet<Address>>) {
        if adv.address.is_zero() {
            return;
        }
        let address = adv.address;
        let mut candidate = adv.into_device();
        if self.context.is_blacklisted(&candidate) {
            return;
        }
        let known = self.context.coordination.cache.get_by_address(&address);
        self.context.plugins.enrich(&mut candidate, known.as_ref());
        self.context.handler.handle(candidate);
        seen.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address);
    }
}

#[async_trait]
impl BluetoothManager for BleManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Ble
    }

    fn context(&self) -> &ManagerContext {
        &self.context
    }

    #[instrument(skip(self, options), fields(manager = "ble"))]
    async fn connect(&self, device: &str, options: &ConnectOptions) -> Result<BluetoothDevice> {
        let known = self.resolve(device).await?;
        let address = known.address;
        let lock = self.device_lock(address);
        let _guard = lock.lock().await;

        if self.live_session(address).await.is_some() {
            debug!(%address, "Reusing open GATT session");
            return Ok(self
                .context
                .coordination
                .cache
                .get_by_address(&address)
                .unwrap_or(known));
        }
        let stale = self.connections().remove(&address);
        if let Some(stale) = stale {
            self.close_connection(address, stale).await;
        }

        let timeout = self.context.connect_timeout(options);
        match self.open_session(address, timeout).await {
            Ok(connection) => {
                self.connections().insert(address, connection);
                info!(%address, "BLE device connected");
                Ok(self.notify_link(address, true, options.link()))
            }
            Err(e) => {
                warn!(%address, "BLE connect failed: {e}");
                self.connection_failed(address, options, &e);
                Err(e)
            }
        }
    }

    #[instrument(skip(self, options), fields(manager = "ble"))]
    async fn disconnect(&self, device: &str, options: &ConnectOptions) -> Result<()> {
        let address = self.address_of(device).await?;
        let lock = self.device_lock(address);
        let _guard = lock.lock().await;

        let connection = self.connections().remove(&address);
        match connection {
            Some(connection) => self.close_connection(address, connection).await,
            None => {
                debug!(%address, "No local GATT session, asking the system bus");
                let interface = options
                    .interface
                    .as_deref()
                    .or(self.context.config.interface.as_deref());
                self.backend.force_disconnect(address, interface).await?;
            }
        }
        info!(%address, "BLE device disconnected");
        self.notify_link(address, false, options.link());
        Ok(())
    }

    #[instrument(skip(self, service_uuids), fields(manager = "ble"))]
    async fn scan(&self, duration: Duration, service_uuids: &[Uuid]) -> Result<Vec<BluetoothDevice>> {
        let _scan = self.context.coordination.scan_lock.lock().await;
        let seen = Mutex::new(HashSet::new());

        self.backend
            .scan(duration, service_uuids, &|adv| {
                self.handle_advertisement(adv, &seen)
            })
            .await?;

        let seen = seen.into_inner().unwrap_or_else(PoisonError::into_inner);
        let cache = &self.context.coordination.cache;
        let mut devices: Vec<BluetoothDevice> = seen
            .iter()
            .filter_map(|address| cache.get_by_address(address))
            .filter(|d| d.reachable == Some(true))
            .collect();
        devices.sort_by_key(|d| d.address);
        debug!(found = devices.len(), "BLE scan finished");
        Ok(devices)
    }

    async fn read(
        &self,
        device: &str,
        options: &ConnectOptions,
        size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let characteristic = Self::characteristic(options, device)?;
        let address = self.address_of(device).await?;
        let lock = self.device_lock(address);
        let _guard = lock.lock().await;
        let (session, temporary) = self.session_for(address, options).await?;

        let result = session.read(characteristic).await;
        if temporary && let Err(e) = session.disconnect().await {
            debug!(%address, "Error closing temporary session: {e}");
        }
        let mut data = result?;
        if let Some(size) = size {
            data.truncate(size);
        }
        Ok(data)
    }

    async fn write(&self, device: &str, data: &[u8], options: &ConnectOptions) -> Result<()> {
        let characteristic = Self::characteristic(options, device)?;
        let address = self.address_of(device).await?;
        let lock = self.device_lock(address);
        let _guard = lock.lock().await;
        let (session, temporary) = self.session_for(address, options).await?;

        let result = session.write(characteristic, data).await;
        if temporary && let Err(e) = session.disconnect().await {
            debug!(%address, "Error closing temporary session: {e}");
        }
        result
    }

    async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        let gate = Arc::clone(&self.context.coordination.scan_gate);
        let mut previous: HashSet<Address> = HashSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = gate.wait_enabled() => {}
            }

            match self.scan(self.context.config.scan_duration(), &[]).await {
                Ok(devices) => {
                    let current: HashSet<Address> = devices.iter().map(|d| d.address).collect();
                    for address in previous.difference(&current) {
                        if self.context.is_tracked(address) || self.is_connected(address) {
                            continue;
                        }
                        self.mark_lost(*address);
                    }
                    previous = current;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("BLE scan failed: {e}"),
            }

            if !pause_or_cancel(&cancel, self.context.config.poll_interval()).await {
                break;
            }
        }
        Ok(())
    }

    async fn close_all(&self) {
        let connections: Vec<(Address, BleConnection)> = self.connections().drain().collect();
        for (address, connection) in connections {
            self.close_connection(address, connection).await;
            self.notify_link(address, false, Link::default());
        }
    }
}

#[async_trait]
impl GattAccess for BleManager {
    async fn read_characteristic(&self, device: &str, characteristic: Uuid) -> Result<Vec<u8>> {
        let options = ConnectOptions::new().service_uuid(characteristic);
        self.read(device, &options, None).await
    }

    async fn write_characteristic(
        &self,
        device: &str,
        characteristic: Uuid,
        data: &[u8],
    ) -> Result<()> {
        let options = ConnectOptions::new().service_uuid(characteristic);
        self.write(device, data, &options).await
    }
}
