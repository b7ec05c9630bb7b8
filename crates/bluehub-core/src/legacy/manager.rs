//! Classic (BR/EDR) discovery, SDP lookups and RFCOMM/L2CAP connections.
//!
//! A connection is identified by its [`ConnectionKey`] (address plus the
//! service's port and UUID). Each connection is owned by a task that opens
//! the stream, hands a shared handle back to the caller and shuts the
//! stream down once its stop token fires.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluehub_types::{
    Address, BluetoothDevice, BluetoothService, ChildEntity, DeviceClass, Protocol,
};
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::backend::{LegacyBackend, LegacyDiscovery, LegacyStream, ServiceRecord, StreamTarget};
use crate::config::ServiceDiscoveryRetry;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::events::{BluetoothEvent, EventKind, Link};
use crate::manager::{BluetoothManager, ConnectOptions, ManagerContext, ManagerKind, pause_or_cancel};
use crate::obex::ObexClient;

/// Read buffer used when the caller gives no size.
const DEFAULT_READ_SIZE: usize = 1024;

type SharedStream = Arc<tokio::sync::Mutex<Box<dyn LegacyStream>>>;

/// Identity of a classic connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub address: Address,
    pub port: Option<u16>,
    pub uuid: Option<Uuid>,
}

impl ConnectionKey {
    fn of(service: &BluetoothService) -> Self {
        Self {
            address: service.address,
            port: service.port,
            uuid: service.uuid,
        }
    }

    fn link(&self) -> Link {
        Link {
            port: self.port,
            service_uuid: self.uuid,
        }
    }

    /// Does this key belong to `address` and match the optional filters?
    fn selected_by(&self, address: Address, port: Option<u16>, uuid: Option<Uuid>) -> bool {
        self.address == address
            && port.is_none_or(|p| self.port == Some(p))
            && uuid.is_none_or(|u| self.uuid == Some(u))
    }
}

struct LegacyConnection {
    service: BluetoothService,
    stream: SharedStream,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl LegacyConnection {
    fn is_alive(&self) -> bool {
        !self.stop.is_cancelled() && !self.task.is_finished()
    }
}

pub struct LegacyManager {
    context: ManagerContext,
    backend: Arc<dyn LegacyBackend>,
    connections: Mutex<HashMap<ConnectionKey, LegacyConnection>>,
    key_locks: Mutex<HashMap<ConnectionKey, Arc<tokio::sync::Mutex<()>>>>,
    /// Devices whose services need no further lookup.
    scanned: Mutex<HashSet<Address>>,
}

impl LegacyManager {
    pub fn new(context: ManagerContext, backend: Arc<dyn LegacyBackend>) -> Self {
        Self {
            context,
            backend,
            connections: Mutex::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            scanned: Mutex::new(HashSet::new()),
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<ConnectionKey, LegacyConnection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scanned(&self) -> MutexGuard<'_, HashSet<Address>> {
        self.scanned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_lock(&self, key: ConnectionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .clone()
    }

    /// Whether any live connection to `address` exists.
    pub fn is_connected(&self, address: &Address) -> bool {
        self.connections()
            .iter()
            .any(|(key, conn)| key.address == *address && conn.is_alive())
    }

    /// Keys of the connections currently held, in no particular order.
    pub fn connection_keys(&self) -> Vec<ConnectionKey> {
        self.connections().keys().copied().collect()
    }

    /// The classic service of `device` selected by `options`.
    ///
    /// A port that matches no known service is taken as an RFCOMM channel.
    fn service_for(device: &BluetoothDevice, options: &ConnectOptions) -> Result<BluetoothService> {
        let (port, uuid) = (options.port, options.service_uuid);
        if let Some(service) = device
            .services()
            .find(|s| !s.is_ble && s.matches(port, uuid.as_ref()))
        {
            return Ok(service.clone());
        }
        match port {
            Some(port) => {
                debug!(address = %device.address, port, "No known service on port, assuming RFCOMM");
                Ok(BluetoothService::legacy(
                    device.address,
                    Protocol::Rfcomm,
                    Some(port),
                    uuid,
                ))
            }
            None => Err(Error::service_not_found(device.address.to_string(), port, uuid)),
        }
    }

    fn live_stream(&self, key: &ConnectionKey) -> Option<SharedStream> {
        self.connections()
            .get(key)
            .filter(|c| c.is_alive())
            .map(|c| c.stream.clone())
    }

    /// A live connection to `address` selected by `options`, if any.
    fn find_live(
        &self,
        address: Address,
        options: &ConnectOptions,
    ) -> Option<(ConnectionKey, SharedStream, CancellationToken)> {
        self.connections()
            .iter()
            .filter(|(key, conn)| {
                key.selected_by(address, options.port, options.service_uuid) && conn.is_alive()
            })
            .map(|(key, conn)| (*key, conn.stream.clone(), conn.stop.clone()))
            .next()
    }

    /// Spawn a connection task and wait for the stream it opens.
    async fn open_connection(
        &self,
        service: BluetoothService,
        timeout: Duration,
    ) -> Result<LegacyConnection> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<SharedStream>>();
        let stop = CancellationToken::new();
        let target = StreamTarget::for_service(&service);
        let backend = Arc::clone(&self.backend);
        let token = stop.clone();

        let mut task = tokio::spawn(async move {
            let stream = match backend.open(&target).await {
                Ok(stream) => Arc::new(tokio::sync::Mutex::new(stream)),
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            if ready_tx.send(Ok(stream.clone())).is_ok() {
                token.cancelled().await;
            }
            let mut stream = stream.lock().await;
            if let Err(e) = stream.shutdown().await {
                debug!(address = %target.address, "Error while closing stream: {e}");
            }
        });

        match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(stream))) => Ok(LegacyConnection {
                service,
                stream,
                stop,
                task,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(Error::connection_failed(
                service.address.to_string(),
                ConnectionFailureReason::TaskAborted,
            )),
            Err(_) => {
                task.abort();
                let _ = (&mut task).await;
                Err(Error::timeout(
                    format!("connect {} port={:?}", service.address, service.port),
                    timeout,
                ))
            }
        }
    }

    async fn close_connection(&self, key: ConnectionKey, connection: LegacyConnection) {
        let LegacyConnection { stop, mut task, .. } = connection;
        stop.cancel();
        let limit = self.context.config.disconnect_timeout();
        if tokio::time::timeout(limit, &mut task).await.is_err() {
            warn!(address = %key.address, port = ?key.port, "Connection task did not exit in time, aborting");
            task.abort();
        }
    }

    /// Forget a connection the peer closed and report it as disconnected.
    async fn drop_connection(&self, key: ConnectionKey) {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        let connection = {
            let mut connections = self.connections();
            // A reconnect may already have replaced the closed stream.
            let closed = connections.get(&key).is_some_and(|c| c.stop.is_cancelled());
            if closed { connections.remove(&key) } else { None }
        };
        let Some(connection) = connection else {
            return;
        };
        let service = connection.service.clone();
        self.close_connection(key, connection).await;
        info!(address = %key.address, port = ?key.port, "Classic connection closed by peer");
        self.notify_link(key, &service, false);
    }

    /// Record a connection state change of one service.
    fn notify_link(&self, key: ConnectionKey, service: &BluetoothService, connected: bool) -> BluetoothDevice {
        let cache = &self.context.coordination.cache;
        let mut update = cache
            .get_by_address(&key.address)
            .unwrap_or_else(|| BluetoothDevice::new(key.address));
        update.supports_legacy = true;
        update.connected = Some(connected || self.is_connected(&key.address));

        let mut service = service.clone();
        service.connected = connected;
        update.add_child(ChildEntity::Service(service));

        let kind = if connected {
            EventKind::Connected
        } else {
            EventKind::Disconnected
        };
        self.context.coordination.notify(kind, update, key.link())
    }

    /// Live stream for I/O, connecting first when needed.
    async fn stream_for(
        &self,
        device: &str,
        options: &ConnectOptions,
    ) -> Result<(ConnectionKey, SharedStream, CancellationToken)> {
        let address = self.address_of(device).await?;
        if let Some(found) = self.find_live(address, options) {
            return Ok(found);
        }
        self.connect(device, options).await?;
        self.find_live(address, options)
            .ok_or_else(|| Error::NotConnected(device.to_string()))
    }

    fn io_timeout(&self, options: &ConnectOptions) -> Duration {
        self.context.connect_timeout(options)
    }

    /// Build a candidate from an inquiry result.
    fn candidate(&self, found: &LegacyDiscovery) -> BluetoothDevice {
        let mut device = BluetoothDevice::new(found.address);
        device.name = found.name.clone();
        device.rssi = found.rssi;
        device.supports_legacy = true;
        device.reachable = Some(true);
        device.manufacturer = self.context.oui.lookup(&found.address).map(str::to_string);
        if let Some(raw) = found.class {
            device.set_class(DeviceClass::decode(raw));
        }
        device
    }

    /// Does `address` still need an SDP lookup?
    fn needs_lookup(&self, address: &Address) -> bool {
        if self.scanned().contains(address) {
            return false;
        }
        !self
            .context
            .coordination
            .cache
            .get_by_address(address)
            .is_some_and(|d| d.services().any(|s| !s.is_ble))
    }

    /// SDP lookups for `pending`, bounded in concurrency and overall time.
    /// Lookups that fail or do not finish in time are logged and omitted.
    async fn lookup_services(&self, pending: Vec<Address>) -> HashMap<Address, Vec<ServiceRecord>> {
        let legacy = &self.context.config.legacy;
        if legacy.service_discovery_retry == ServiceDiscoveryRetry::Once {
            self.scanned().extend(pending.iter().copied());
        }

        let workers = legacy.service_discovery_workers.max(1);
        let backend = &self.backend;
        let mut lookups = futures::stream::iter(pending.iter().copied())
            .map(|address| async move { (address, backend.find_services(address).await) })
            .buffer_unordered(workers);

        let deadline = tokio::time::Instant::now() + self.context.config.service_discovery_timeout();
        let mut found = HashMap::new();
        loop {
            match tokio::time::timeout_at(deadline, lookups.next()).await {
                Ok(Some((address, Ok(records)))) => {
                    debug!(%address, services = records.len(), "Service lookup finished");
                    self.scanned().insert(address);
                    found.insert(address, records);
                }
                Ok(Some((address, Err(e)))) => {
                    warn!(%address, "Service lookup failed: {e}");
                }
                Ok(None) => break,
                Err(_) => {
                    let missing = pending.iter().filter(|a| !found.contains_key(a)).count();
                    warn!(missing, "Service discovery timed out, omitting pending devices");
                    break;
                }
            }
        }
        found
    }

    /// Send a file over OBEX Object Push on an already resolved service.
    async fn push_file(
        &self,
        service: &BluetoothService,
        name: &str,
        data: &[u8],
        open_timeout: Duration,
    ) -> Result<()> {
        let target = StreamTarget::for_service(service);
        let stream = tokio::time::timeout(open_timeout, self.backend.open(&target))
            .await
            .map_err(|_| Error::timeout(format!("OBEX connect {}", service.address), open_timeout))??;

        let mut client = ObexClient::new(stream);
        client.connect().await?;
        client.put(name, None, data).await?;
        if let Err(e) = client.disconnect().await {
            debug!(address = %service.address, "OBEX disconnect failed after transfer: {e}");
        }
        let mut stream = client.into_inner();
        let _ = stream.shutdown().await;
        Ok(())
    }

    /// Push `path` to `device` over OBEX Object Push.
    ///
    /// The Object Push service is used unless `options` selects another
    /// service. Posts `FileTransferStarted` followed by either `FileSent`
    /// or `FileTransferCancelled`.
    #[instrument(skip(self, options), fields(manager = "legacy"))]
    pub async fn send_file(&self, device: &str, path: &Path, options: &ConnectOptions) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::invalid_config(format!("'{}' has no file name", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;

        let known = self.resolve(device).await?;
        let mut options = options.clone();
        if options.port.is_none() && options.service_uuid.is_none() {
            options.service_uuid = Some(bluehub_types::uuids::OBEX_OBJECT_PUSH);
        }
        let service = Self::service_for(&known, &options)?;

        let address = known.address;
        let file = path.to_path_buf();
        self.context.coordination.post(BluetoothEvent::FileTransferStarted {
            address,
            file: file.clone(),
        });

        let open_timeout = self.context.connect_timeout(&options);
        match self.push_file(&service, &name, &data, open_timeout).await {
            Ok(()) => {
                info!(%address, file = %file.display(), size = data.len(), "File sent");
                self.context.coordination.post(BluetoothEvent::FileSent {
                    address,
                    file,
                    size: data.len() as u64,
                });
                Ok(())
            }
            Err(e) => {
                warn!(%address, file = %file.display(), "File transfer failed: {e}");
                self.context
                    .coordination
                    .post(BluetoothEvent::FileTransferCancelled {
                        address,
                        file,
                        reason: e.to_string(),
                    });
                Err(e)
            }
        }
    }
}

#[async_trait]
impl BluetoothManager for LegacyManager {
    fn kind(&self) -> ManagerKind {
        ManagerKind::Legacy
    }

    fn context(&self) -> &ManagerContext {
        &self.context
    }

    #[instrument(skip(self, options), fields(manager = "legacy"))]
    async fn connect(&self, device: &str, options: &ConnectOptions) -> Result<BluetoothDevice> {
        let known = self.resolve(device).await?;
        let service = Self::service_for(&known, options)?;
        let key = ConnectionKey::of(&service);
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        if self.live_stream(&key).is_some() {
            debug!(address = %key.address, port = ?key.port, "Reusing open connection");
            return Ok(self
                .context
                .coordination
                .cache
                .get_by_address(&key.address)
                .unwrap_or(known));
        }
        let stale = self.connections().remove(&key);
        if let Some(stale) = stale {
            self.close_connection(key, stale).await;
        }

        let timeout = self.context.connect_timeout(options);
        match self.open_connection(service.clone(), timeout).await {
            Ok(connection) => {
                self.connections().insert(key, connection);
                info!(address = %key.address, port = ?key.port, protocol = ?service.protocol, "Classic device connected");
                Ok(self.notify_link(key, &service, true))
            }
            Err(e) => {
                warn!(address = %key.address, port = ?key.port, "Classic connect failed: {e}");
                self.context.coordination.post(BluetoothEvent::ConnectionFailed {
                    address: key.address,
                    port: key.port,
                    service_uuid: key.uuid,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    #[instrument(skip(self, options), fields(manager = "legacy"))]
    async fn disconnect(&self, device: &str, options: &ConnectOptions) -> Result<()> {
        let address = self.address_of(device).await?;
        let selected: Vec<(ConnectionKey, LegacyConnection)> = {
            let mut connections = self.connections();
            let keys: Vec<ConnectionKey> = connections
                .keys()
                .filter(|k| k.selected_by(address, options.port, options.service_uuid))
                .copied()
                .collect();
            keys.into_iter()
                .filter_map(|k| connections.remove(&k).map(|c| (k, c)))
                .collect()
        };
        if selected.is_empty() {
            return Err(Error::NotConnected(device.to_string()));
        }

        for (key, connection) in selected {
            let service = connection.service.clone();
            self.close_connection(key, connection).await;
            info!(address = %key.address, port = ?key.port, "Classic device disconnected");
            self.notify_link(key, &service, false);
        }
        Ok(())
    }

    #[instrument(skip(self, service_uuids), fields(manager = "legacy"))]
    async fn scan(&self, duration: Duration, service_uuids: &[Uuid]) -> Result<Vec<BluetoothDevice>> {
        let _scan = self.context.coordination.scan_lock.lock().await;
        let discovered = self.backend.discover(duration).await?;

        let candidates: Vec<BluetoothDevice> = discovered
            .iter()
            .map(|found| self.candidate(found))
            .filter(|candidate| !self.context.is_blacklisted(candidate))
            .collect();

        let pending: Vec<Address> = candidates
            .iter()
            .map(|c| c.address)
            .filter(|a| self.needs_lookup(a))
            .collect();
        let mut services = if pending.is_empty() {
            HashMap::new()
        } else {
            self.lookup_services(pending).await
        };

        let mut seen = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            let address = candidate.address;
            for record in services.remove(&address).unwrap_or_default() {
                candidate.add_child(ChildEntity::Service(record.into_service(address)));
            }
            let known = self.context.coordination.cache.get_by_address(&address);
            self.context.plugins.enrich(&mut candidate, known.as_ref());
            self.context.handler.handle(candidate);
            seen.push(address);
        }

        let cache = &self.context.coordination.cache;
        let mut devices: Vec<BluetoothDevice> = seen
            .iter()
            .filter_map(|address| cache.get_by_address(address))
            .filter(|d| service_uuids.is_empty() || service_uuids.iter().any(|u| d.has_service(u)))
            .collect();
        devices.sort_by_key(|d| d.address);
        debug!(found = devices.len(), "Classic scan finished");
        Ok(devices)
    }

    async fn read(
        &self,
        device: &str,
        options: &ConnectOptions,
        size: Option<usize>,
    ) -> Result<Vec<u8>> {
        let (key, stream, stop) = self.stream_for(device, options).await?;
        let timeout = self.io_timeout(options);
        let mut buf = vec![0u8; size.unwrap_or(DEFAULT_READ_SIZE)];

        let n = tokio::time::timeout(timeout, async {
            let mut stream = stream.lock().await;
            stream.read(&mut buf).await
        })
        .await
        .map_err(|_| Error::timeout(format!("read {}", key.address), timeout))??;

        if n == 0 && !buf.is_empty() {
            stop.cancel();
            self.drop_connection(key).await;
            return Err(Error::transport(format!(
                "connection to {} port={:?} closed by peer",
                key.address, key.port
            )));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn write(&self, device: &str, data: &[u8], options: &ConnectOptions) -> Result<()> {
        let (key, stream, _) = self.stream_for(device, options).await?;
        let timeout = self.io_timeout(options);
        tokio::time::timeout(timeout, async {
            let mut stream = stream.lock().await;
            stream.write_all(data).await?;
            stream.flush().await
        })
        .await
        .map_err(|_| Error::timeout(format!("write {}", key.address), timeout))??;
        Ok(())
    }

    async fn listen(&self, cancel: CancellationToken) -> Result<()> {
        let gate = Arc::clone(&self.context.coordination.scan_gate);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = gate.wait_enabled() => {}
            }

            let pass = tokio::select! {
                _ = cancel.cancelled() => break,
                pass = self.scan(self.context.config.scan_duration(), &[]) => pass,
            };
            match pass {
                Ok(devices) => debug!(devices = devices.len(), "Classic discovery pass finished"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Classic discovery failed: {e}"),
            }

            if !pause_or_cancel(&cancel, self.context.config.poll_interval()).await {
                break;
            }
        }
        Ok(())
    }

    async fn close_all(&self) {
        let connections: Vec<(ConnectionKey, LegacyConnection)> =
            self.connections().drain().collect();
        for (key, connection) in connections {
            let service = connection.service.clone();
            self.close_connection(key, connection).await;
            self.notify_link(key, &service, false);
        }
    }
}
