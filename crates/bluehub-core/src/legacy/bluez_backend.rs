//! [`LegacyBackend`] on top of BlueZ, through bluer.
//!
//! BlueZ does not expose raw SDP records over D-Bus, only the profile UUIDs
//! a device advertises. Services are therefore reported without a channel,
//! and streams to them are opened through the Profile API, letting BlueZ
//! resolve the channel. Services with an explicit channel/PSM are opened as
//! plain RFCOMM/L2CAP sockets.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bluer::rfcomm::{Profile, Role};
use bluer::{AdapterEvent, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use bluehub_types::{Address, Protocol};

use super::backend::{LegacyBackend, LegacyDiscovery, LegacyStream, ServiceRecord, StreamTarget};
use crate::error::{ConnectionFailureReason, DeviceNotFoundReason, Error, Result};

fn stack_error(err: bluer::Error) -> Error {
    Error::transport(err.to_string())
}

fn failure_reason(err: &bluer::Error) -> ConnectionFailureReason {
    match err.kind {
        bluer::ErrorKind::NotReady => ConnectionFailureReason::AdapterUnavailable,
        bluer::ErrorKind::AuthenticationRejected
        | bluer::ErrorKind::NotAuthorized
        | bluer::ErrorKind::NotPermitted => ConnectionFailureReason::Rejected,
        _ => ConnectionFailureReason::Stack(err.to_string()),
    }
}

/// Failure of the adapter itself; fatal for discovery loops when it is
/// powered off.
fn adapter_error(adapter: &bluer::Adapter, err: bluer::Error) -> Error {
    match failure_reason(&err) {
        ConnectionFailureReason::AdapterUnavailable => Error::connection_failed(
            adapter.name(),
            ConnectionFailureReason::AdapterUnavailable,
        ),
        _ => stack_error(err),
    }
}

fn socket_error(address: bluer::Address, err: std::io::Error) -> Error {
    Error::connection_failed(address.to_string(), ConnectionFailureReason::from_io(&err))
}

fn to_bluer(address: Address) -> bluer::Address {
    bluer::Address::new(address.bytes())
}

fn from_bluer(address: bluer::Address) -> Address {
    Address::new(address.0)
}

pub struct BluezLegacyBackend {
    interface: Option<String>,
    session: OnceCell<(Session, bluer::Adapter)>,
}

impl BluezLegacyBackend {
    pub fn new(interface: Option<String>) -> Self {
        Self {
            interface,
            session: OnceCell::new(),
        }
    }

    async fn session(&self) -> Result<&(Session, bluer::Adapter)> {
        self.session
            .get_or_try_init(|| open_session(self.interface.as_deref()))
            .await
    }
}

async fn open_session(interface: Option<&str>) -> Result<(Session, bluer::Adapter)> {
    let session = Session::new().await.map_err(stack_error)?;
    let adapter = match interface {
        Some(name) => session.adapter(name),
        None => session.default_adapter().await,
    }
    .map_err(|_| Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))?;
    adapter
        .set_powered(true)
        .await
        .map_err(|e| adapter_error(&adapter, e))?;
    info!(adapter = adapter.name(), "Using BlueZ adapter for classic Bluetooth");
    Ok((session, adapter))
}

#[async_trait]
impl LegacyBackend for BluezLegacyBackend {
    async fn discover(&self, duration: Duration) -> Result<Vec<LegacyDiscovery>> {
        let (_, adapter) = self.session().await?;
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::BrEdr,
                ..Default::default()
            })
            .await
            .map_err(|e| adapter_error(adapter, e))?;

        let mut seen = HashSet::new();
        {
            let events = adapter
                .discover_devices()
                .await
                .map_err(|e| adapter_error(adapter, e))?;
            tokio::pin!(events);
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(addr)) => {
                            seen.insert(addr);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        }

        let mut found = Vec::with_capacity(seen.len());
        for addr in seen {
            let device = match adapter.device(addr) {
                Ok(device) => device,
                Err(e) => {
                    debug!(%addr, "Device vanished during discovery: {e}");
                    continue;
                }
            };
            found.push(LegacyDiscovery {
                address: from_bluer(addr),
                name: device.name().await.ok().flatten(),
                class: device.class().await.ok().flatten(),
                rssi: device.rssi().await.ok().flatten(),
            });
        }
        Ok(found)
    }

    async fn find_services(&self, address: Address) -> Result<Vec<ServiceRecord>> {
        let (_, adapter) = self.session().await?;
        let device = adapter.device(to_bluer(address)).map_err(stack_error)?;
        let profiles = device.uuids().await.map_err(stack_error)?.unwrap_or_default();

        let mut records: Vec<ServiceRecord> = profiles
            .into_iter()
            .map(|uuid| ServiceRecord {
                protocol: Protocol::Rfcomm,
                port: None,
                uuid: Some(uuid),
                name: None,
            })
            .collect();
        records.sort_by_key(|r| r.uuid);
        Ok(records)
    }

    async fn open(&self, target: &StreamTarget) -> Result<Box<dyn LegacyStream>> {
        let address = to_bluer(target.address);
        match (target.protocol, target.port, target.uuid) {
            (Protocol::Rfcomm, Some(port), _) => {
                let channel = u8::try_from(port).map_err(|_| {
                    Error::invalid_config(format!("RFCOMM channel {port} is out of range"))
                })?;
                let stream =
                    bluer::rfcomm::Stream::connect(bluer::rfcomm::SocketAddr::new(address, channel))
                        .await
                        .map_err(|e| socket_error(address, e))?;
                Ok(Box::new(stream))
            }
            (Protocol::L2cap, Some(psm), _) => {
                let socket =
                    bluer::l2cap::SocketAddr::new(address, bluer::AddressType::BrEdr, psm);
                let stream = bluer::l2cap::Stream::connect(socket)
                    .await
                    .map_err(|e| socket_error(address, e))?;
                Ok(Box::new(stream))
            }
            (Protocol::Rfcomm, None, Some(uuid)) => {
                let (session, adapter) = self.session().await?;
                let device = adapter.device(address).map_err(stack_error)?;
                let handle = session
                    .register_profile(Profile {
                        uuid,
                        role: Some(Role::Client),
                        require_authentication: Some(false),
                        require_authorization: Some(false),
                        ..Default::default()
                    })
                    .await
                    .map_err(stack_error)?;
                tokio::pin!(handle);

                let connect = async {
                    device.connect_profile(&uuid).await.map_err(|e| {
                        Error::connection_failed(address.to_string(), failure_reason(&e))
                    })
                };
                let accept = async {
                    handle
                        .next()
                        .await
                        .ok_or_else(|| Error::transport("BlueZ closed the profile handle"))
                };
                let (_, request) = tokio::try_join!(connect, accept)?;
                let stream = request
                    .accept()
                    .map_err(|e| Error::transport(e.to_string()))?;
                debug!(%address, %uuid, "Profile connection accepted");
                Ok(Box::new(stream))
            }
            (protocol, _, _) => {
                warn!(%address, %protocol, "Cannot open a stream without a port or UUID");
                Err(Error::service_not_found(
                    target.address.to_string(),
                    target.port,
                    target.uuid,
                ))
            }
        }
    }
}
