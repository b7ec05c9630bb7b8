//! Seam between the classic manager and the platform Bluetooth stack.

use std::time::Duration;

use async_trait::async_trait;
use bluehub_types::{Address, BluetoothService, Protocol};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A device reported by an inquiry pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyDiscovery {
    pub address: Address,
    pub name: Option<String>,
    /// Raw 24-bit Class of Device.
    pub class: Option<u32>,
    pub rssi: Option<i16>,
}

impl LegacyDiscovery {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
            class: None,
            rssi: None,
        }
    }
}

/// One SDP record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub protocol: Protocol,
    /// RFCOMM channel or L2CAP PSM, when the stack reports one.
    pub port: Option<u16>,
    pub uuid: Option<Uuid>,
    pub name: Option<String>,
}

impl ServiceRecord {
    pub fn into_service(self, address: Address) -> BluetoothService {
        let service = BluetoothService::legacy(address, self.protocol, self.port, self.uuid);
        match self.name {
            Some(name) => service.with_name(name),
            None => service,
        }
    }
}

/// Where to open a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub address: Address,
    pub protocol: Protocol,
    pub port: Option<u16>,
    pub uuid: Option<Uuid>,
}

impl StreamTarget {
    pub fn for_service(service: &BluetoothService) -> Self {
        Self {
            address: service.address,
            protocol: service.protocol.unwrap_or(Protocol::Rfcomm),
            port: service.port,
            uuid: service.uuid,
        }
    }
}

/// A connected RFCOMM/L2CAP byte stream.
pub trait LegacyStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> LegacyStream for T {}

/// Platform classic Bluetooth stack.
#[async_trait]
pub trait LegacyBackend: Send + Sync {
    /// Run an inquiry pass for `duration`.
    async fn discover(&self, duration: Duration) -> Result<Vec<LegacyDiscovery>>;

    /// SDP lookup of a device's services. May be slow.
    async fn find_services(&self, address: Address) -> Result<Vec<ServiceRecord>>;

    /// Open a stream to a service, by port when known, otherwise by UUID.
    async fn open(&self, target: &StreamTarget) -> Result<Box<dyn LegacyStream>>;
}

/// Stand-in for platforms without a classic Bluetooth stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableLegacyBackend;

impl UnavailableLegacyBackend {
    fn error() -> Error {
        Error::unsupported("classic Bluetooth is only available on Linux with BlueZ")
    }
}

#[async_trait]
impl LegacyBackend for UnavailableLegacyBackend {
    async fn discover(&self, _duration: Duration) -> Result<Vec<LegacyDiscovery>> {
        Err(Self::error())
    }

    async fn find_services(&self, _address: Address) -> Result<Vec<ServiceRecord>> {
        Err(Self::error())
    }

    async fn open(&self, _target: &StreamTarget) -> Result<Box<dyn LegacyStream>> {
        Err(Self::error())
    }
}
