//! Bluetooth lifecycle events and the event-bus seam.
//!
//! Managers and the façade report every externally visible state change as a
//! [`BluetoothEvent`] posted to an [`EventBus`]. The bundled
//! [`EventDispatcher`] fans events out over a `tokio::sync::broadcast`
//! channel; hosts with their own bus implement [`EventBus`] instead.

use std::path::PathBuf;

use bluehub_types::{Address, BluetoothDevice};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events posted to the bus.
///
/// All events are serializable for logging, persistence, and IPC.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum BluetoothEvent {
    /// First sighting, or the device came back after being lost.
    DeviceFound { device: BluetoothDevice },
    /// A previously reachable device vanished from a scan.
    DeviceLost { device: BluetoothDevice },
    DeviceConnected {
        device: BluetoothDevice,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_uuid: Option<Uuid>,
    },
    DeviceDisconnected {
        device: BluetoothDevice,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_uuid: Option<Uuid>,
    },
    /// RSSI or TX power changed (throttled per device).
    DeviceSignalUpdate { device: BluetoothDevice },
    /// A connect attempt failed; posted instead of `DeviceConnected`.
    ConnectionFailed {
        address: Address,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        service_uuid: Option<Uuid>,
        reason: String,
    },
    FileTransferStarted {
        address: Address,
        file: PathBuf,
    },
    FileSent {
        address: Address,
        file: PathBuf,
        size: u64,
    },
    FileReceived {
        address: Address,
        file: PathBuf,
        size: u64,
    },
    FileTransferCancelled {
        address: Address,
        file: PathBuf,
        reason: String,
    },
    /// Discovery was paused; `duration_secs` is set when it will auto-resume.
    ScanPaused {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u64>,
    },
    /// Discovery was resumed; `duration_secs` is set when it will auto-pause.
    ScanResumed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<u64>,
    },
    /// A merged entity was written to the store.
    EntityUpdated { device: BluetoothDevice },
}

impl BluetoothEvent {
    /// Address of the device the event is about, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            Self::DeviceFound { device }
            | Self::DeviceLost { device }
            | Self::DeviceConnected { device, .. }
            | Self::DeviceDisconnected { device, .. }
            | Self::DeviceSignalUpdate { device }
            | Self::EntityUpdated { device } => Some(device.address),
            Self::ConnectionFailed { address, .. }
            | Self::FileTransferStarted { address, .. }
            | Self::FileSent { address, .. }
            | Self::FileReceived { address, .. }
            | Self::FileTransferCancelled { address, .. } => Some(*address),
            Self::ScanPaused { .. } | Self::ScanResumed { .. } => None,
        }
    }

    /// The serialized `type` tag, handy for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::DeviceFound { .. } => "device_found",
            Self::DeviceLost { .. } => "device_lost",
            Self::DeviceConnected { .. } => "device_connected",
            Self::DeviceDisconnected { .. } => "device_disconnected",
            Self::DeviceSignalUpdate { .. } => "device_signal_update",
            Self::ConnectionFailed { .. } => "connection_failed",
            Self::FileTransferStarted { .. } => "file_transfer_started",
            Self::FileSent { .. } => "file_sent",
            Self::FileReceived { .. } => "file_received",
            Self::FileTransferCancelled { .. } => "file_transfer_cancelled",
            Self::ScanPaused { .. } => "scan_paused",
            Self::ScanResumed { .. } => "scan_resumed",
            Self::EntityUpdated { .. } => "entity_updated",
        }
    }
}

/// Device lifecycle transitions that go through
/// [`Coordination::notify`](crate::coordination::Coordination::notify).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Found,
    Lost,
    Connected,
    Disconnected,
    SignalUpdate,
}

/// Port / service the transition refers to, for connection events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Link {
    pub port: Option<u16>,
    pub service_uuid: Option<Uuid>,
}

impl EventKind {
    /// Build the bus event for this transition.
    pub fn into_event(self, device: BluetoothDevice, link: Link) -> BluetoothEvent {
        match self {
            Self::Found => BluetoothEvent::DeviceFound { device },
            Self::Lost => BluetoothEvent::DeviceLost { device },
            Self::Connected => BluetoothEvent::DeviceConnected {
                device,
                port: link.port,
                service_uuid: link.service_uuid,
            },
            Self::Disconnected => BluetoothEvent::DeviceDisconnected {
                device,
                port: link.port,
                service_uuid: link.service_uuid,
            },
            Self::SignalUpdate => BluetoothEvent::DeviceSignalUpdate { device },
        }
    }
}

/// Sink for lifecycle events.
pub trait EventBus: Send + Sync {
    fn post(&self, event: BluetoothEvent);
}

/// Sender for Bluetooth events.
pub type EventSender = broadcast::Sender<BluetoothEvent>;

/// Receiver for Bluetooth events.
pub type EventReceiver = broadcast::Receiver<BluetoothEvent>;

/// Broadcast-based [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event. Events posted with no subscriber are dropped.
    pub fn send(&self, event: BluetoothEvent) {
        tracing::trace!(event = event.name(), "posting event");
        let _ = self.sender.send(event);
    }

    /// Get the number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus for EventDispatcher {
    fn post(&self, event: BluetoothEvent) {
        self.send(event);
    }
}
