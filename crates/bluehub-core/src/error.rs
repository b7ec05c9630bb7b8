//! Error types for bluehub-core.
//!
//! Every failing action surfaces one [`Error`]. Callers that only care about
//! the broad category can use [`Error::kind`]:
//!
//! | Kind | Variants | Typical cause |
//! |------|----------|---------------|
//! | [`ErrorKind::NotFound`] | `DeviceNotFound`, `ServiceNotFound`, `NotConnected` | Device out of range, wrong name, no matching service |
//! | [`ErrorKind::Timeout`] | `Timeout` | Connect/read/write/service lookup took too long |
//! | [`ErrorKind::Transport`] | `Bluetooth`, `Io`, `Transport`, `ConnectionFailed`, `Obex` | GATT or socket I/O failed |
//! | [`ErrorKind::Unsupported`] | `Unsupported` | No capability plugin, disabled manager, platform limitation |
//!
//! Manager background loops never propagate per-device failures; they log
//! them with `tracing` and carry on.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while discovering or talking to Bluetooth devices.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy stack error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Device not found in the cache, even after a scan.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// The device is known but has no service matching the request.
    #[error("No service on {device} matching port={port:?} uuid={uuid:?}")]
    ServiceNotFound {
        device: String,
        port: Option<u16>,
        uuid: Option<Uuid>,
    },

    /// Operation requires an open connection that does not exist.
    #[error("Not connected to {0}")]
    NotConnected(String),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// GATT or socket level failure during an established session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Connection failed with specific reason.
    #[error("Connection to {device_id} failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: String,
        /// The structured reason for the failure.
        reason: ConnectionFailureReason,
    },

    /// The remote OBEX server refused a request.
    #[error("OBEX {operation} failed with response 0x{code:02X}")]
    Obex {
        operation: &'static str,
        code: u8,
    },

    /// No manager or plugin can handle the request.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed address or table data.
    #[error(transparent)]
    Parse(#[from] bluehub_types::ParseError),

    /// The entity store failed.
    #[error("Entity store error: {0}")]
    Store(String),

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Broad failure category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Timeout,
    Transport,
    Unsupported,
    Other,
}

/// Structured reasons for connection failures.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConnectionFailureReason {
    /// Bluetooth adapter not available or powered off.
    AdapterUnavailable,
    /// Device rejected the connection.
    Rejected,
    /// The connection task ended before reporting a result.
    TaskAborted,
    /// Generic stack error.
    Stack(String),
}

impl std::fmt::Display for ConnectionFailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AdapterUnavailable => write!(f, "Bluetooth adapter unavailable"),
            Self::Rejected => write!(f, "connection rejected by device"),
            Self::TaskAborted => write!(f, "connection task ended unexpectedly"),
            Self::Stack(msg) => write!(f, "stack error: {}", msg),
        }
    }
}

impl ConnectionFailureReason {
    /// Classify a failed btleplug call.
    pub fn from_btleplug(err: &btleplug::Error) -> Self {
        match err {
            btleplug::Error::PermissionDenied => Self::Rejected,
            other => Self::from_stack_message(&other.to_string()),
        }
    }

    /// Classify a socket error from an RFCOMM or L2CAP connect.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::PermissionDenied => {
                Self::Rejected
            }
            std::io::ErrorKind::NetworkDown => Self::AdapterUnavailable,
            _ => Self::Stack(err.to_string()),
        }
    }

    /// Classify a stack error by the D-Bus error name it carries.
    ///
    /// BlueZ answers `org.bluez.Error.NotReady` while the adapter is powered
    /// off.
    pub fn from_stack_message(message: &str) -> Self {
        if message.contains("NotReady") || message.contains("not powered") {
            Self::AdapterUnavailable
        } else if message.contains("AuthenticationRejected") || message.contains("NotAuthorized") {
            Self::Rejected
        } else {
            Self::Stack(message.to_string())
        }
    }
}

/// Reason why a device was not found.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with specified name/address not found.
    NotFound { identifier: String },
    /// No Bluetooth adapter available.
    NoAdapter,
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::NoAdapter => write!(f, "no Bluetooth adapter available"),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn service_not_found(device: impl Into<String>, port: Option<u16>, uuid: Option<Uuid>) -> Self {
        Self::ServiceNotFound {
            device: device.into(),
            port,
            uuid,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Wrap any store-side failure.
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    /// Create a connection failure with structured reason.
    pub fn connection_failed(device_id: impl Into<String>, reason: ConnectionFailureReason) -> Self {
        Self::ConnectionFailed {
            device_id: device_id.into(),
            reason,
        }
    }

    /// The broad category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DeviceNotFound(_) | Self::ServiceNotFound { .. } | Self::NotConnected(_) => {
                ErrorKind::NotFound
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Bluetooth(_)
            | Self::Io(_)
            | Self::Transport(_)
            | Self::ConnectionFailed { .. }
            | Self::Obex { .. } => ErrorKind::Transport,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::InvalidConfig(_) | Self::Parse(_) | Self::Store(_) | Self::Cancelled => {
                ErrorKind::Other
            }
        }
    }

    /// Errors after which a background loop cannot make progress.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(DeviceNotFoundReason::NoAdapter)
                | Self::ConnectionFailed {
                    reason: ConnectionFailureReason::AdapterUnavailable,
                    ..
                }
                | Self::Cancelled
        )
    }
}

/// Result type alias using bluehub-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("Sensor1");
        assert!(err.to_string().contains("Sensor1"));

        let err = Error::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));

        let err = Error::service_not_found("AA:BB:CC:DD:EE:FF", Some(3), None);
        assert!(err.to_string().contains("port=Some(3)"));

        let err = Error::Obex {
            operation: "PUT",
            code: 0xC3,
        };
        assert_eq!(err.to_string(), "OBEX PUT failed with response 0xC3");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::device_not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(Error::NotConnected("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::timeout("read", Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(Error::transport("reset").kind(), ErrorKind::Transport);
        assert_eq!(
            Error::from(std::io::Error::other("boom")).kind(),
            ErrorKind::Transport
        );
        assert_eq!(Error::unsupported("set").kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_connection_failure_reasons() {
        let err = Error::connection_failed("AA:BB:CC:DD:EE:FF", ConnectionFailureReason::Rejected);
        assert!(err.to_string().contains("rejected"));
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_classify_stack_failures() {
        assert_eq!(
            ConnectionFailureReason::from_btleplug(&btleplug::Error::PermissionDenied),
            ConnectionFailureReason::Rejected
        );
        assert_eq!(
            ConnectionFailureReason::from_stack_message("org.bluez.Error.NotReady: Resource Not Ready"),
            ConnectionFailureReason::AdapterUnavailable
        );
        assert!(matches!(
            ConnectionFailureReason::from_stack_message("org.bluez.Error.Failed: br-connection-unknown"),
            ConnectionFailureReason::Stack(_)
        ));
        let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        assert_eq!(
            ConnectionFailureReason::from_io(&refused),
            ConnectionFailureReason::Rejected
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(
            Error::connection_failed("hci0", ConnectionFailureReason::AdapterUnavailable)
                .is_fatal()
        );
        assert!(
            !Error::connection_failed("AA:BB:CC:DD:EE:FF", ConnectionFailureReason::Rejected)
                .is_fatal()
        );
        assert!(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter).is_fatal());
        assert!(!Error::device_not_found("x").is_fatal());
        assert!(!Error::transport("x").is_fatal());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = "nope".parse::<bluehub_types::Address>().unwrap_err().into();
        assert!(err.to_string().contains("nope"));
    }
}
