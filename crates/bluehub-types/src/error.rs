//! Error types for value parsing in bluehub-types.

use thiserror::Error;

/// Errors that can occur when parsing Bluetooth identifiers and tables.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The string is not a valid 6-byte MAC address.
    #[error("Invalid Bluetooth address '{0}'")]
    InvalidAddress(String),

    /// A protocol name other than RFCOMM or L2CAP.
    #[error("Unknown protocol '{0}'")]
    UnknownProtocol(String),

    /// A malformed line in a manufacturer (OUI) table.
    #[error("Invalid OUI entry at line {line}: {reason}")]
    InvalidOuiEntry {
        /// 1-based line number in the source.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type alias using bluehub-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
