//! Error types for samflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for samflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for samflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on an open port.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error reported by the platform backend.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The named endpoint does not exist.
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// A port or flash setting could not be applied.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// A write stalled before all bytes were accepted by the port.
    #[error("Timeout during write operation: wrote {written} of {total} bytes")]
    WriteTimeout {
        /// Bytes accepted before the deadline.
        written: usize,
        /// Bytes requested.
        total: usize,
    },

    /// Operation requires a connected device.
    #[error("Device not connected")]
    NotConnected,

    /// Transport or port operation on a closed port.
    #[error("Port is not open")]
    PortNotOpen,

    /// The endpoint did not answer the protocol handshake.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// A firmware chunk could not be written.
    #[error("Write error at address: {offset} ({reason})")]
    ChunkWriteFailed {
        /// Byte offset of the failing chunk.
        offset: usize,
        /// Last failure seen for the chunk.
        reason: String,
    },

    /// Read-back data differs from the expected image.
    #[error("Verification failed at address {address} (0x{address:08X}): expected 0x{expected:02X}, got 0x{actual:02X}")]
    VerificationMismatch {
        /// Absolute address of the first differing byte.
        address: u64,
        /// Expected byte.
        expected: u8,
        /// Byte read from the device.
        actual: u8,
    },

    /// Flash operation requested before a device was connected.
    #[error("No flash strategy selected (connect a device first)")]
    NoStrategySelected,

    /// Firmware image is unusable.
    #[error("Invalid firmware: {0}")]
    InvalidFirmware(String),

    /// Firmware file could not be read.
    #[error("Failed to open firmware file: {path}: {source}")]
    FileIo {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Malformed or unexpected protocol response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Partition information table is malformed.
    #[error("Invalid PIT: {0}")]
    Pit(String),

    /// Unsupported device or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Another operation is still running.
    #[error("Operation in progress: {0}")]
    Busy(String),
}

impl Error {
    /// Whether this error is a read or write timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::WriteTimeout { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Whether this error means there is no live link to the device.
    #[must_use]
    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::NotConnected | Self::PortNotOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_message_contains_decimal_address() {
        let err = Error::VerificationMismatch {
            address: 4100,
            expected: 0xAA,
            actual: 0x00,
        };
        let msg = err.to_string();
        assert!(msg.contains("4100"));
        assert!(msg.contains("0x00001004"));
    }

    #[test]
    fn test_chunk_write_message_contains_offset() {
        let err = Error::ChunkWriteFailed {
            offset: 512,
            reason: "no ack".into(),
        };
        assert!(err.to_string().contains("Write error at address: 512"));
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::Timeout("x".into()).is_timeout());
        assert!(
            Error::WriteTimeout {
                written: 3,
                total: 8
            }
            .is_timeout()
        );
        assert!(Error::Io(io::Error::new(io::ErrorKind::TimedOut, "t")).is_timeout());
        assert!(!Error::NotConnected.is_timeout());
    }

    #[test]
    fn test_closed_port_message() {
        assert_eq!(Error::PortNotOpen.to_string(), "Port is not open");
        assert!(Error::PortNotOpen.is_not_connected());
        assert!(Error::NotConnected.is_not_connected());
        assert!(!Error::Timeout("x".into()).is_not_connected());
    }
}
