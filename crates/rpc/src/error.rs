//! Error types for the RPC transport.

use std::io;

use thiserror::Error;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Transport-level error.
///
/// Failures of an individual call are reported as a [`crate::Status`]
/// instead; this type covers framing, encoding and socket problems.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol-level errors.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Codec errors during serialization/deserialization.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Invalid frame received.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame too large.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Checksum mismatch.
    #[error("Checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },
}

/// Codec-related errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Serialization failed.
    #[error("Failed to serialize: {0}")]
    SerializationFailed(String),

    /// Deserialization failed.
    #[error("Failed to deserialize: {0}")]
    DeserializationFailed(String),
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<ciborium::de::Error<io::Error>> for CodecError {
    fn from(err: ciborium::de::Error<io::Error>) -> Self {
        Self::DeserializationFailed(err.to_string())
    }
}

impl From<ciborium::ser::Error<io::Error>> for CodecError {
    fn from(err: ciborium::ser::Error<io::Error>) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}
