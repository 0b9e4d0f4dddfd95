use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for host operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors from hosting services.
#[derive(Debug, Error)]
pub enum Error {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        source: io::Error,
    },

    /// Accepting connections failed with a non-transient error.
    #[error("failed to accept connection on {addr}: {source}")]
    Accept {
        /// The listening address.
        addr: SocketAddr,
        /// Underlying socket error.
        source: io::Error,
    },

    /// The host is already serving.
    #[error("host already started")]
    AlreadyStarted,

    /// The host has been stopped and cannot serve again.
    #[error("host has been stopped")]
    Stopped,

    /// A service with this name is already registered.
    #[error("service {0:?} is already registered")]
    DuplicateService(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}
