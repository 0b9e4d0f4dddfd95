//! Error types for building client connections.

use thiserror::Error;

/// Result type alias for client construction.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reasons a client connection could not be built.
///
/// Failures of individual calls are reported as a [`conduit_rpc::Status`].
#[derive(Debug, Error)]
pub enum Error {
    /// The caller supplied no addresses.
    #[error("address list is empty")]
    EmptyAddressList,

    /// An address is not `host:port`.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The resolver scheme contains characters not allowed in a URI scheme.
    #[error("invalid scheme {0:?}")]
    InvalidScheme(String),

    /// Another live registration already owns this scheme.
    #[error("scheme {0:?} is already registered")]
    SchemeInUse(String),

    /// No resolver is known for the target's scheme.
    #[error("no resolver registered for scheme {0:?}")]
    UnknownScheme(String),

    /// The dial target could not be parsed.
    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget {
        /// The rejected target.
        target: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A dial option carries a value that cannot be used.
    #[error("invalid dial option: {0}")]
    InvalidDialOption(String),

    /// The service config is not valid JSON or names no supported policy.
    #[error("invalid service config: {0}")]
    InvalidServiceConfig(String),
}
