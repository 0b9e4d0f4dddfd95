//! Load-balanced RPC clients over a fixed list of addresses.
//!
//! A [`ConnectionManager`] turns a name and a list of `host:port` addresses
//! into a typed client: it registers a [`StaticResolver`] under the name,
//! dials `"<name>:///"` with round-robin balancing and hands the resulting
//! [`ClientConn`] to a caller-supplied factory that builds the stub.
//!
//! ```no_run
//! use conduit_client::{ClientConfig, ConnectionManager};
//!
//! # fn main() -> conduit_client::Result<()> {
//! let manager = ConnectionManager::new();
//! let handle = manager.new_client(ClientConfig::new(
//!     "orders",
//!     ["10.0.0.1:50051", "10.0.0.2:50051"],
//!     |conn| conn,
//! ))?;
//!
//! // ... issue calls through handle.client() ...
//!
//! handle.close();
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod backoff;
mod balancer;
mod channel;
mod error;
mod manager;
mod options;
mod resolver;
mod subchannel;

pub use channel::ClientConn;
pub use error::{Error, Result};
pub use manager::{ClientConfig, ClientHandle, ConnectionManager};
pub use options::{
    BackoffConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SERVICE_CONFIG, DialOption, DialSettings,
    Policy, parse_service_config,
};
pub use resolver::{Registration, ResolverRegistry, StaticResolver, Target};
pub use subchannel::ConnectivityState;
