//! Hosting RPC services with panic isolation and graceful shutdown.
//!
//! A [`ServiceHost`] binds its listener when it is created, serves calls
//! until stopped and can drain in-flight calls before it goes away:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use conduit_rpc::{Request, Response, Status};
//! use conduit_server::{HostConfig, ServiceDescriptor, ServiceHost};
//!
//! struct Greeter;
//!
//! # async fn run() -> conduit_server::Result<()> {
//! let descriptor = ServiceDescriptor::new("hello.Greeter").unary(
//!     "SayHello",
//!     |_greeter: Arc<Greeter>, request: Request<String>| async move {
//!         Ok::<_, Status>(Response::new(format!("hello {}", request.into_inner())))
//!     },
//! );
//!
//! let host = Arc::new(ServiceHost::new(
//!     HostConfig::new("127.0.0.1:50051", descriptor, Greeter)
//!         .with_shutdown_timeout(Duration::from_secs(1)),
//! )?);
//!
//! let serving = tokio::spawn({
//!     let host = Arc::clone(&host);
//!     async move { host.start().await }
//! });
//!
//! // ... later ...
//! host.graceful_stop().await;
//! serving.await.expect("serve task panicked")?;
//! # Ok(())
//! # }
//! ```
//!
//! Every call first passes through [`conduit_trace::ParentExtractor`], so
//! handlers run inside the caller's trace when the caller propagated one.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod bridge;
mod connection;
mod dispatcher;
mod error;
mod host;
mod options;
mod recovery;
mod service;

pub use bridge::{MESSAGE_HEADER, STATUS_HEADER, TIMEOUT_HEADER};
pub use error::{Error, Result};
pub use host::{HostConfig, ServiceHost};
pub use options::{DEFAULT_MAX_CONNECTIONS, ServerOption, ServerSettings};
pub use recovery::{PanicHandler, default_panic_handler, panic_message};
pub use service::{BoxFuture, CallResult, ServiceDescriptor, ServiceInfo};
