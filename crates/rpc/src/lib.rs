//! Minimal unary RPC transport shared by the conduit client and server.
//!
//! This crate provides the pieces both sides of a call agree on:
//!
//! # Features
//!
//! - **Framing**: length-prefixed, checksummed frames over TCP
//! - **Envelopes**: call ids, method paths, metadata and status codes
//! - **Typed payloads**: CBOR encoding through serde
//! - **Interceptors**: hooks for cross-cutting concerns on either side
//! - **Multiplexed connections**: many concurrent calls over one socket
//!
//! # Example
//!
//! ```no_run
//! use conduit_rpc::{Invoker, InvokerExt, Request, Status};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Echo {
//!     message: String,
//! }
//!
//! async fn echo<I: Invoker>(invoker: &I) -> Result<String, Status> {
//!     let response = invoker
//!         .call::<Echo, Echo>(
//!             "/echo.Echo/Echo",
//!             Request::new(Echo {
//!                 message: "hello".to_string(),
//!             }),
//!         )
//!         .await?;
//!
//!     Ok(response.into_inner().message)
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod interceptor;
pub mod invoker;
pub mod metadata;
pub mod protocol;
pub mod request;
pub mod status;
pub mod transport;

// Re-export commonly used types
pub use error::{Error, Result};
pub use interceptor::{ClientInterceptor, ServerInterceptor};
pub use invoker::{Invoker, InvokerExt};
pub use metadata::Metadata;
pub use protocol::codec;
pub use request::{Request, Response};
pub use status::{Code, Status};
pub use transport::Connection;

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
