//! Transport layer for the RPC framework.
//!
//! This module owns the client side of a TCP connection: framing the byte
//! stream, multiplexing calls and reacting to server drains.

pub mod connection;

pub use connection::Connection;
