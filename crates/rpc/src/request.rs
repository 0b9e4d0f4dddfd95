//! Request and response wrappers.

use std::net::SocketAddr;
use std::time::Duration;

use http::Extensions;

use crate::metadata::Metadata;

/// A call's request message together with its metadata.
#[derive(Debug)]
pub struct Request<T> {
    metadata: Metadata,
    message: T,
    extensions: Extensions,
    timeout: Option<Duration>,
    remote_addr: Option<SocketAddr>,
}

impl<T> Request<T> {
    /// Wraps a message with empty metadata.
    pub fn new(message: T) -> Self {
        Self {
            metadata: Metadata::new(),
            message,
            extensions: Extensions::new(),
            timeout: None,
            remote_addr: None,
        }
    }

    /// Wraps a message with the given metadata.
    pub fn with_metadata(message: T, metadata: Metadata) -> Self {
        Self {
            metadata,
            ..Self::new(message)
        }
    }

    /// Request metadata.
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable request metadata.
    pub const fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Borrows the message.
    pub const fn get_ref(&self) -> &T {
        &self.message
    }

    /// Mutably borrows the message.
    pub const fn get_mut(&mut self) -> &mut T {
        &mut self.message
    }

    /// Consumes the request, returning the message.
    pub fn into_inner(self) -> T {
        self.message
    }

    /// Splits the request into metadata and message, dropping extensions.
    pub fn into_parts(self) -> (Metadata, T) {
        (self.metadata, self.message)
    }

    /// Typed extensions attached by interceptors.
    pub const fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable typed extensions.
    pub const fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Limits how long the caller waits for the response.
    pub const fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// The per-call timeout, if any.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Address of the peer that sent the request (server side only).
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Records the peer address. Set by the server when a request is received.
    pub const fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    /// Maps the message, keeping metadata, extensions and timeout.
    pub fn map<U, F>(self, f: F) -> Request<U>
    where
        F: FnOnce(T) -> U,
    {
        Request {
            metadata: self.metadata,
            message: f(self.message),
            extensions: self.extensions,
            timeout: self.timeout,
            remote_addr: self.remote_addr,
        }
    }
}

/// A call's response message together with its metadata.
#[derive(Debug)]
pub struct Response<T> {
    metadata: Metadata,
    message: T,
}

impl<T> Response<T> {
    /// Wraps a message with empty metadata.
    pub const fn new(message: T) -> Self {
        Self {
            metadata: Metadata::new(),
            message,
        }
    }

    /// Wraps a message with the given metadata.
    pub const fn with_metadata(message: T, metadata: Metadata) -> Self {
        Self { metadata, message }
    }

    /// Response metadata.
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable response metadata.
    pub const fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Borrows the message.
    pub const fn get_ref(&self) -> &T {
        &self.message
    }

    /// Consumes the response, returning the message.
    pub fn into_inner(self) -> T {
        self.message
    }

    /// Splits the response into metadata and message.
    pub fn into_parts(self) -> (Metadata, T) {
        (self.metadata, self.message)
    }

    /// Maps the message, keeping metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            metadata: self.metadata,
            message: f(self.message),
        }
    }
}
