//! Hooks run on every call before it is sent (client) or dispatched (server).
//!
//! Retry, authentication and similar policies plug in here; the crate
//! itself only ships the trace propagation interceptors in `conduit-trace`.

use bytes::Bytes;

use crate::request::Request;
use crate::status::Status;

/// Runs before a request leaves the client.
pub trait ClientInterceptor: Send + Sync + 'static {
    /// Inspects or rewrites the outbound request. Returning an error fails the
    /// call without sending it.
    ///
    /// # Errors
    ///
    /// Returns the status the call should fail with.
    fn intercept(&self, method: &str, request: Request<Bytes>) -> Result<Request<Bytes>, Status>;
}

/// Runs after a request is received and before its handler is invoked.
pub trait ServerInterceptor: Send + Sync + 'static {
    /// Inspects or rewrites the inbound request. Returning an error answers the
    /// call with that status without invoking the handler.
    ///
    /// # Errors
    ///
    /// Returns the status the call should fail with.
    fn intercept(&self, method: &str, request: Request<Bytes>) -> Result<Request<Bytes>, Status>;
}

impl<F> ClientInterceptor for F
where
    F: Fn(&str, Request<Bytes>) -> Result<Request<Bytes>, Status> + Send + Sync + 'static,
{
    fn intercept(&self, method: &str, request: Request<Bytes>) -> Result<Request<Bytes>, Status> {
        self(method, request)
    }
}

impl<F> ServerInterceptor for F
where
    F: Fn(&str, Request<Bytes>) -> Result<Request<Bytes>, Status> + Send + Sync + 'static,
{
    fn intercept(&self, method: &str, request: Request<Bytes>) -> Result<Request<Bytes>, Status> {
        self(method, request)
    }
}
