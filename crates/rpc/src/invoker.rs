//! The dispatch interface typed stubs are bound to.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::protocol::codec;
use crate::request::{Request, Response};
use crate::status::Status;

/// Something that can carry a unary call to a server.
///
/// Client connections implement this; typed stubs are thin wrappers that
/// hold an `Invoker` and call [`InvokerExt::call`] with their method paths.
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Sends a raw request to `method` (`/{service}/{method}`) and waits for
    /// the raw response.
    ///
    /// # Errors
    ///
    /// Returns the status the call failed with.
    async fn unary(&self, method: &str, request: Request<Bytes>) -> Result<Response<Bytes>, Status>;
}

/// Typed calls on top of [`Invoker`], encoding messages with the CBOR codec.
#[async_trait]
pub trait InvokerExt: Invoker {
    /// Encodes the request, sends it and decodes the response.
    ///
    /// # Errors
    ///
    /// Returns the status the call failed with; encoding and decoding
    /// failures are reported as `Internal`.
    async fn call<Req, Res>(
        &self,
        method: &str,
        request: Request<Req>,
    ) -> Result<Response<Res>, Status>
    where
        Req: Serialize + Send + 'static,
        Res: DeserializeOwned + Send + 'static;
}

#[async_trait]
impl<T: Invoker + ?Sized> InvokerExt for T {
    async fn call<Req, Res>(
        &self,
        method: &str,
        request: Request<Req>,
    ) -> Result<Response<Res>, Status>
    where
        Req: Serialize + Send + 'static,
        Res: DeserializeOwned + Send + 'static,
    {
        let payload = codec::encode(request.get_ref())
            .map_err(|e| Status::internal(format!("failed to encode request: {e}")))?;
        let request = request.map(|_| payload);

        let (metadata, payload) = self.unary(method, request).await?.into_parts();
        let message = codec::decode(&payload)
            .map_err(|e| Status::internal(format!("failed to decode response: {e}")))?;

        Ok(Response::with_metadata(message, metadata))
    }
}
