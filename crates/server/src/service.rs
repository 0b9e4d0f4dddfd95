//! Service descriptors: the method table a host dispatches into.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conduit_rpc::{Bytes, Request, Response, Status, codec};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Boxed future returned by type-erased handlers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Result of one call.
pub type CallResult = Result<Response<Bytes>, Status>;

type Handler<S> = Arc<dyn Fn(Arc<S>, Request<Bytes>) -> BoxFuture<CallResult> + Send + Sync>;

/// A handler bound to its service instance.
pub(crate) type BoundHandler = Arc<dyn Fn(Request<Bytes>) -> BoxFuture<CallResult> + Send + Sync>;

/// Describes one service: its name and the handlers for its methods.
///
/// Handlers receive the shared service value and the decoded request. A
/// method is addressed on the wire as `/{service}/{method}`.
pub struct ServiceDescriptor<S> {
    name: String,
    metadata: Option<String>,
    methods: Vec<(String, Handler<S>)>,
}

impl<S> ServiceDescriptor<S>
where
    S: Send + Sync + 'static,
{
    /// Starts a descriptor for the service called `name`, e.g. `orders.Orders`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: None,
            methods: Vec::new(),
        }
    }

    /// Attaches free-form descriptor metadata, usually the schema file name.
    #[must_use]
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Adds a method working on raw payload bytes.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Arc<S>, Request<Bytes>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallResult> + Send + 'static,
    {
        let handler: Handler<S> = Arc::new(move |service, request| Box::pin(handler(service, request)));
        self.methods.push((name.into(), handler));
        self
    }

    /// Adds a method whose request and response are CBOR-encoded messages.
    ///
    /// A request that does not decode is answered with `InvalidArgument`
    /// without invoking the handler.
    #[must_use]
    pub fn unary<Req, Res, F, Fut>(self, name: impl Into<String>, handler: F) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        F: Fn(Arc<S>, Request<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Res>, Status>> + Send + 'static,
    {
        let handler = Arc::new(handler);

        self.method(name, move |service, request: Request<Bytes>| {
            let handler = Arc::clone(&handler);
            async move {
                let decoded = codec::decode::<Req>(request.get_ref())
                    .map_err(|e| Status::invalid_argument(format!("failed to decode request: {e}")))?;
                let response = handler(service, request.map(|_| decoded)).await?;

                let (metadata, message) = response.into_parts();
                let payload = codec::encode(&message)
                    .map_err(|e| Status::internal(format!("failed to encode response: {e}")))?;
                Ok::<_, Status>(Response::with_metadata(payload, metadata))
            }
        })
    }

    /// The service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds the handlers to `service`.
    pub(crate) fn bind(self, service: S) -> RegisteredService {
        let service = Arc::new(service);
        let info = ServiceInfo {
            methods: self.methods.iter().map(|(name, _)| name.clone()).collect(),
            metadata: self.metadata,
        };
        let methods = self
            .methods
            .into_iter()
            .map(|(name, handler)| {
                let service = Arc::clone(&service);
                let bound: BoundHandler = Arc::new(move |request| handler(Arc::clone(&service), request));
                (name, bound)
            })
            .collect();

        RegisteredService { info, methods }
    }
}

impl<S> fmt::Debug for ServiceDescriptor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("metadata", &self.metadata)
            .field(
                "methods",
                &self.methods.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// What a host reports about a registered service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    /// Method names in registration order.
    pub methods: Vec<String>,
    /// Descriptor metadata, if any.
    pub metadata: Option<String>,
}

pub(crate) struct RegisteredService {
    pub(crate) info: ServiceInfo,
    pub(crate) methods: HashMap<String, BoundHandler>,
}

/// Splits `/{service}/{method}` into its two parts.
pub(crate) fn split_method_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_rpc::Code;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct Add {
        a: i64,
        b: i64,
    }

    struct Calculator;

    fn descriptor() -> ServiceDescriptor<Calculator> {
        ServiceDescriptor::new("calc.Calculator")
            .with_metadata("calc.proto")
            .unary("Add", |_calc: Arc<Calculator>, request: Request<Add>| async move {
                let Add { a, b } = request.into_inner();
                Ok::<_, Status>(Response::new(a + b))
            })
    }

    #[test]
    fn test_method_path_splitting() {
        assert_eq!(split_method_path("/calc.Calculator/Add"), Some(("calc.Calculator", "Add")));
        for path in ["calc.Calculator/Add", "/calc.Calculator", "//Add", "/calc/", "/a/b/c"] {
            assert_eq!(split_method_path(path), None, "{path}");
        }
    }

    #[tokio::test]
    async fn test_unary_decodes_and_encodes() {
        let registered = descriptor().bind(Calculator);
        assert_eq!(registered.info.methods, ["Add"]);
        assert_eq!(registered.info.metadata.as_deref(), Some("calc.proto"));

        let payload = codec::encode(&Add { a: 2, b: 3 }).unwrap();
        let response = registered.methods["Add"](Request::new(payload)).await.unwrap();
        let sum: i64 = codec::decode(response.get_ref()).unwrap();
        assert_eq!(sum, 5);
    }

    #[tokio::test]
    async fn test_undecodable_request_is_invalid_argument() {
        let registered = descriptor().bind(Calculator);

        let status = registered.methods["Add"](Request::new(Bytes::from_static(b"\xff\x00")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::InvalidArgument);
    }
}
