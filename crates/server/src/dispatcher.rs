//! Routes calls to registered handlers.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use conduit_rpc::{Bytes, Code, Request, ServerInterceptor, Status};
use opentelemetry::Context;
use opentelemetry::trace::FutureExt as _;
use parking_lot::RwLock;
use tracing::{Instrument, Span, debug, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::error::{Error, Result};
use crate::recovery::{PanicHandler, recover};
use crate::service::{BoundHandler, CallResult, RegisteredService, ServiceInfo, split_method_path};

/// The method table shared by the TCP listener and the HTTP bridge.
pub struct Dispatcher {
    services: RwLock<HashMap<String, RegisteredService>>,
    interceptors: Vec<Arc<dyn ServerInterceptor>>,
    panic_handler: PanicHandler,
}

impl Dispatcher {
    pub fn new(interceptors: Vec<Arc<dyn ServerInterceptor>>, panic_handler: PanicHandler) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            interceptors,
            panic_handler,
        }
    }

    pub fn register(&self, name: String, service: RegisteredService) -> Result<()> {
        match self.services.write().entry(name) {
            Entry::Occupied(entry) => Err(Error::DuplicateService(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(
                    "Registered service {} with {} methods",
                    entry.key(),
                    service.methods.len()
                );
                entry.insert(service);
                Ok(())
            }
        }
    }

    pub fn service_info(&self) -> HashMap<String, ServiceInfo> {
        self.services
            .read()
            .iter()
            .map(|(name, service)| (name.clone(), service.info.clone()))
            .collect()
    }

    /// Runs the interceptor chain and the handler for `path`.
    ///
    /// Panics anywhere in the chain are recovered through the panic handler.
    pub async fn dispatch(&self, path: &str, request: Request<Bytes>) -> CallResult {
        let span = info_span!("rpc", method = %path);
        let call = self.handle(path, request, span.clone()).instrument(span);

        let result = recover(path, call, &self.panic_handler).await;
        match &result {
            Ok(_) => debug!("Finished {} with {}", path, Code::Ok),
            Err(status) => debug!("Finished {} with {}: {}", path, status.code(), status.message()),
        }
        result
    }

    async fn handle(&self, path: &str, request: Request<Bytes>, span: Span) -> CallResult {
        let request = self
            .interceptors
            .iter()
            .try_fold(request, |request, interceptor| interceptor.intercept(path, request))?;

        let cx = request
            .extensions()
            .get::<Context>()
            .cloned()
            .unwrap_or_else(Context::current);
        span.set_parent(cx.clone());

        let handler = self.lookup(path)?;
        let deadline = request.timeout();
        let call = async move { handler(request).await }.with_context(cx);

        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, call).await.map_err(|_| {
                Status::deadline_exceeded(format!("handler did not finish within {deadline:?}"))
            })?,
            None => call.await,
        }
    }

    fn lookup(&self, path: &str) -> Result<BoundHandler, Status> {
        let (service, method) = split_method_path(path)
            .ok_or_else(|| Status::unimplemented(format!("malformed method name {path:?}")))?;

        let services = self.services.read();
        let registered = services
            .get(service)
            .ok_or_else(|| Status::unimplemented(format!("unknown service {service}")))?;

        registered.methods.get(method).cloned().ok_or_else(|| {
            Status::unimplemented(format!("unknown method {method} for service {service}"))
        })
    }
}
