//! Interceptors wiring the codec into client and server call paths.

use conduit_rpc::{Bytes, ClientInterceptor, Request, ServerInterceptor, Status};
use opentelemetry::Context;

use crate::codec::{extract_parent, inject};

/// Server interceptor that reads the caller's span from request metadata.
///
/// The resulting [`Context`] is stored in the request extensions; the host
/// runs the handler inside it. When the metadata carries no usable ids the
/// stored context is the one current at interception time.
#[derive(Clone, Copy, Debug, Default)]
pub struct ParentExtractor;

impl ServerInterceptor for ParentExtractor {
    fn intercept(&self, _method: &str, mut request: Request<Bytes>) -> Result<Request<Bytes>, Status> {
        let cx = extract_parent(&Context::current(), request.metadata());
        request.extensions_mut().insert(cx);
        Ok(request)
    }
}

/// Client interceptor that writes the current span into request metadata.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpanInjector;

impl ClientInterceptor for SpanInjector {
    fn intercept(&self, _method: &str, mut request: Request<Bytes>) -> Result<Request<Bytes>, Status> {
        inject(&Context::current(), request.metadata_mut());
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{SPAN_ID_KEY, TRACE_ID_KEY};
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };

    #[test]
    fn test_injector_then_extractor_links_spans() {
        let caller = Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes(42u128.to_be_bytes()),
            SpanId::from_bytes(7u64.to_be_bytes()),
            TraceFlags::SAMPLED,
            false,
            TraceState::default(),
        ));

        let request = {
            let _guard = caller.attach();
            SpanInjector
                .intercept("/svc/Method", Request::new(Bytes::new()))
                .unwrap()
        };
        assert_eq!(
            request.metadata().get(TRACE_ID_KEY),
            Some("0000000000000000000000000000002a")
        );
        assert_eq!(request.metadata().get(SPAN_ID_KEY), Some("0000000000000007"));

        let request = ParentExtractor.intercept("/svc/Method", request).unwrap();
        let cx = request.extensions().get::<Context>().unwrap();
        let span = cx.span();
        assert_eq!(span.span_context().span_id(), SpanId::from_bytes(7u64.to_be_bytes()));
    }

    #[test]
    fn test_extractor_always_attaches_a_context() {
        let request = ParentExtractor
            .intercept("/svc/Method", Request::new(Bytes::new()))
            .unwrap();
        let cx = request.extensions().get::<Context>().unwrap();
        assert!(!cx.has_active_span());
    }
}
