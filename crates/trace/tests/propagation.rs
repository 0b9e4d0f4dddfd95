use conduit_rpc::{Bytes, ClientInterceptor, Metadata, Request, ServerInterceptor};
use conduit_trace::{
    ParentExtractor, SPAN_ID_KEY, SpanInjector, TRACE_ID_KEY, extract_parent, inject_current,
};
use opentelemetry::Context;
use opentelemetry::trace::{Span as _, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry_sdk::trace::TracerProvider;
use tracing_test::traced_test;

#[test]
fn test_caller_span_becomes_callee_parent() {
    let provider = TracerProvider::builder().build();
    let tracer = provider.tracer("propagation-test");
    let caller = Context::current_with_span(tracer.start("caller"));

    let outbound = {
        let _guard = caller.clone().attach();
        SpanInjector
            .intercept("/orders.Orders/Get", Request::new(Bytes::new()))
            .unwrap()
    };

    let inbound = ParentExtractor
        .intercept("/orders.Orders/Get", outbound)
        .unwrap();
    let callee_parent = inbound.extensions().get::<Context>().unwrap();

    let callee_span = callee_parent.span();
    let caller_span = caller.span();
    assert_eq!(
        callee_span.span_context().trace_id(),
        caller_span.span_context().trace_id()
    );
    assert_eq!(
        callee_span.span_context().span_id(),
        caller_span.span_context().span_id()
    );

    // A child started under the extracted parent stays in the caller's trace.
    let child = tracer.start_with_context("callee", callee_parent);
    assert_eq!(
        child.span_context().trace_id(),
        caller_span.span_context().trace_id()
    );
}

#[test]
fn test_inject_current_uses_attached_context() {
    let provider = TracerProvider::builder().build();
    let tracer = provider.tracer("propagation-test");
    let cx = Context::current_with_span(tracer.start("work"));

    let mut metadata = Metadata::new();
    {
        let _guard = cx.clone().attach();
        inject_current(&mut metadata);
    }

    let span = cx.span();
    assert_eq!(
        metadata.get(TRACE_ID_KEY),
        Some(span.span_context().trace_id().to_string().as_str())
    );
    assert_eq!(
        metadata.get(SPAN_ID_KEY),
        Some(span.span_context().span_id().to_string().as_str())
    );
}

#[traced_test]
#[test]
fn test_missing_and_malformed_are_logged_differently() {
    let untouched = extract_parent(&Context::new(), &Metadata::new());
    assert!(!untouched.has_active_span());
    assert!(logs_contain("no trace parent in metadata"));

    let metadata: Metadata = [
        (TRACE_ID_KEY, "4BF92F3577B34DA6A3CE929D0E0E4736"),
        (SPAN_ID_KEY, "00f067aa0ba902b7"),
    ]
    .into_iter()
    .collect();
    let untouched = extract_parent(&Context::new(), &metadata);
    assert!(!untouched.has_active_span());
    assert!(logs_contain("ignoring malformed trace parent"));
}
