//! Reading and writing the trace/span id pair carried in call metadata.

use conduit_rpc::Metadata;
use opentelemetry::Context;
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use tracing::trace;

use crate::error::ExtractError;

/// Metadata key holding the 32-character hex trace id.
pub const TRACE_ID_KEY: &str = "X-Trace-Id";

/// Metadata key holding the 16-character hex span id.
pub const SPAN_ID_KEY: &str = "X-Span-Id";

const TRACE_ID_HEX_LEN: usize = 32;
const SPAN_ID_HEX_LEN: usize = 16;

/// Reads and validates the trace and span ids from metadata.
///
/// # Errors
///
/// Returns [`ExtractError::Missing`] if either key is absent and
/// [`ExtractError::Malformed`] if a value is not a lower-case, non-zero hex
/// string of the right width.
pub fn extract_ids(metadata: &Metadata) -> Result<(TraceId, SpanId), ExtractError> {
    let raw_trace_id = metadata
        .get(TRACE_ID_KEY)
        .ok_or(ExtractError::Missing(TRACE_ID_KEY))?;
    let raw_span_id = metadata
        .get(SPAN_ID_KEY)
        .ok_or(ExtractError::Missing(SPAN_ID_KEY))?;

    let trace_id = parse_hex_id(TRACE_ID_KEY, raw_trace_id, TRACE_ID_HEX_LEN)
        .and_then(|raw| TraceId::from_hex(raw).map_err(|_| malformed(TRACE_ID_KEY, raw)))?;
    let span_id = parse_hex_id(SPAN_ID_KEY, raw_span_id, SPAN_ID_HEX_LEN)
        .and_then(|raw| SpanId::from_hex(raw).map_err(|_| malformed(SPAN_ID_KEY, raw)))?;

    Ok((trace_id, span_id))
}

/// Installs the caller's span, read from `metadata`, as the parent in `cx`.
///
/// Never fails: if either id is missing or malformed the input context is
/// returned unchanged, so trace-unaware callers are served normally. The
/// installed span context is marked sampled and local, as the caller
/// already made the sampling decision.
#[must_use]
pub fn extract_parent(cx: &Context, metadata: &Metadata) -> Context {
    match extract_ids(metadata) {
        Ok((trace_id, span_id)) => {
            let parent = SpanContext::new(
                trace_id,
                span_id,
                TraceFlags::SAMPLED,
                false,
                TraceState::default(),
            );
            cx.with_remote_span_context(parent)
        }
        Err(e @ ExtractError::Missing(_)) => {
            trace!("no trace parent in metadata: {}", e);
            cx.clone()
        }
        Err(e) => {
            trace!("ignoring malformed trace parent: {}", e);
            cx.clone()
        }
    }
}

/// Writes the ids of the span active in `cx` into `metadata`.
///
/// Existing values for the two keys are replaced. With no active span the
/// all-zero ids are written; callers that care must start a span first.
pub fn inject(cx: &Context, metadata: &mut Metadata) {
    let span = cx.span();
    let span_context = span.span_context();

    metadata.insert(TRACE_ID_KEY, span_context.trace_id().to_string());
    metadata.insert(SPAN_ID_KEY, span_context.span_id().to_string());
}

/// [`inject`] using the current OpenTelemetry context.
pub fn inject_current(metadata: &mut Metadata) {
    inject(&Context::current(), metadata);
}

fn parse_hex_id<'a>(key: &'static str, raw: &'a str, width: usize) -> Result<&'a str, ExtractError> {
    let well_formed = raw.len() == width
        && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && raw.bytes().any(|b| b != b'0');

    if well_formed {
        Ok(raw)
    } else {
        Err(malformed(key, raw))
    }
}

fn malformed(key: &'static str, raw: &str) -> ExtractError {
    ExtractError::Malformed {
        key,
        value: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{Tracer, TracerProvider as _};
    use opentelemetry_sdk::trace::TracerProvider;
    use proptest::prelude::*;

    const TRACE_HEX: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_HEX: &str = "00f067aa0ba902b7";

    fn metadata(trace_id: Option<&str>, span_id: Option<&str>) -> Metadata {
        let mut md = Metadata::new();
        if let Some(trace_id) = trace_id {
            md.insert(TRACE_ID_KEY, trace_id);
        }
        if let Some(span_id) = span_id {
            md.insert(SPAN_ID_KEY, span_id);
        }
        md
    }

    fn context_with_parent(trace_id: u128, span_id: u64) -> Context {
        Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_bytes(trace_id.to_be_bytes()),
            SpanId::from_bytes(span_id.to_be_bytes()),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    }

    #[test]
    fn test_extract_builds_sampled_local_parent() {
        let cx = extract_parent(&Context::new(), &metadata(Some(TRACE_HEX), Some(SPAN_HEX)));

        let span = cx.span();
        let parent = span.span_context();
        assert!(cx.has_active_span());
        assert_eq!(parent.trace_id().to_string(), TRACE_HEX);
        assert_eq!(parent.span_id().to_string(), SPAN_HEX);
        assert!(parent.is_sampled());
        assert!(!parent.is_remote());
    }

    #[test]
    fn test_missing_key_returns_input_context() {
        let input = context_with_parent(7, 9);

        for md in [
            metadata(None, None),
            metadata(Some(TRACE_HEX), None),
            metadata(None, Some(SPAN_HEX)),
        ] {
            let out = extract_parent(&input, &md);
            assert_eq!(
                out.span().span_context(),
                input.span().span_context(),
                "metadata {md:?} must leave the context untouched"
            );
        }
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let cases = [
            (TRACE_HEX.to_uppercase(), SPAN_HEX.to_string()),
            (TRACE_HEX[..31].to_string(), SPAN_HEX.to_string()),
            (format!("{TRACE_HEX}0"), SPAN_HEX.to_string()),
            ("0".repeat(32), SPAN_HEX.to_string()),
            (TRACE_HEX.to_string(), "0".repeat(16)),
            (TRACE_HEX.to_string(), "zz".repeat(8)),
            (format!("+{}", &TRACE_HEX[1..]), SPAN_HEX.to_string()),
        ];

        for (trace_id, span_id) in cases {
            let md = metadata(Some(&trace_id), Some(&span_id));
            assert!(
                matches!(extract_ids(&md), Err(ExtractError::Malformed { .. })),
                "{trace_id}/{span_id} should be rejected"
            );

            let out = extract_parent(&Context::new(), &md);
            assert!(!out.has_active_span());
        }
    }

    #[test]
    fn test_missing_and_malformed_are_distinguished() {
        assert_eq!(
            extract_ids(&metadata(None, Some(SPAN_HEX))),
            Err(ExtractError::Missing(TRACE_ID_KEY))
        );
        assert_eq!(
            extract_ids(&metadata(Some(TRACE_HEX), Some("nope"))),
            Err(ExtractError::Malformed {
                key: SPAN_ID_KEY,
                value: "nope".to_string(),
            })
        );
    }

    #[test]
    fn test_inject_without_span_writes_zero_ids() {
        let mut md = Metadata::new();
        inject(&Context::new(), &mut md);

        assert_eq!(md.get(TRACE_ID_KEY), Some("0".repeat(32).as_str()));
        assert_eq!(md.get(SPAN_ID_KEY), Some("0".repeat(16).as_str()));
    }

    #[test]
    fn test_inject_replaces_previous_values() {
        let mut md = metadata(Some("stale"), Some("stale"));
        inject(&context_with_parent(1, 2), &mut md);

        assert_eq!(md.get_all(TRACE_ID_KEY).count(), 1);
        assert_eq!(md.get(SPAN_ID_KEY), Some("0000000000000002"));
    }

    #[test]
    fn test_round_trip_from_recording_span() {
        let provider = TracerProvider::builder().build();
        let tracer = provider.tracer("conduit-trace-test");
        let caller = Context::current_with_span(tracer.start("caller"));

        let mut md = Metadata::new();
        inject(&caller, &mut md);
        let callee = extract_parent(&Context::new(), &md);

        let caller_span = caller.span();
        let callee_span = callee.span();
        assert_eq!(
            callee_span.span_context().trace_id(),
            caller_span.span_context().trace_id()
        );
        assert_eq!(
            callee_span.span_context().span_id(),
            caller_span.span_context().span_id()
        );
    }

    proptest! {
        #[test]
        fn prop_round_trip_preserves_ids(trace_id in 1..=u128::MAX, span_id in 1..=u64::MAX) {
            let mut md = Metadata::new();
            inject(&context_with_parent(trace_id, span_id), &mut md);

            let (extracted_trace, extracted_span) = extract_ids(&md).unwrap();
            prop_assert_eq!(extracted_trace, TraceId::from_bytes(trace_id.to_be_bytes()));
            prop_assert_eq!(extracted_span, SpanId::from_bytes(span_id.to_be_bytes()));
        }
    }
}
