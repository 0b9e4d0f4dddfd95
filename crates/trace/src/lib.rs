//! Trace context propagation across the RPC boundary.
//!
//! The caller's trace id and span id travel as two metadata entries,
//! `X-Trace-Id` and `X-Span-Id`, encoded as lower-case hex. On the server the
//! pair becomes the parent of the handler's span, so the callee's work shows
//! up inside the caller's trace instead of starting a new one.
//!
//! Extraction never fails a call: absent or malformed ids simply leave the
//! context as it was.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod error;
mod interceptor;

pub use codec::{
    SPAN_ID_KEY, TRACE_ID_KEY, extract_ids, extract_parent, inject, inject_current,
};
pub use error::ExtractError;
pub use interceptor::{ParentExtractor, SpanInjector};
