//! Turning handler panics into call errors.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use conduit_rpc::Status;
use futures::FutureExt;
use tracing::error;

use crate::service::CallResult;

/// Converts a recovered panic payload into the status returned to the caller.
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) -> Status + Send + Sync>;

/// The handler used when none is configured: `Internal` with the panic message.
#[must_use]
pub fn default_panic_handler() -> PanicHandler {
    Arc::new(|payload| Status::internal(panic_message(payload.as_ref())))
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Drives `call`, answering a panic with the handler's status.
pub(crate) async fn recover<F>(method: &str, call: F, handler: &PanicHandler) -> CallResult
where
    F: Future<Output = CallResult>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            error!(
                "Recovered from panic in {}: {}",
                method,
                panic_message(payload.as_ref())
            );
            Err(handler(payload))
        }
    }
}
