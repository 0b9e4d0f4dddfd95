//! Serving the host's services over plain HTTP.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use conduit_rpc::{Code, Metadata, Request, Status};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::dispatcher::Dispatcher;
use crate::host::ServiceHost;
use crate::service::CallResult;

/// Response header carrying the numeric status code.
pub const STATUS_HEADER: &str = "rpc-status";

/// Response header carrying the status message of a failed call.
pub const MESSAGE_HEADER: &str = "rpc-message";

/// Request header with the caller's timeout in milliseconds.
pub const TIMEOUT_HEADER: &str = "rpc-timeout";

#[derive(Clone)]
struct Bridge {
    dispatcher: Arc<Dispatcher>,
    task_tracker: TaskTracker,
    drain: CancellationToken,
    terminate: CancellationToken,
}

impl ServiceHost {
    /// An HTTP router dispatching `POST /{service}/{method}` into this host.
    ///
    /// Request headers become call metadata and the body is the raw
    /// payload. The HTTP status is always 200; the call outcome is in the
    /// `rpc-status` and `rpc-message` headers, next to the response
    /// metadata. Calls go through the same interceptors and panic recovery
    /// as TCP calls and are waited for by a graceful stop. Once the host is
    /// stopping, new calls are answered with `Unavailable`; [`stop`] also
    /// abandons the ones in flight.
    ///
    /// [`stop`]: ServiceHost::stop
    pub fn router(&self) -> Router {
        let (drain, terminate) = self.shutdown_tokens();
        let bridge = Bridge {
            dispatcher: Arc::clone(self.dispatcher()),
            task_tracker: self.task_tracker().clone(),
            drain: drain.clone(),
            terminate: terminate.clone(),
        };

        Router::new()
            .route("/{service}/{method}", post(handle_call))
            .with_state(bridge)
    }
}

async fn handle_call(
    State(bridge): State<Bridge>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/{service}/{method}");
    if bridge.drain.is_cancelled() {
        return into_http_response(Err(Status::unavailable("server is shutting down")));
    }

    let mut request = Request::with_metadata(body, metadata_from_headers(&headers));
    if let Some(timeout) = headers
        .get(TIMEOUT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
    {
        request.set_timeout(Duration::from_millis(timeout));
    }

    let dispatcher = Arc::clone(&bridge.dispatcher);
    let terminate = bridge.terminate;
    let result = bridge
        .task_tracker
        .track_future(async move {
            tokio::select! {
                result = dispatcher.dispatch(&path, request) => result,
                () = terminate.cancelled() => {
                    debug!("Abandoning {} received over HTTP", path);
                    Err(Status::unavailable("server stopped"))
                }
            }
        })
        .await;

    into_http_response(result)
}

fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn into_http_response(result: CallResult) -> Response {
    let (code, message, metadata, body) = match result {
        Ok(response) => {
            let (metadata, payload) = response.into_parts();
            (Code::Ok, String::new(), metadata, payload)
        }
        Err(status) => (
            status.code(),
            status.message().to_string(),
            Metadata::new(),
            Bytes::new(),
        ),
    };

    let mut headers = HeaderMap::new();
    for (key, value) in metadata.iter() {
        match (HeaderName::try_from(key), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Dropping response metadata {:?}: not a valid HTTP header", key),
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/cbor"));
    headers.insert(STATUS_HEADER, HeaderValue::from(u16::from(code as u8)));
    if !message.is_empty() {
        let printable: String = message
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .collect();
        if let Ok(value) = HeaderValue::try_from(printable) {
            headers.insert(MESSAGE_HEADER, value);
        }
    }

    (StatusCode::OK, headers, body).into_response()
}
