//! Serving calls on one accepted TCP connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use conduit_rpc::protocol::{Frame, FrameCodec, FrameType, RequestEnvelope, ResponseEnvelope};
use conduit_rpc::{Bytes, Request, Status};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, instrument, warn};

use crate::dispatcher::Dispatcher;

/// What every connection task shares with the host.
#[derive(Clone)]
pub struct ConnectionContext {
    pub dispatcher: Arc<Dispatcher>,
    pub max_frame_size: usize,
    /// Cancelled by a graceful stop: send go-away, finish in-flight calls.
    pub drain: CancellationToken,
    /// Cancelled by an immediate stop: drop everything.
    pub terminate: CancellationToken,
}

/// Reads requests until the peer leaves or the host stops.
///
/// Every request runs as its own task; responses are written by a single
/// writer task in completion order.
#[instrument(skip_all, fields(peer = %peer))]
pub async fn serve_connection(stream: TcpStream, peer: SocketAddr, ctx: ConnectionContext) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let framed = Framed::new(
        stream,
        FrameCodec::new().with_max_frame_size(ctx.max_frame_size),
    );
    let (mut sink, mut frames) = framed.split();
    let (responses, mut outgoing) = mpsc::unbounded_channel::<Frame>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            if let Err(e) = sink.send(frame).await {
                warn!("Failed to write response to {}: {}", peer, e);
                break;
            }
        }
        let _ = sink.close().await;
    });
    let writer_abort = writer.abort_handle();

    let calls = TaskTracker::new();
    let mut draining = false;

    loop {
        tokio::select! {
            biased;

            () = ctx.terminate.cancelled() => break,
            () = ctx.drain.cancelled(), if !draining => {
                draining = true;
                calls.close();
                let _ = responses.send(Frame::go_away());
                debug!("Sent go-away to {}, {} calls in flight", peer, calls.len());
            }
            () = calls.wait(), if draining => break,
            frame = frames.next() => match frame {
                Some(Ok(frame)) if frame.frame_type == FrameType::Request => {
                    match RequestEnvelope::from_payload(&frame.payload) {
                        Ok(envelope) if draining => {
                            let status = Status::unavailable("server is shutting down");
                            send_response(&responses, &ResponseEnvelope::error(envelope.id, &status));
                        }
                        Ok(envelope) => {
                            calls.spawn(run_call(envelope, peer, ctx.clone(), responses.clone()));
                        }
                        Err(e) => warn!("Failed to decode request from {}: {}", peer, e),
                    }
                }
                Some(Ok(frame)) => warn!("Unexpected {:?} frame from {}", frame.frame_type, peer),
                Some(Err(e)) => {
                    warn!("Failed to read frame from {}: {}", peer, e);
                    break;
                }
                None => {
                    debug!("Connection closed by {}", peer);
                    break;
                }
            }
        }
    }

    calls.close();
    tokio::select! {
        () = calls.wait() => {}
        () = ctx.terminate.cancelled() => {}
    }

    drop(responses);
    tokio::select! {
        _ = writer => {}
        () = ctx.terminate.cancelled() => writer_abort.abort(),
    }
    debug!("Finished serving {}", peer);
}

async fn run_call(
    envelope: RequestEnvelope,
    peer: SocketAddr,
    ctx: ConnectionContext,
    responses: mpsc::UnboundedSender<Frame>,
) {
    let RequestEnvelope {
        id,
        method,
        metadata,
        timeout_ms,
        payload,
    } = envelope;

    let mut request = Request::with_metadata(Bytes::from(payload), metadata);
    request.set_remote_addr(peer);
    if let Some(timeout_ms) = timeout_ms {
        request.set_timeout(Duration::from_millis(timeout_ms));
    }

    let result = tokio::select! {
        result = ctx.dispatcher.dispatch(&method, request) => result,
        () = ctx.terminate.cancelled() => {
            debug!("Abandoning {} from {}", method, peer);
            return;
        }
    };

    let response = match result {
        Ok(response) => {
            let (metadata, payload) = response.into_parts();
            ResponseEnvelope::ok(id, metadata, payload)
        }
        Err(status) => ResponseEnvelope::error(id, &status),
    };
    send_response(&responses, &response);
}

fn send_response(responses: &mpsc::UnboundedSender<Frame>, response: &ResponseEnvelope) {
    match response.into_frame() {
        Ok(frame) => {
            let _ = responses.send(frame);
        }
        Err(e) => error!("Failed to encode response for call {}: {}", response.id, e),
    }
}
