//! A single multiplexed client connection to one server address.

use crate::protocol::{Frame, FrameCodec, FrameType, RequestEnvelope, ResponseEnvelope};
use crate::request::{Request, Response};
use crate::status::Status;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type FrameSink = SplitSink<Framed<TcpStream, FrameCodec>, Frame>;
type FrameStream = SplitStream<Framed<TcpStream, FrameCodec>>;
type PendingCalls = DashMap<u64, oneshot::Sender<ResponseEnvelope>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// An established transport to one server.
///
/// Calls are multiplexed: each request carries an id and the reader task
/// routes responses back to the waiting caller. The connection becomes
/// unusable once the server announces a drain (go-away) or the socket
/// closes; see [`Connection::retired`].
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    sink: Arc<Mutex<FrameSink>>,
    pending: Arc<PendingCalls>,
    next_call_id: AtomicU64,
    go_away: CancellationToken,
    closed: CancellationToken,
}

impl Connection {
    /// Connects to `addr` and starts the reader task.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established within
    /// `connect_timeout`.
    pub async fn connect(
        addr: &str,
        connect_timeout: Duration,
        max_frame_size: usize,
    ) -> io::Result<Arc<Self>> {
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connecting to {addr} timed out after {connect_timeout:?}"),
                )
            })??;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;

        let framed = Framed::new(
            stream,
            FrameCodec::new().with_max_frame_size(max_frame_size),
        );
        let (sink, stream) = framed.split();

        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            sink: Arc::new(Mutex::new(sink)),
            pending: Arc::new(DashMap::new()),
            next_call_id: AtomicU64::new(1),
            go_away: CancellationToken::new(),
            closed: CancellationToken::new(),
        });

        tokio::spawn(Self::read_loop(
            stream,
            conn.peer,
            Arc::clone(&conn.sink),
            Arc::clone(&conn.pending),
            conn.go_away.clone(),
            conn.closed.clone(),
        ));

        debug!("Created connection {} to {}", conn.id, peer);

        Ok(conn)
    }

    /// Get the connection ID.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Address of the server.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether new calls may be sent on this connection.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !self.closed.is_cancelled() && !self.go_away.is_cancelled()
    }

    /// Number of calls waiting for a response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Resolves once the connection stops accepting new calls, either because
    /// the server is draining or because the socket is gone.
    pub async fn retired(&self) {
        tokio::select! {
            () = self.go_away.cancelled() => {}
            () = self.closed.cancelled() => {}
        }
    }

    /// Closes the connection. Calls still waiting fail with `Unavailable`.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns the status carried by the response, `Unavailable` if the
    /// connection fails, or `DeadlineExceeded` if the request timeout elapses.
    pub async fn call(
        &self,
        method: &str,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, Status> {
        if self.closed.is_cancelled() {
            return Err(Status::unavailable("connection closed"));
        }

        let call_timeout = request.timeout();
        let id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let (metadata, payload) = request.into_parts();

        let envelope = RequestEnvelope {
            id,
            method: method.to_string(),
            metadata,
            timeout_ms: call_timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            payload: payload.to_vec(),
        };
        let frame = envelope.into_frame().map_err(Status::from)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let exchange = self.exchange(frame, rx);
        let envelope = match call_timeout {
            Some(t) => timeout(t, exchange)
                .await
                .map_err(|_| Status::deadline_exceeded(format!("deadline of {t:?} exceeded")))??,
            None => exchange.await?,
        };

        let (metadata, payload) = envelope.into_result()?;
        Ok(Response::with_metadata(payload, metadata))
    }

    async fn exchange(
        &self,
        frame: Frame,
        rx: oneshot::Receiver<ResponseEnvelope>,
    ) -> Result<ResponseEnvelope, Status> {
        {
            let mut sink = self.sink.lock().await;
            sink.send(frame)
                .await
                .map_err(|e| Status::unavailable(format!("failed to send request: {e}")))?;
        }

        tokio::select! {
            response = rx => {
                response.map_err(|_| Status::unavailable("connection closed before response"))
            }
            () = self.closed.cancelled() => Err(Status::unavailable("connection closed")),
        }
    }

    async fn read_loop(
        mut stream: FrameStream,
        peer: SocketAddr,
        sink: Arc<Mutex<FrameSink>>,
        pending: Arc<PendingCalls>,
        go_away: CancellationToken,
        closed: CancellationToken,
    ) {
        loop {
            tokio::select! {
                frame = stream.next() => {
                    match frame {
                        Some(Ok(frame)) => match frame.frame_type {
                            FrameType::Response => {
                                match ResponseEnvelope::from_payload(&frame.payload) {
                                    Ok(response) => {
                                        if let Some((_, sender)) = pending.remove(&response.id) {
                                            let _ = sender.send(response);
                                        } else {
                                            warn!("Received response for unknown call {} from {}", response.id, peer);
                                        }
                                    }
                                    Err(e) => {
                                        error!("Failed to decode response from {}: {}", peer, e);
                                    }
                                }
                            }
                            FrameType::GoAway => {
                                debug!("Server {} is draining", peer);
                                go_away.cancel();
                            }
                            FrameType::Request => {
                                warn!("Unexpected request frame from {}", peer);
                            }
                        },
                        Some(Err(e)) => {
                            error!("Stream error from {}: {}", peer, e);
                            break;
                        }
                        None => {
                            debug!("Connection to {} closed by peer", peer);
                            break;
                        }
                    }
                }
                () = closed.cancelled() => {
                    debug!("Connection to {} closed locally", peer);
                    break;
                }
            }
        }

        closed.cancel();
        // Dropping the senders wakes every waiting caller.
        pending.clear();
        let _ = sink.lock().await.close().await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::status::Code;
    use tokio::net::TcpListener;

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new());
            while let Some(Ok(frame)) = framed.next().await {
                let request = RequestEnvelope::from_payload(&frame.payload).unwrap();
                let response = if request.method == "/test.Echo/Fail" {
                    ResponseEnvelope::error(request.id, &Status::not_found("nothing here"))
                } else {
                    ResponseEnvelope::ok(request.id, request.metadata, request.payload.into())
                };
                framed.send(response.into_frame().unwrap()).await.unwrap();
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let addr = echo_server().await;
        let conn = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024)
            .await
            .unwrap();

        let mut metadata = Metadata::new();
        metadata.insert("k", "v");
        let request = Request::with_metadata(Bytes::from("ping"), metadata);

        let response = conn.call("/test.Echo/Echo", request).await.unwrap();
        assert_eq!(response.get_ref(), &Bytes::from("ping"));
        assert_eq!(response.metadata().get("k"), Some("v"));
        assert_eq!(conn.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_returned() {
        let addr = echo_server().await;
        let conn = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024)
            .await
            .unwrap();

        let status = conn
            .call("/test.Echo/Fail", Request::new(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
    }

    #[tokio::test]
    async fn test_closed_connection_rejects_calls() {
        let addr = echo_server().await;
        let conn = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024)
            .await
            .unwrap();

        conn.close();
        assert!(!conn.is_available());

        let status = conn
            .call("/test.Echo/Echo", Request::new(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test]
    async fn test_unresponsive_server_hits_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let conn = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024)
            .await
            .unwrap();

        let mut request = Request::new(Bytes::from("ping"));
        request.set_timeout(Duration::from_millis(50));

        let status = conn.call("/test.Echo/Echo", request).await.unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(conn.in_flight(), 0);
    }
}
