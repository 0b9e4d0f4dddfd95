use std::time::Duration;

use conduit_rpc::protocol::{Frame, FrameCodec, FrameType, RequestEnvelope, ResponseEnvelope};
use conduit_rpc::{Bytes, Code, Connection, Metadata, Request};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

#[tokio::test]
async fn test_go_away_retires_connection_but_answers_in_flight_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());

        let frame = framed.next().await.unwrap().unwrap();
        assert_eq!(frame.frame_type, FrameType::Request);
        let request = RequestEnvelope::from_payload(&frame.payload).unwrap();
        assert_eq!(request.timeout_ms, Some(5_000));

        framed.send(Frame::go_away()).await.unwrap();
        let response = ResponseEnvelope::ok(request.id, Metadata::new(), Bytes::from_static(b"last"));
        framed.send(response.into_frame().unwrap()).await.unwrap();

        // Stay open until the client hangs up.
        while framed.next().await.is_some() {}
    });

    let conn = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024 * 1024)
        .await
        .unwrap();
    assert!(conn.is_available());

    let mut request = Request::new(Bytes::from_static(b"first"));
    request.set_timeout(Duration::from_secs(5));
    let response = conn.call("/test.Drain/Call", request).await.unwrap();
    assert_eq!(response.into_inner(), Bytes::from_static(b"last"));

    tokio::time::timeout(Duration::from_secs(1), conn.retired())
        .await
        .unwrap();
    assert!(!conn.is_available());

    drop(conn);
    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_connect_to_closed_port_fails() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let result = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_peer_hangup_fails_pending_call() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, FrameCodec::new());
        let _ = framed.next().await;
    });

    let conn = Connection::connect(&addr.to_string(), Duration::from_secs(1), 1024)
        .await
        .unwrap();

    let status = conn
        .call("/test.Drain/Call", Request::new(Bytes::new()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert!(!conn.is_available());
}
