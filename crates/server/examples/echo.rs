//! Hosts an echo service, calls it through a round-robin client and shuts
//! down gracefully on Ctrl+C.
//!
//! Run with `RUST_LOG=debug cargo run --example echo` to see per-call logs.

use std::sync::Arc;
use std::time::Duration;

use conduit_client::{ClientConfig, ClientConn, ConnectionManager, DialOption};
use conduit_rpc::{InvokerExt, Request, Response, Status};
use conduit_server::{HostConfig, ServiceDescriptor, ServiceHost};
use conduit_trace::SpanInjector;
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Echo;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let descriptor = ServiceDescriptor::new("echo.Echo").unary(
        "Echo",
        |_echo: Arc<Echo>, request: Request<String>| async move {
            Ok::<_, Status>(Response::new(request.into_inner()))
        },
    );

    let host = Arc::new(ServiceHost::new(
        HostConfig::new("127.0.0.1:0", descriptor, Echo)
            .with_shutdown_timeout(Duration::from_millis(500)),
    )?);
    let serving = tokio::spawn({
        let host = Arc::clone(&host);
        async move { host.start().await }
    });

    let manager = ConnectionManager::new();
    let handle = manager.new_client(
        ClientConfig::new("echo", [host.local_addr().to_string()], |conn: ClientConn| conn)
            .with_dial_option(DialOption::Interceptor(Arc::new(SpanInjector))),
    )?;

    let reply = handle
        .client()
        .call::<String, String>("/echo.Echo/Echo", Request::new("hello".to_string()))
        .await?;
    info!("Echo replied {:?}", reply.get_ref());

    info!("Press Ctrl+C to stop...");
    tokio::signal::ctrl_c().await?;

    handle.close();
    host.graceful_stop().await;
    serving.await??;

    Ok(())
}
