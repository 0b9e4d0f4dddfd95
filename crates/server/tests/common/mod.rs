#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use conduit_client::ClientConn;
use conduit_rpc::{InvokerExt, Request, Response, Status};
use conduit_server::{HostConfig, ServiceDescriptor, ServiceHost};
use opentelemetry::Context;
use opentelemetry::trace::TraceContextExt;
use tokio::task::JoinHandle;

pub const SERVICE: &str = "test.Echo";

pub struct EchoService {
    pub name: String,
}

pub fn descriptor() -> ServiceDescriptor<EchoService> {
    ServiceDescriptor::new(SERVICE)
        .with_metadata("echo.proto")
        .unary("Echo", |service: Arc<EchoService>, request: Request<String>| async move {
            Ok::<_, Status>(Response::new(format!("{}: {}", service.name, request.into_inner())))
        })
        .unary("Whoami", |service: Arc<EchoService>, _request: Request<()>| async move {
            Ok::<_, Status>(Response::new(service.name.clone()))
        })
        .unary("Sleep", |_service: Arc<EchoService>, request: Request<u64>| async move {
            let millis = request.into_inner();
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok::<_, Status>(Response::new(millis))
        })
        .unary("Boom", |_service: Arc<EchoService>, _request: Request<()>| async move {
            if true {
                panic!("boom");
            }
            Ok::<_, Status>(Response::new(()))
        })
        .unary("TraceId", |_service: Arc<EchoService>, _request: Request<()>| async move {
            let cx = Context::current();
            let trace_id = cx.span().span_context().trace_id().to_string();
            Ok::<_, Status>(Response::new(trace_id))
        })
}

pub fn host(name: &str, shutdown_timeout: Duration) -> Arc<ServiceHost> {
    let config = HostConfig::new(
        "127.0.0.1:0",
        descriptor(),
        EchoService {
            name: name.to_string(),
        },
    )
    .with_shutdown_timeout(shutdown_timeout);

    Arc::new(ServiceHost::new(config).unwrap())
}

pub fn serve(host: &Arc<ServiceHost>) -> JoinHandle<conduit_server::Result<()>> {
    let host = Arc::clone(host);
    tokio::spawn(async move { host.start().await })
}

pub fn start(name: &str, shutdown_timeout: Duration) -> (Arc<ServiceHost>, SocketAddr, JoinHandle<conduit_server::Result<()>>) {
    let host = host(name, shutdown_timeout);
    let addr = host.local_addr();
    let serving = serve(&host);
    (host, addr, serving)
}

/// Typed stub for the echo service.
#[derive(Clone, Debug)]
pub struct EchoClient {
    conn: ClientConn,
}

impl EchoClient {
    pub const fn new(conn: ClientConn) -> Self {
        Self { conn }
    }

    pub async fn echo(&self, message: &str) -> Result<String, Status> {
        self.unary("Echo", message.to_string()).await
    }

    pub async fn whoami(&self) -> Result<String, Status> {
        self.unary("Whoami", ()).await
    }

    pub async fn sleep(&self, millis: u64) -> Result<u64, Status> {
        self.unary("Sleep", millis).await
    }

    pub async fn boom(&self) -> Result<(), Status> {
        self.unary("Boom", ()).await
    }

    pub async fn trace_id(&self) -> Result<String, Status> {
        self.unary("TraceId", ()).await
    }

    pub async fn call_method<Req, Res>(&self, method: &str, message: Req) -> Result<Res, Status>
    where
        Req: serde::Serialize + Send + 'static,
        Res: serde::de::DeserializeOwned + Send + 'static,
    {
        self.conn
            .call::<Req, Res>(method, Request::new(message))
            .await
            .map(Response::into_inner)
    }

    async fn unary<Req, Res>(&self, method: &str, message: Req) -> Result<Res, Status>
    where
        Req: serde::Serialize + Send + 'static,
        Res: serde::de::DeserializeOwned + Send + 'static,
    {
        self.call_method(&format!("/{SERVICE}/{method}"), message).await
    }
}
