#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use conduit_client::{ClientConn, ConnectivityState};
use conduit_rpc::{InvokerExt, Request, Response, Status};
use conduit_server::{HostConfig, ServiceDescriptor, ServiceHost};
use tokio::task::JoinHandle;

pub struct Named {
    name: String,
}

pub struct RunningHost {
    pub host: Arc<ServiceHost>,
    pub addr: SocketAddr,
    serving: JoinHandle<conduit_server::Result<()>>,
}

impl RunningHost {
    pub async fn stop(self) {
        self.host.stop();
        self.serving.await.unwrap().unwrap();
    }
}

/// Serves `/test.Named/Whoami`, answering with `name`.
pub fn start_host(name: &str, bind_address: &str) -> RunningHost {
    let descriptor = ServiceDescriptor::new("test.Named").unary(
        "Whoami",
        |named: Arc<Named>, _request: Request<()>| async move {
            Ok::<_, Status>(Response::new(named.name.clone()))
        },
    );
    let host = Arc::new(
        ServiceHost::new(HostConfig::new(
            bind_address,
            descriptor,
            Named {
                name: name.to_string(),
            },
        ))
        .unwrap(),
    );
    let addr = host.local_addr();
    let serving = tokio::spawn({
        let host = Arc::clone(&host);
        async move { host.serve().await }
    });

    RunningHost {
        host,
        addr,
        serving,
    }
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub async fn whoami(conn: &ClientConn) -> Result<String, Status> {
    conn.call::<(), String>("/test.Named/Whoami", Request::new(()))
        .await
        .map(Response::into_inner)
}

/// Waits until `address` reaches `state`.
pub async fn wait_for_state(conn: &ClientConn, address: &str, state: ConnectivityState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let current = conn
                .connectivity()
                .into_iter()
                .find(|(candidate, _)| candidate == address)
                .map(|(_, current)| current);
            if current == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{address} never became {state}"));
}
