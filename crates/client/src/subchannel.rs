//! One logical connection to one resolved address.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conduit_rpc::Connection;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::options::DialSettings;

/// Connectivity of a subchannel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectivityState {
    /// No transport and no attempt in progress.
    Idle,
    /// A connection attempt is in progress.
    Connecting,
    /// A transport is established and accepting calls.
    Ready,
    /// The last attempt failed; the next one waits for the backoff delay.
    TransientFailure,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Ready => "READY",
            Self::TransientFailure => "TRANSIENT_FAILURE",
        };
        f.write_str(name)
    }
}

struct State {
    connectivity: ConnectivityState,
    connection: Option<Arc<Connection>>,
    backoff: Backoff,
    last_error: Option<String>,
}

pub struct Subchannel {
    address: String,
    connect_timeout: Duration,
    max_frame_size: usize,
    state: Mutex<State>,
    changes: Arc<watch::Sender<u64>>,
    retry_now: Notify,
    shutdown: CancellationToken,
}

impl Subchannel {
    pub fn new(address: String, settings: &DialSettings, changes: Arc<watch::Sender<u64>>) -> Arc<Self> {
        Arc::new(Self {
            address,
            connect_timeout: settings.connect_timeout,
            max_frame_size: settings.max_frame_size,
            state: Mutex::new(State {
                connectivity: ConnectivityState::Idle,
                connection: None,
                backoff: Backoff::new(settings.backoff),
                last_error: None,
            }),
            changes,
            retry_now: Notify::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.state.lock().connectivity
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// The transport, if the subchannel is ready and the server is not draining it.
    pub fn ready_connection(&self) -> Option<Arc<Connection>> {
        let state = self.state.lock();
        match (&state.connectivity, &state.connection) {
            (ConnectivityState::Ready, Some(conn)) if conn.is_available() => Some(Arc::clone(conn)),
            _ => None,
        }
    }

    /// Starts connecting if idle. No-op in any other state.
    pub fn request_connection(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.connectivity != ConnectivityState::Idle {
                return;
            }
            state.connectivity = ConnectivityState::Connecting;
        }
        self.notify();

        tokio::spawn(Arc::clone(self).connect_loop());
    }

    /// Forgets past failures and wakes a subchannel waiting out its backoff.
    pub fn reset_backoff(&self) {
        self.state.lock().backoff.reset();
        self.retry_now.notify_waiters();
    }

    /// Closes the transport and stops all reconnection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let connection = {
            let mut state = self.state.lock();
            state.connectivity = ConnectivityState::Idle;
            state.connection.take()
        };
        if let Some(connection) = connection {
            connection.close();
        }
    }

    async fn connect_loop(self: Arc<Self>) {
        loop {
            debug!("Connecting to {}", self.address);

            let attempt = tokio::select! {
                attempt = Connection::connect(&self.address, self.connect_timeout, self.max_frame_size) => attempt,
                () = self.shutdown.cancelled() => return,
            };

            match attempt {
                Ok(connection) => {
                    self.serve_ready(connection).await;
                    return;
                }
                Err(e) => {
                    warn!("Failed to connect to {}: {}", self.address, e);

                    let retry_now = self.retry_now.notified();
                    tokio::pin!(retry_now);
                    retry_now.as_mut().enable();

                    let delay = {
                        let mut state = self.state.lock();
                        state.connectivity = ConnectivityState::TransientFailure;
                        state.last_error = Some(e.to_string());
                        state.backoff.next_delay()
                    };
                    self.notify();

                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = retry_now => debug!("Backoff for {} reset, retrying now", self.address),
                        () = self.shutdown.cancelled() => return,
                    }

                    self.set_connectivity(ConnectivityState::Connecting);
                }
            }
        }
    }

    async fn serve_ready(&self, connection: Arc<Connection>) {
        {
            let mut state = self.state.lock();
            if self.shutdown.is_cancelled() {
                connection.close();
                return;
            }
            state.connectivity = ConnectivityState::Ready;
            state.connection = Some(Arc::clone(&connection));
            state.backoff.reset();
            state.last_error = None;
        }
        debug!("Subchannel {} is ready", self.address);
        self.notify();

        tokio::select! {
            () = connection.retired() => {}
            () = self.shutdown.cancelled() => return,
        }

        debug!("Transport to {} retired, subchannel is idle", self.address);
        {
            let mut state = self.state.lock();
            if state
                .connection
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &connection))
            {
                state.connection = None;
                state.connectivity = ConnectivityState::Idle;
            }
        }
        self.notify();
    }

    fn set_connectivity(&self, connectivity: ConnectivityState) {
        self.state.lock().connectivity = connectivity;
        self.notify();
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation = generation.wrapping_add(1));
    }
}

impl fmt::Debug for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subchannel")
            .field("address", &self.address)
            .field("connectivity", &self.connectivity())
            .finish_non_exhaustive()
    }
}
