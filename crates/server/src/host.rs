//! The service host: one listener, one dispatcher, explicit lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use conduit_rpc::ServerInterceptor;
use conduit_trace::ParentExtractor;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::connection::{ConnectionContext, serve_connection};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::options::{ServerOption, ServerSettings};
use crate::recovery::{PanicHandler, default_panic_handler};
use crate::service::{ServiceDescriptor, ServiceInfo};

const MIN_ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Everything needed to host one service.
pub struct HostConfig<S> {
    /// `host:port` to listen on; port 0 picks a free port.
    pub bind_address: String,
    /// Method table of the service.
    pub descriptor: ServiceDescriptor<S>,
    /// The service implementation handlers receive.
    pub service: S,
    /// Converts handler panics into statuses. Defaults to `Internal`.
    pub panic_handler: Option<PanicHandler>,
    /// Extra host settings.
    pub server_options: Vec<ServerOption>,
    /// How long [`ServiceHost::graceful_stop`] sleeps after draining.
    pub shutdown_timeout: Duration,
}

impl<S> HostConfig<S>
where
    S: Send + Sync + 'static,
{
    /// Creates a config with default options and no shutdown delay.
    pub fn new(bind_address: impl Into<String>, descriptor: ServiceDescriptor<S>, service: S) -> Self {
        Self {
            bind_address: bind_address.into(),
            descriptor,
            service,
            panic_handler: None,
            server_options: Vec::new(),
            shutdown_timeout: Duration::ZERO,
        }
    }

    /// Sets the panic handler.
    #[must_use]
    pub fn with_panic_handler(mut self, panic_handler: PanicHandler) -> Self {
        self.panic_handler = Some(panic_handler);
        self
    }

    /// Appends a server option.
    #[must_use]
    pub fn with_server_option(mut self, option: ServerOption) -> Self {
        self.server_options.push(option);
        self
    }

    /// Sets the post-drain delay of a graceful stop.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HostState {
    Bound,
    Serving,
    Stopped,
}

/// Hosts RPC services on one TCP listener.
///
/// The listener is bound when the host is created, so a port conflict is
/// reported before anything starts. Calls pass through trace extraction and
/// the configured interceptors, and handler panics are turned into error
/// responses instead of taking the process down.
pub struct ServiceHost {
    name: String,
    local_addr: SocketAddr,
    listener: Mutex<Option<StdTcpListener>>,
    state: Mutex<HostState>,
    dispatcher: Arc<Dispatcher>,
    settings: ServerSettings,
    shutdown_timeout: Duration,
    drain: CancellationToken,
    terminate: CancellationToken,
    task_tracker: TaskTracker,
}

impl ServiceHost {
    /// Binds the listener and registers the configured service.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address cannot be bound.
    pub fn new<S>(config: HostConfig<S>) -> Result<Self>
    where
        S: Send + Sync + 'static,
    {
        let HostConfig {
            bind_address,
            descriptor,
            service,
            panic_handler,
            server_options,
            shutdown_timeout,
        } = config;

        let listener = bind(&bind_address).map_err(|source| Error::Bind {
            addr: bind_address.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        let settings = ServerSettings::from_options(server_options);
        let mut interceptors: Vec<Arc<dyn ServerInterceptor>> = vec![Arc::new(ParentExtractor)];
        interceptors.extend(settings.interceptors.iter().cloned());

        let dispatcher = Arc::new(Dispatcher::new(
            interceptors,
            panic_handler.unwrap_or_else(default_panic_handler),
        ));
        let name = descriptor.name().to_string();
        dispatcher.register(name.clone(), descriptor.bind(service))?;

        debug!("Bound {} for service {}", local_addr, name);

        Ok(Self {
            name,
            local_addr,
            listener: Mutex::new(Some(listener)),
            state: Mutex::new(HostState::Bound),
            dispatcher,
            settings,
            shutdown_timeout,
            drain: CancellationToken::new(),
            terminate: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        })
    }

    /// The address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Registers another service on this host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] once serving has begun and
    /// [`Error::DuplicateService`] if the name is taken.
    pub fn register_service<S>(&self, descriptor: ServiceDescriptor<S>, service: S) -> Result<()>
    where
        S: Send + Sync + 'static,
    {
        match *self.state.lock() {
            HostState::Bound => {}
            HostState::Serving => return Err(Error::AlreadyStarted),
            HostState::Stopped => return Err(Error::Stopped),
        }

        let name = descriptor.name().to_string();
        self.dispatcher.register(name, descriptor.bind(service))
    }

    /// Method names and metadata of every registered service.
    #[must_use]
    pub fn service_info(&self) -> HashMap<String, ServiceInfo> {
        self.dispatcher.service_info()
    }

    /// Logs the listening address and serves until stopped.
    ///
    /// # Errors
    ///
    /// Returns whatever [`serve`](Self::serve) fails with, after logging it.
    pub async fn start(&self) -> Result<()> {
        info!("Server '{}' listening at {}", self.name, self.local_addr);

        self.serve()
            .await
            .inspect_err(|e| error!("Failed to serve '{}': {}", self.name, e))
    }

    /// Accepts connections until [`stop`](Self::stop) or
    /// [`graceful_stop`](Self::graceful_stop) is called.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] if already serving,
    /// [`Error::Stopped`] after a stop and [`Error::Accept`] if the listener
    /// fails with a non-transient error.
    #[instrument(skip(self), fields(addr = %self.local_addr))]
    pub async fn serve(&self) -> Result<()> {
        let listener = {
            let mut state = self.state.lock();
            match *state {
                HostState::Bound => {}
                HostState::Serving => return Err(Error::AlreadyStarted),
                HostState::Stopped => return Err(Error::Stopped),
            }
            let listener = self.listener.lock().take().ok_or(Error::AlreadyStarted)?;
            *state = HostState::Serving;
            listener
        };
        let listener = TcpListener::from_std(listener)?;

        let connection_limit = Arc::new(Semaphore::new(self.settings.max_connections));
        let mut accept_backoff = MIN_ACCEPT_BACKOFF;

        loop {
            let accepted = tokio::select! {
                () = self.drain.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    accept_backoff = MIN_ACCEPT_BACKOFF;

                    let Ok(permit) = Arc::clone(&connection_limit).try_acquire_owned() else {
                        warn!(
                            "Rejecting connection from {}: limit of {} connections reached",
                            peer, self.settings.max_connections
                        );
                        continue;
                    };

                    debug!("Accepted connection from {}", peer);
                    let ctx = self.connection_context();
                    self.task_tracker.spawn(async move {
                        serve_connection(stream, peer, ctx).await;
                        drop(permit);
                    });
                }
                Err(e) if is_transient(&e) => {
                    warn!("Failed to accept connection, retrying in {:?}: {}", accept_backoff, e);
                    tokio::select! {
                        () = tokio::time::sleep(accept_backoff) => {}
                        () = self.drain.cancelled() => break,
                    }
                    accept_backoff = (accept_backoff * 2).min(MAX_ACCEPT_BACKOFF);
                }
                Err(source) => {
                    return Err(Error::Accept {
                        addr: self.local_addr,
                        source,
                    });
                }
            }
        }

        info!("Stopped accepting connections on {}", self.local_addr);
        Ok(())
    }

    /// Stops immediately: closes the listener and every connection, and
    /// abandons in-flight calls.
    pub fn stop(&self) {
        info!("Stopping server '{}'", self.name);

        self.mark_stopped();
        self.drain.cancel();
        self.terminate.cancel();
        self.task_tracker.close();
    }

    /// Stops accepting, asks clients to go away, waits for in-flight calls
    /// to be answered, then sleeps for the configured shutdown timeout.
    pub async fn graceful_stop(&self) {
        info!("Gracefully stopping server '{}'", self.name);

        self.mark_stopped();
        self.drain.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!(
            "Server '{}' drained, waiting {:?} before returning",
            self.name, self.shutdown_timeout
        );
        tokio::time::sleep(self.shutdown_timeout).await;
    }

    pub(crate) const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub(crate) const fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    pub(crate) const fn shutdown_tokens(&self) -> (&CancellationToken, &CancellationToken) {
        (&self.drain, &self.terminate)
    }

    fn connection_context(&self) -> ConnectionContext {
        ConnectionContext {
            dispatcher: Arc::clone(&self.dispatcher),
            max_frame_size: self.settings.max_frame_size,
            drain: self.drain.clone(),
            terminate: self.terminate.clone(),
        }
    }

    fn mark_stopped(&self) {
        *self.state.lock() = HostState::Stopped;
        // A host that never served still owns its socket.
        drop(self.listener.lock().take());
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("name", &self.name)
            .field("local_addr", &self.local_addr)
            .field("state", &*self.state.lock())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

fn bind(address: &str) -> io::Result<StdTcpListener> {
    let listener = StdTcpListener::bind(address)?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(e.raw_os_error(), Some(23 | 24)) // ENFILE, EMFILE
}
