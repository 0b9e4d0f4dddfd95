use std::fmt;
use std::sync::Arc;

use conduit_rpc::ServerInterceptor;
use conduit_rpc::protocol::MAX_FRAME_SIZE;
use tokio::sync::Semaphore;

/// Connections served at once by default.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// One host setting. Later options override earlier ones; interceptors
/// accumulate in order.
#[derive(Clone)]
pub enum ServerOption {
    /// Connections beyond this count are closed on accept. Values above
    /// [`Semaphore::MAX_PERMITS`] are capped to it.
    MaxConnections(usize),
    /// Largest frame accepted from a client.
    MaxFrameSize(usize),
    /// Runs on every call after the trace extractor and earlier interceptors.
    Interceptor(Arc<dyn ServerInterceptor>),
}

impl fmt::Debug for ServerOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxConnections(max) => f.debug_tuple("MaxConnections").field(max).finish(),
            Self::MaxFrameSize(size) => f.debug_tuple("MaxFrameSize").field(size).finish(),
            Self::Interceptor(_) => f.write_str("Interceptor(..)"),
        }
    }
}

/// Server options folded into their effective values.
#[derive(Clone)]
pub struct ServerSettings {
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum frame size.
    pub max_frame_size: usize,
    /// Interceptors in the order they run.
    pub interceptors: Vec<Arc<dyn ServerInterceptor>>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_size: MAX_FRAME_SIZE,
            interceptors: Vec::new(),
        }
    }
}

impl ServerSettings {
    /// Applies `options` in order on top of the defaults.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = ServerOption>,
    {
        options
            .into_iter()
            .fold(Self::default(), |mut settings, option| {
                match option {
                    ServerOption::MaxConnections(max) => {
                        settings.max_connections = max.min(Semaphore::MAX_PERMITS);
                    }
                    ServerOption::MaxFrameSize(size) => settings.max_frame_size = size,
                    ServerOption::Interceptor(interceptor) => settings.interceptors.push(interceptor),
                }
                settings
            })
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerSettings")
            .field("max_connections", &self.max_connections)
            .field("max_frame_size", &self.max_frame_size)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}
