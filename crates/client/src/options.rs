//! Dial options and the service config that selects a balancing policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use conduit_rpc::ClientInterceptor;
use conduit_rpc::protocol::MAX_FRAME_SIZE;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::resolver::StaticResolver;

/// Service config installed by [`crate::ConnectionManager`].
pub const DEFAULT_SERVICE_CONFIG: &str = r#"{"loadBalancingConfig": [{"round_robin":{}}]}"#;

/// How long a call waits for a ready subchannel by default.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Exponential backoff between connection attempts to one address.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffConfig {
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Factor applied to the delay after every further failure.
    pub multiplier: f64,
    /// Relative randomization applied to each delay, `0.2` meaning ±20%.
    pub jitter: f64,
    /// Upper bound before jitter.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Checks that the delays can be computed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDialOption`] if `multiplier` is below 1 or not
    /// finite, or `jitter` lies outside `[0, 1)`.
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(Error::InvalidDialOption(format!(
                "backoff multiplier must be a finite number of at least 1, got {}",
                self.multiplier
            )));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(Error::InvalidDialOption(format!(
                "backoff jitter must lie in [0, 1), got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 1.6,
            jitter: 0.2,
            max_delay: Duration::from_secs(120),
        }
    }
}

/// One setting applied when dialing. Later options override earlier ones;
/// interceptors accumulate in order.
#[derive(Clone)]
pub enum DialOption {
    /// JSON service config used when the resolver supplies none.
    DefaultServiceConfig(String),
    /// A resolver consulted before the registry.
    Resolver(StaticResolver),
    /// How long a call may wait for a ready subchannel.
    ConnectTimeout(Duration),
    /// Reconnect backoff.
    Backoff(BackoffConfig),
    /// Largest frame accepted from the server.
    MaxFrameSize(usize),
    /// Runs before every call, after earlier interceptors.
    Interceptor(Arc<dyn ClientInterceptor>),
}

impl fmt::Debug for DialOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DefaultServiceConfig(config) => {
                f.debug_tuple("DefaultServiceConfig").field(config).finish()
            }
            Self::Resolver(resolver) => f.debug_tuple("Resolver").field(resolver).finish(),
            Self::ConnectTimeout(timeout) => f.debug_tuple("ConnectTimeout").field(timeout).finish(),
            Self::Backoff(backoff) => f.debug_tuple("Backoff").field(backoff).finish(),
            Self::MaxFrameSize(size) => f.debug_tuple("MaxFrameSize").field(size).finish(),
            Self::Interceptor(_) => f.write_str("Interceptor(..)"),
        }
    }
}

/// Dial options folded into their effective values.
#[derive(Clone)]
pub struct DialSettings {
    pub(crate) service_config: Option<String>,
    pub(crate) resolvers: Vec<StaticResolver>,
    pub(crate) connect_timeout: Duration,
    pub(crate) backoff: BackoffConfig,
    pub(crate) max_frame_size: usize,
    pub(crate) interceptors: Vec<Arc<dyn ClientInterceptor>>,
}

impl Default for DialSettings {
    fn default() -> Self {
        Self {
            service_config: None,
            resolvers: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            backoff: BackoffConfig::default(),
            max_frame_size: MAX_FRAME_SIZE,
            interceptors: Vec::new(),
        }
    }
}

impl DialSettings {
    /// Applies `options` in order on top of the defaults.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = DialOption>,
    {
        let mut settings = Self::default();
        for option in options {
            match option {
                DialOption::DefaultServiceConfig(config) => settings.service_config = Some(config),
                DialOption::Resolver(resolver) => settings.resolvers.push(resolver),
                DialOption::ConnectTimeout(timeout) => settings.connect_timeout = timeout,
                DialOption::Backoff(backoff) => settings.backoff = backoff,
                DialOption::MaxFrameSize(size) => settings.max_frame_size = size,
                DialOption::Interceptor(interceptor) => settings.interceptors.push(interceptor),
            }
        }
        settings
    }

    /// The last resolver given for `scheme`.
    #[must_use]
    pub fn resolver(&self, scheme: &str) -> Option<&StaticResolver> {
        self.resolvers
            .iter()
            .rev()
            .find(|resolver| resolver.scheme().eq_ignore_ascii_case(scheme))
    }

    /// How long calls wait for a ready subchannel.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Reconnect backoff.
    #[must_use]
    pub const fn backoff(&self) -> BackoffConfig {
        self.backoff
    }
}

/// Load balancing policy of a client connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Policy {
    /// Connect to every address and rotate calls across the ready ones.
    RoundRobin,
    /// Use the first address that connects.
    PickFirst,
}

impl Policy {
    /// The policy's name in service configs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::PickFirst => "pick_first",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "round_robin" => Some(Self::RoundRobin),
            "pick_first" => Some(Self::PickFirst),
            _ => None,
        }
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceConfig {
    #[serde(default)]
    load_balancing_config: Vec<Map<String, Value>>,
    #[serde(default)]
    load_balancing_policy: Option<String>,
}

/// Selects the balancing policy named by a JSON service config.
///
/// The first supported entry of `loadBalancingConfig` wins; the older
/// `loadBalancingPolicy` field is consulted when that list is empty, and a
/// config naming neither means `pick_first`.
///
/// # Errors
///
/// Returns [`Error::InvalidServiceConfig`] if the JSON does not parse or the
/// config lists only unsupported policies.
pub fn parse_service_config(raw: &str) -> Result<Policy> {
    let config: ServiceConfig =
        serde_json::from_str(raw).map_err(|e| Error::InvalidServiceConfig(e.to_string()))?;

    if !config.load_balancing_config.is_empty() {
        return config
            .load_balancing_config
            .iter()
            .flat_map(Map::keys)
            .find_map(|name| Policy::from_name(name))
            .ok_or_else(|| {
                Error::InvalidServiceConfig(
                    "no supported policy in loadBalancingConfig".to_string(),
                )
            });
    }

    match config.load_balancing_policy {
        Some(name) => Policy::from_name(&name.to_ascii_lowercase()).ok_or_else(|| {
            Error::InvalidServiceConfig(format!("unsupported loadBalancingPolicy {name:?}"))
        }),
        None => Ok(Policy::PickFirst),
    }
}
