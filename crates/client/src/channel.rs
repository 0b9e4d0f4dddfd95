//! The raw client connection typed stubs are bound to.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_rpc::{Bytes, Connection, Invoker, Request, Response, Status};
use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::balancer::{Balancer, Pick};
use crate::error::{Error, Result};
use crate::options::{DialOption, DialSettings, Policy, parse_service_config};
use crate::resolver::{ResolverRegistry, Target};
use crate::subchannel::{ConnectivityState, Subchannel};

/// A load-balanced client connection over a static set of addresses.
///
/// Cloning is cheap and every clone shares the same subchannels. Dialing is
/// lazy: no transport is opened until the first call. Once [`close`] is
/// called on any clone, every call fails with `Canceled`.
///
/// [`close`]: ClientConn::close
#[derive(Clone)]
pub struct ClientConn {
    inner: Arc<Inner>,
}

struct Inner {
    target: Target,
    settings: DialSettings,
    balancer: Balancer,
    changes: Arc<watch::Sender<u64>>,
    closed: CancellationToken,
}

impl ClientConn {
    /// Parses `target`, resolves its scheme and sets up one subchannel per
    /// address.
    ///
    /// Resolvers passed as [`DialOption::Resolver`] take precedence over the
    /// registry. Without a service config the connection uses `pick_first`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTarget`] for a malformed target,
    /// [`Error::UnknownScheme`] if no resolver knows the scheme and
    /// [`Error::InvalidServiceConfig`] if the service config is rejected.
    pub fn dial<I>(target: &str, registry: &ResolverRegistry, options: I) -> Result<Self>
    where
        I: IntoIterator<Item = DialOption>,
    {
        let target: Target = target.parse()?;
        let settings = DialSettings::from_options(options);
        settings.backoff.validate()?;

        let resolver = settings
            .resolver(&target.scheme)
            .cloned()
            .or_else(|| registry.get(&target.scheme))
            .ok_or_else(|| Error::UnknownScheme(target.scheme.clone()))?;

        let policy = match settings.service_config.as_deref() {
            Some(raw) => parse_service_config(raw)?,
            None => Policy::PickFirst,
        };

        let changes = Arc::new(watch::channel(0_u64).0);
        let subchannels = resolver
            .addresses()
            .iter()
            .map(|address| Subchannel::new(address.clone(), &settings, Arc::clone(&changes)))
            .collect();

        info!(
            "Dialed {} using {} over {} addresses",
            target,
            policy,
            resolver.addresses().len()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                target,
                settings,
                balancer: Balancer::new(policy, subchannels),
                changes,
                closed: CancellationToken::new(),
            }),
        })
    }

    /// The target this connection was dialed with.
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.inner.target
    }

    /// The balancing policy in use.
    #[must_use]
    pub fn policy(&self) -> Policy {
        self.inner.balancer.policy()
    }

    /// Current state of each subchannel, in address order.
    #[must_use]
    pub fn connectivity(&self) -> Vec<(String, ConnectivityState)> {
        self.inner
            .balancer
            .subchannels()
            .iter()
            .map(|subchannel| (subchannel.address().to_string(), subchannel.connectivity()))
            .collect()
    }

    /// Clears every subchannel's reconnect backoff; subchannels waiting to
    /// retry try again immediately.
    pub fn reset_connect_backoff(&self) {
        debug!("Resetting connect backoff for {}", self.inner.target);
        self.inner.balancer.reset_backoff();
    }

    /// Closes every transport. The connection cannot be reopened.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();
        self.inner.balancer.shutdown();
        info!("Closed client connection to {}", self.inner.target);
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Waits for a ready subchannel. A `None` deadline waits until one is
    /// ready or the connection closes.
    async fn pick(&self, deadline: Option<Instant>, deadline_is_call_timeout: bool) -> Result<Arc<Connection>, Status> {
        let mut changes = self.inner.changes.subscribe();

        loop {
            if self.is_closed() {
                return Err(Status::connection_closed());
            }
            match self.inner.balancer.pick() {
                Pick::Ready(connection) => return Ok(connection),
                Pick::Fail(status) => return Err(status),
                Pick::Queue => {}
            }

            let changed = async {
                match deadline {
                    Some(deadline) => timeout_at(deadline, changes.changed()).await,
                    None => Ok(changes.changed().await),
                }
            };

            tokio::select! {
                changed = changed => match changed {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(Status::connection_closed()),
                    Err(_) if deadline_is_call_timeout => {
                        return Err(Status::deadline_exceeded("deadline exceeded while waiting for a ready subchannel"));
                    }
                    Err(_) => {
                        return Err(Status::unavailable(format!(
                            "no subchannel became ready within {:?}",
                            self.inner.settings.connect_timeout()
                        )));
                    }
                },
                () = self.inner.closed.cancelled() => return Err(Status::connection_closed()),
            }
        }
    }
}

#[async_trait]
impl Invoker for ClientConn {
    async fn unary(&self, method: &str, request: Request<Bytes>) -> Result<Response<Bytes>, Status> {
        if self.is_closed() {
            return Err(Status::connection_closed());
        }

        let mut request = self
            .inner
            .settings
            .interceptors
            .iter()
            .try_fold(request, |request, interceptor| interceptor.intercept(method, request))?;

        let started = Instant::now();
        let connect_timeout = self.inner.settings.connect_timeout();
        let (wait, bounded_by_call) = match request.timeout() {
            Some(call_timeout) if call_timeout <= connect_timeout => (call_timeout, true),
            _ => (connect_timeout, false),
        };

        let connection = self.pick(started.checked_add(wait), bounded_by_call).await?;

        if let Some(call_timeout) = request.timeout() {
            let remaining = call_timeout.saturating_sub(started.elapsed());
            if remaining == Duration::ZERO {
                return Err(Status::deadline_exceeded("deadline exceeded before the call was sent"));
            }
            request.set_timeout(remaining);
        }

        debug!("Sending {} on connection {} to {}", method, connection.id(), connection.peer());
        let result = connection.call(method, request).await;

        match result {
            Err(_) if self.is_closed() => Err(Status::connection_closed()),
            other => other,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.closed.cancel();
        self.balancer.shutdown();
    }
}

impl fmt::Debug for ClientConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConn")
            .field("target", &self.inner.target)
            .field("policy", &self.policy())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BackoffConfig;
    use crate::resolver::StaticResolver;
    use conduit_rpc::Code;

    fn registry_with(scheme: &str, addresses: &[&str]) -> (Arc<ResolverRegistry>, crate::resolver::Registration) {
        let registry = Arc::new(ResolverRegistry::new());
        let registration = registry
            .register(StaticResolver::new(scheme, addresses.iter().copied()).unwrap())
            .unwrap();
        (registry, registration)
    }

    #[test]
    fn test_dial_without_service_config_uses_pick_first() {
        let (registry, _registration) = registry_with("inventory", &["127.0.0.1:1"]);

        let conn = ClientConn::dial("inventory:///", &registry, []).unwrap();
        assert_eq!(conn.policy(), Policy::PickFirst);
        assert_eq!(
            conn.connectivity(),
            vec![("127.0.0.1:1".to_string(), ConnectivityState::Idle)]
        );
    }

    #[test]
    fn test_dial_option_resolver_takes_precedence() {
        let (registry, _registration) = registry_with("inventory", &["127.0.0.1:1"]);
        let local = StaticResolver::new("inventory", ["127.0.0.1:2", "127.0.0.1:3"]).unwrap();

        let conn = ClientConn::dial("inventory:///", &registry, [DialOption::Resolver(local)]).unwrap();
        assert_eq!(conn.connectivity().len(), 2);
    }

    #[test]
    fn test_dial_failures() {
        let (registry, _registration) = registry_with("inventory", &["127.0.0.1:1"]);

        assert!(matches!(
            ClientConn::dial("inventory", &registry, []),
            Err(Error::InvalidTarget { .. })
        ));
        assert!(matches!(
            ClientConn::dial("unknown:///", &registry, []),
            Err(Error::UnknownScheme(_))
        ));
        assert!(matches!(
            ClientConn::dial(
                "inventory:///",
                &registry,
                [DialOption::DefaultServiceConfig("{".to_string())]
            ),
            Err(Error::InvalidServiceConfig(_))
        ));
        assert!(matches!(
            ClientConn::dial(
                "inventory:///",
                &registry,
                [DialOption::Backoff(BackoffConfig {
                    jitter: 3.0,
                    ..BackoffConfig::default()
                })]
            ),
            Err(Error::InvalidDialOption(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_connection_cancels_calls() {
        let (registry, _registration) = registry_with("inventory", &["127.0.0.1:1"]);
        let conn = ClientConn::dial("inventory:///", &registry, []).unwrap();

        conn.close();
        assert!(conn.is_closed());

        let status = conn
            .unary("/inventory.Stock/Get", Request::new(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Canceled);
        assert_eq!(status.message(), "client connection is closed");
        assert_eq!(conn.connectivity()[0].1, ConnectivityState::Idle);
    }

    #[tokio::test]
    async fn test_interceptor_can_reject_call() {
        let (registry, _registration) = registry_with("inventory", &["127.0.0.1:1"]);
        let deny = |_method: &str, _request: Request<Bytes>| -> Result<Request<Bytes>, Status> {
            Err(Status::unauthenticated("no token"))
        };
        let conn = ClientConn::dial(
            "inventory:///",
            &registry,
            [DialOption::Interceptor(Arc::new(deny))],
        )
        .unwrap();

        let status = conn
            .unary("/inventory.Stock/Get", Request::new(Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unauthenticated);
        assert_eq!(conn.connectivity()[0].1, ConnectivityState::Idle);
    }
}
