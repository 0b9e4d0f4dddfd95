//! Building named, load-balanced clients from a static address list.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::channel::ClientConn;
use crate::error::Result;
use crate::options::{DEFAULT_SERVICE_CONFIG, DialOption};
use crate::resolver::{Registration, ResolverRegistry, StaticResolver};

type BindFactory<T> = Box<dyn FnOnce(ClientConn) -> T + Send>;

/// Everything needed to build one client.
pub struct ClientConfig<T> {
    /// Resolver scheme; unique among live clients of the same registry.
    pub name: String,
    /// `host:port` addresses to balance over.
    pub addresses: Vec<String>,
    /// Binds the typed stub to the connection.
    pub bind_factory: BindFactory<T>,
    /// Applied after the defaults, so these win on conflict.
    pub dial_options: Vec<DialOption>,
}

impl<T> ClientConfig<T> {
    /// Creates a config without extra dial options.
    pub fn new<I, A, F>(name: impl Into<String>, addresses: I, bind_factory: F) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
        F: FnOnce(ClientConn) -> T + Send + 'static,
    {
        Self {
            name: name.into(),
            addresses: addresses.into_iter().map(Into::into).collect(),
            bind_factory: Box::new(bind_factory),
            dial_options: Vec::new(),
        }
    }

    /// Appends a dial option.
    #[must_use]
    pub fn with_dial_option(mut self, option: DialOption) -> Self {
        self.dial_options.push(option);
        self
    }
}

impl<T> fmt::Debug for ClientConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("name", &self.name)
            .field("addresses", &self.addresses)
            .field("dial_options", &self.dial_options)
            .finish_non_exhaustive()
    }
}

/// Creates clients whose schemes are registered in one registry.
#[derive(Clone, Debug)]
pub struct ConnectionManager {
    registry: Arc<ResolverRegistry>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionManager {
    /// Creates a manager with a private registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(Arc::new(ResolverRegistry::new()))
    }

    /// Creates a manager that registers schemes in `registry`.
    #[must_use]
    pub const fn with_registry(registry: Arc<ResolverRegistry>) -> Self {
        Self { registry }
    }

    /// The registry schemes are registered in.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ResolverRegistry> {
        &self.registry
    }

    /// Registers a static resolver for `config.name`, dials it with
    /// round-robin balancing and binds the stub.
    ///
    /// No transport is opened yet; the first call connects.
    ///
    /// # Errors
    ///
    /// Fails on an empty or malformed address list, a scheme that is already
    /// registered, or a dial option the connection rejects. On failure the
    /// scheme is left unregistered.
    #[instrument(skip_all, fields(name = %config.name))]
    pub fn new_client<T>(&self, config: ClientConfig<T>) -> Result<ClientHandle<T>> {
        let ClientConfig {
            name,
            addresses,
            bind_factory,
            dial_options,
        } = config;

        let resolver = StaticResolver::new(&name, addresses)?;
        let target = format!("{}:///", resolver.scheme());
        let registration = self.registry.register(resolver.clone())?;

        let options = [
            DialOption::DefaultServiceConfig(DEFAULT_SERVICE_CONFIG.to_string()),
            DialOption::Resolver(resolver),
        ]
        .into_iter()
        .chain(dial_options);
        let conn = ClientConn::dial(&target, &self.registry, options)?;

        let client = bind_factory(conn.clone());
        info!("Created client for {}", target);

        Ok(ClientHandle {
            client,
            conn,
            registration,
        })
    }
}

/// A typed client together with the connection and registration it owns.
pub struct ClientHandle<T> {
    client: T,
    conn: ClientConn,
    registration: Registration,
}

impl<T> ClientHandle<T> {
    /// The typed stub.
    pub const fn client(&self) -> &T {
        &self.client
    }

    /// The underlying connection.
    pub const fn conn(&self) -> &ClientConn {
        &self.conn
    }

    /// The registered scheme.
    pub fn scheme(&self) -> &str {
        self.registration.scheme()
    }

    /// Resets reconnect backoff, closes the connection, then releases the
    /// scheme. Stub clones kept elsewhere fail with `Canceled` afterwards.
    pub fn close(self) {
        let Self {
            conn, registration, ..
        } = self;

        conn.reset_connect_backoff();
        conn.close();
        info!("Released scheme {}", registration.scheme());
        drop(registration);
    }
}

impl<T> fmt::Debug for ClientHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("conn", &self.conn)
            .field("registration", &self.registration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::options::Policy;

    #[test]
    fn test_empty_address_list_fails_fast() {
        let manager = ConnectionManager::new();
        let config = ClientConfig::new("orders", Vec::<String>::new(), |conn| conn);

        assert!(matches!(manager.new_client(config), Err(Error::EmptyAddressList)));
        assert!(manager.registry().is_empty());
    }

    #[test]
    fn test_scheme_collision_and_release() {
        let manager = ConnectionManager::new();
        let config = || ClientConfig::new("orders", ["127.0.0.1:1"], |conn| conn);

        let handle = manager.new_client(config()).unwrap();
        assert_eq!(handle.scheme(), "orders");
        assert!(matches!(
            manager.new_client(config()),
            Err(Error::SchemeInUse(_))
        ));

        handle.close();
        let handle = manager.new_client(config()).unwrap();
        assert!(!handle.conn().is_closed());
    }

    #[test]
    fn test_default_policy_is_round_robin_unless_overridden() {
        let manager = ConnectionManager::new();

        let handle = manager
            .new_client(ClientConfig::new("a", ["127.0.0.1:1"], |conn| conn))
            .unwrap();
        assert_eq!(handle.client().policy(), Policy::RoundRobin);

        let handle = manager
            .new_client(
                ClientConfig::new("b", ["127.0.0.1:1"], |conn| conn).with_dial_option(
                    DialOption::DefaultServiceConfig(
                        r#"{"loadBalancingConfig": [{"pick_first": {}}]}"#.to_string(),
                    ),
                ),
            )
            .unwrap();
        assert_eq!(handle.client().policy(), Policy::PickFirst);
    }

    #[test]
    fn test_failed_dial_leaves_scheme_unregistered() {
        let manager = ConnectionManager::new();
        let config = ClientConfig::new("orders", ["127.0.0.1:1"], |conn| conn)
            .with_dial_option(DialOption::DefaultServiceConfig(
                r#"{"loadBalancingConfig": [{"grpclb": {}}]}"#.to_string(),
            ));

        assert!(matches!(
            manager.new_client(config),
            Err(Error::InvalidServiceConfig(_))
        ));
        assert!(!manager.registry().contains("orders"));
    }
}
