//! Static address resolution and the scheme registry.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result};

/// Resolves a scheme to a fixed, caller-supplied list of addresses.
///
/// The list is validated once on construction and never changes afterwards;
/// there is no DNS lookup or re-resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaticResolver {
    scheme: String,
    addresses: Arc<[String]>,
}

impl StaticResolver {
    /// Creates a resolver for `scheme` over `addresses`.
    ///
    /// The scheme is lower-cased. Addresses keep their order, which is the
    /// order balancing policies walk them in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidScheme`] for a malformed scheme,
    /// [`Error::EmptyAddressList`] if no address is given and
    /// [`Error::InvalidAddress`] if any address is not `host:port`.
    pub fn new<I, A>(scheme: &str, addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let scheme = normalize_scheme(scheme)?;
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();

        if addresses.is_empty() {
            return Err(Error::EmptyAddressList);
        }
        for address in &addresses {
            validate_address(address)?;
        }

        Ok(Self {
            scheme,
            addresses: addresses.into(),
        })
    }

    /// The scheme this resolver answers for.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The frozen address list.
    #[must_use]
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }
}

/// Maps schemes to resolvers.
///
/// A scheme can be registered by at most one live [`Registration`] at a
/// time; dropping the registration frees the scheme for reuse.
#[derive(Debug, Default)]
pub struct ResolverRegistry {
    resolvers: RwLock<HashMap<String, StaticResolver>>,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry shared by the whole process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ResolverRegistry>> = OnceLock::new();

        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Registers `resolver` under its scheme.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemeInUse`] if the scheme is already registered.
    pub fn register(self: &Arc<Self>, resolver: StaticResolver) -> Result<Registration> {
        let scheme = resolver.scheme().to_string();

        match self.resolvers.write().entry(scheme.clone()) {
            Entry::Occupied(_) => return Err(Error::SchemeInUse(scheme)),
            Entry::Vacant(entry) => {
                entry.insert(resolver);
            }
        }
        debug!("Registered resolver for scheme {}", scheme);

        Ok(Registration {
            registry: Arc::clone(self),
            scheme,
        })
    }

    /// Looks up the resolver for `scheme` (case-insensitive).
    #[must_use]
    pub fn get(&self, scheme: &str) -> Option<StaticResolver> {
        self.resolvers
            .read()
            .get(&scheme.to_ascii_lowercase())
            .cloned()
    }

    /// Whether `scheme` is currently registered.
    #[must_use]
    pub fn contains(&self, scheme: &str) -> bool {
        self.resolvers
            .read()
            .contains_key(&scheme.to_ascii_lowercase())
    }

    /// Number of registered schemes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.read().len()
    }

    /// Whether no scheme is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.read().is_empty()
    }

    fn unregister(&self, scheme: &str) {
        if self.resolvers.write().remove(scheme).is_some() {
            debug!("Unregistered resolver for scheme {}", scheme);
        }
    }
}

/// Keeps a scheme registered until dropped.
#[must_use = "dropping a registration unregisters the scheme"]
pub struct Registration {
    registry: Arc<ResolverRegistry>,
    scheme: String,
}

impl Registration {
    /// The registered scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(&self.scheme);
    }
}

/// A parsed dial target, `<scheme>://[authority]/[endpoint]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Lower-cased resolver scheme.
    pub scheme: String,
    /// Authority part, usually empty.
    pub authority: String,
    /// Endpoint part, ignored by static resolvers.
    pub endpoint: String,
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(target: &str) -> Result<Self> {
        let invalid = |reason| Error::InvalidTarget {
            target: target.to_string(),
            reason,
        };

        let (scheme, rest) = target
            .split_once("://")
            .ok_or_else(|| invalid("missing \"://\" after the scheme"))?;
        let scheme = normalize_scheme(scheme).map_err(|_| invalid("malformed scheme"))?;
        let (authority, endpoint) = rest.split_once('/').unwrap_or((rest, ""));

        Ok(Self {
            scheme,
            authority: authority.to_string(),
            endpoint: endpoint.to_string(),
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.authority, self.endpoint)
    }
}

fn normalize_scheme(scheme: &str) -> Result<String> {
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.' | '_'));

    if valid {
        Ok(scheme.to_ascii_lowercase())
    } else {
        Err(Error::InvalidScheme(scheme.to_string()))
    }
}

fn validate_address(address: &str) -> Result<()> {
    let invalid = |reason| Error::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("missing port"))?;

    if port.parse::<u16>().is_err() {
        return Err(invalid("port is not a number between 0 and 65535"));
    }

    if let Some(inner) = host.strip_prefix('[') {
        let ip = inner
            .strip_suffix(']')
            .ok_or_else(|| invalid("unterminated IPv6 host"))?;
        ip.parse::<Ipv6Addr>()
            .map_err(|_| invalid("malformed IPv6 host"))?;
    } else if host.is_empty() {
        return Err(invalid("missing host"));
    } else if host.contains(':') {
        return Err(invalid("IPv6 hosts must be bracketed"));
    } else if host.chars().any(char::is_whitespace) {
        return Err(invalid("host contains whitespace"));
    }

    Ok(())
}
