//! Endpoint Resolution
//!
//! The engine must never do its own DNS lookups, so every peer endpoint is
//! resolved to a socket address before the config is translated.
//!
//! - IP literals resolve immediately, no I/O
//! - Hostnames go through an [`EndpointResolver`]
//! - [`DnsResolver`] caches answers and prefers IPv4

use crate::config::{InetEndpoint, TunnelConfig};
use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How long a DNS answer stays cached unless configured otherwise
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Cache size bound for [`DnsResolver`]
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 1024;

/// Resolved address for each endpoint in a config
pub type ResolvedEndpoints = HashMap<InetEndpoint, SocketAddr>;

/// Turns a hostname endpoint into a socket address
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Resolve a single endpoint
    async fn resolve(&self, endpoint: &InetEndpoint) -> Result<SocketAddr, ResolveError>;
}

/// Resolve every peer endpoint of `config`
///
/// Literal addresses never reach `resolver`.
pub async fn resolve_endpoints(
    config: &TunnelConfig,
    resolver: &dyn EndpointResolver,
) -> Result<ResolvedEndpoints, ResolveError> {
    let mut resolved = ResolvedEndpoints::new();

    for endpoint in config.endpoints() {
        if resolved.contains_key(endpoint) {
            continue;
        }
        let addr = match endpoint.literal() {
            Some(addr) => addr,
            None => resolver.resolve(endpoint).await?,
        };
        debug!("Endpoint {} resolved to {}", endpoint, addr);
        resolved.insert(endpoint.clone(), addr);
    }

    Ok(resolved)
}

/// Pick the address to use from a lookup answer (first IPv4, else first)
fn preferred(addrs: &[IpAddr]) -> Option<IpAddr> {
    addrs.iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Cached lookup
#[derive(Clone)]
struct CacheEntry {
    addr: IpAddr,
    expires_at: Instant,
}

/// DNS-backed resolver with a TTL cache
pub struct DnsResolver {
    /// Underlying resolver
    resolver: TokioAsyncResolver,
    /// Host -> address cache
    cache: RwLock<HashMap<String, CacheEntry>>,
    /// How long an answer stays valid
    ttl: Duration,
    /// Cache size bound
    max_entries: usize,
}

impl DnsResolver {
    /// Create a resolver from the system configuration
    pub fn from_system_conf(ttl: Duration) -> Result<Self, ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| ResolveError::Resolver(e.to_string()))?;

        info!("Endpoint resolver initialized from system configuration");
        Ok(Self::with_resolver(resolver, ttl))
    }

    /// Create a resolver that queries Cloudflare directly
    pub fn cloudflare(ttl: Duration) -> Self {
        let resolver = TokioAsyncResolver::tokio(
            ResolverConfig::cloudflare(),
            ResolverOpts::default(),
        );
        Self::with_resolver(resolver, ttl)
    }

    fn with_resolver(resolver: TokioAsyncResolver, ttl: Duration) -> Self {
        Self {
            resolver,
            cache: RwLock::new(HashMap::new()),
            ttl,
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }

    /// Bound the cache to `max_entries` hosts
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    /// Number of cached hosts, expired or not
    pub fn cache_len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or(0)
    }

    fn cached(&self, host: &str) -> Option<IpAddr> {
        let cache = self.cache.read().ok()?;
        cache.get(host)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.addr)
    }

    fn store(&self, host: &str, addr: IpAddr) {
        if let Ok(mut cache) = self.cache.write() {
            if cache.len() >= self.max_entries && !cache.contains_key(host) {
                let now = Instant::now();
                cache.retain(|_, entry| entry.expires_at > now);

                // Still full: drop the entry closest to expiry
                if cache.len() >= self.max_entries {
                    let oldest = cache.iter()
                        .min_by_key(|(_, entry)| entry.expires_at)
                        .map(|(host, _)| host.clone());
                    if let Some(oldest) = oldest {
                        cache.remove(&oldest);
                    }
                }
            }
            cache.insert(host.to_string(), CacheEntry {
                addr,
                expires_at: Instant::now() + self.ttl,
            });
        }
    }
}

#[async_trait]
impl EndpointResolver for DnsResolver {
    async fn resolve(&self, endpoint: &InetEndpoint) -> Result<SocketAddr, ResolveError> {
        let host = endpoint.host().to_lowercase();

        if let Some(addr) = self.cached(&host) {
            debug!("Endpoint cache hit: {}", host);
            return Ok(SocketAddr::new(addr, endpoint.port()));
        }

        let lookup = self.resolver.lookup_ip(host.as_str()).await
            .map_err(|e| ResolveError::Lookup {
                host: host.clone(),
                reason: e.to_string(),
            })?;
        let addrs: Vec<IpAddr> = lookup.iter().collect();
        let addr = preferred(&addrs)
            .ok_or_else(|| ResolveError::NoAddresses(host.clone()))?;

        self.store(&host, addr);
        Ok(SocketAddr::new(addr, endpoint.port()))
    }
}

/// Resolution errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    #[error("Lookup of {host} failed: {reason}")]
    Lookup { host: String, reason: String },

    #[error("No addresses found for {0}")]
    NoAddresses(String),

    #[error("Resolver error: {0}")]
    Resolver(String),
}
