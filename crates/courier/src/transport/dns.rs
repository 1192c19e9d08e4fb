//! DNS resolution and caching for the TCP connector.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::debug;

/// DNS resolver with caching.
pub struct DnsResolver {
    /// Cache of resolved addresses, keyed by lowercase host.
    cache: RwLock<HashMap<String, DnsCacheEntry>>,
    /// Configuration.
    config: DnsConfig,
}

/// DNS configuration.
#[derive(Clone, Debug)]
pub struct DnsConfig {
    /// Cache TTL (time to live).
    pub cache_ttl: Duration,
    /// Negative cache TTL (for failed lookups).
    pub negative_cache_ttl: Duration,
    /// Enable IPv6.
    pub ipv6: bool,
    /// Prefer IPv4 over IPv6.
    pub prefer_ipv4: bool,
    /// Timeout for DNS resolution.
    pub timeout: Duration,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            negative_cache_ttl: Duration::from_secs(60),
            ipv6: true,
            prefer_ipv4: true,
            timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug)]
struct DnsCacheEntry {
    addresses: Vec<IpAddr>,
    expires: Instant,
}

impl DnsCacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() > self.expires
    }

    fn is_negative(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl DnsResolver {
    /// Create a new DNS resolver.
    pub fn new() -> Self {
        Self::with_config(DnsConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: DnsConfig) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get resolver configuration.
    pub fn config(&self) -> &DnsConfig {
        &self.config
    }

    /// Resolve a hostname to IP addresses. IP literals are returned as-is.
    pub async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let key = host.to_ascii_lowercase();
        if let Some(addresses) = self.get_cached(&key) {
            return if addresses.is_empty() {
                Err(DnsError::NoAddresses(host.to_string()))
            } else {
                Ok(addresses)
            };
        }

        let result = match tokio::time::timeout(self.config.timeout, self.do_resolve(host)).await {
            Ok(result) => result,
            Err(_) => Err(DnsError::Timeout),
        };

        match &result {
            Ok(addresses) => {
                debug!(host, count = addresses.len(), "resolved host");
                self.cache_entry(key, addresses.clone(), self.config.cache_ttl);
            }
            Err(err) => {
                debug!(host, error = %err, "host resolution failed");
                self.cache_entry(key, Vec::new(), self.config.negative_cache_ttl);
            }
        }

        result
    }

    /// Get socket addresses for a host and port.
    pub async fn resolve_socket_addrs(
        &self,
        host: &str,
        port: u16,
    ) -> Result<Vec<SocketAddr>, DnsError> {
        let addresses = self.resolve(host).await?;
        Ok(addresses
            .into_iter()
            .map(|addr| SocketAddr::new(addr, port))
            .collect())
    }

    fn get_cached(&self, key: &str) -> Option<Vec<IpAddr>> {
        let cache = self.cache.read();
        cache
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.addresses.clone())
    }

    fn cache_entry(&self, key: String, addresses: Vec<IpAddr>, ttl: Duration) {
        let entry = DnsCacheEntry {
            addresses,
            expires: Instant::now() + ttl,
        };
        let mut cache = self.cache.write();
        cache.retain(|_, entry| !entry.is_expired());
        cache.insert(key, entry);
    }

    async fn do_resolve(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| DnsError::Resolution(e.to_string()))?
            .collect();

        let mut addresses: Vec<IpAddr> = addrs.into_iter().map(|a| a.ip()).collect();

        if !self.config.ipv6 {
            addresses.retain(|a| a.is_ipv4());
        }

        // Stable sort keeps the system's order within each family.
        if self.config.prefer_ipv4 {
            addresses.sort_by_key(|a| !a.is_ipv4());
        }

        let mut seen = Vec::with_capacity(addresses.len());
        addresses.retain(|a| {
            if seen.contains(a) {
                false
            } else {
                seen.push(*a);
                true
            }
        });

        if addresses.is_empty() {
            return Err(DnsError::NoAddresses(host.to_string()));
        }

        Ok(addresses)
    }

    /// Clear the cache.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    /// Remove expired entries from the cache.
    pub fn cleanup_cache(&self) {
        self.cache.write().retain(|_, entry| !entry.is_expired());
    }

    /// Get cache statistics.
    pub fn cache_stats(&self) -> DnsCacheStats {
        let cache = self.cache.read();
        let total = cache.len();
        let negative = cache.values().filter(|e| e.is_negative()).count();
        DnsCacheStats {
            total_entries: total,
            positive_entries: total - negative,
            negative_entries: negative,
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// DNS error.
#[derive(Debug, thiserror::Error)]
pub enum DnsError {
    #[error("DNS resolution failed: {0}")]
    Resolution(String),
    #[error("No addresses found for host: {0}")]
    NoAddresses(String),
    #[error("DNS timeout")]
    Timeout,
}

impl From<DnsError> for io::Error {
    fn from(err: DnsError) -> Self {
        let kind = match err {
            DnsError::Timeout => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, err)
    }
}

/// DNS cache statistics.
#[derive(Clone, Debug)]
pub struct DnsCacheStats {
    pub total_entries: usize,
    pub positive_entries: usize,
    pub negative_entries: usize,
}
