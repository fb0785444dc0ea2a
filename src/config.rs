//! Configuration for the proxy pool, the dispatcher and the request client.

use crate::proxy::{Protocol, ProxyAuth};
use crate::user_agents::default_user_agents;
use crate::utils;

use std::path::Path;
use std::time::Duration;

/// Status codes that mark a proxy as non-operable by default.
pub const DEFAULT_FAILURE_CASES: [u16; 5] = [401, 403, 407, 408, 418];

/// Configuration for the proxy pool.
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Proxy endpoints ("host:port") to rotate through.
    pub proxies: Vec<String>,
    /// Credentials embedded in every proxy URL.
    pub proxy_auth: Option<ProxyAuth>,
    /// Scheme used to reach the proxies.
    pub protocol: Protocol,
    /// Status codes that mark a proxy as non-operable.
    pub failure_cases: Vec<u16>,
    /// URL probed through each proxy during health checks.
    pub target_endpoint: String,
    /// Whether proxies are health-checked on compose and periodically after.
    pub refresh_proxies: bool,
    /// Interval between health checks.
    pub refresh_rate: Duration,
}

impl ProxyPoolConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ProxyPoolConfigBuilder {
        ProxyPoolConfigBuilder::new()
    }

    /// Whether a status code marks a proxy as non-operable.
    pub fn is_failure(&self, status_code: u16) -> bool {
        self.failure_cases.contains(&status_code)
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        ProxyPoolConfigBuilder::new().build()
    }
}

/// Builder for `ProxyPoolConfig`.
pub struct ProxyPoolConfigBuilder {
    proxies: Vec<String>,
    proxy_auth: Option<ProxyAuth>,
    protocol: Option<Protocol>,
    failure_cases: Option<Vec<u16>>,
    target_endpoint: Option<String>,
    refresh_proxies: Option<bool>,
    refresh_rate: Option<Duration>,
}

impl ProxyPoolConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            proxies: Vec::new(),
            proxy_auth: None,
            protocol: None,
            failure_cases: None,
            target_endpoint: None,
            refresh_proxies: None,
            refresh_rate: None,
        }
    }

    /// Set the proxy endpoints.
    pub fn proxies(mut self, proxies: Vec<impl Into<String>>) -> Self {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    /// Append the endpoints listed in a static proxy list file.
    pub fn proxies_from_file(mut self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        self.proxies.extend(utils::load_proxy_list(path)?);
        Ok(self)
    }

    /// Set the credentials used for every proxy.
    pub fn proxy_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.proxy_auth = Some(ProxyAuth::new(username, password));
        self
    }

    /// Set the scheme used to reach the proxies.
    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the status codes that mark a proxy as non-operable.
    pub fn failure_cases(mut self, codes: Vec<u16>) -> Self {
        self.failure_cases = Some(codes);
        self
    }

    /// Set the URL probed during health checks.
    pub fn target_endpoint(mut self, url: impl Into<String>) -> Self {
        self.target_endpoint = Some(url.into());
        self
    }

    /// Enable or disable health checks.
    pub fn refresh_proxies(mut self, enabled: bool) -> Self {
        self.refresh_proxies = Some(enabled);
        self
    }

    /// Set the interval between health checks.
    pub fn refresh_rate(mut self, rate: Duration) -> Self {
        self.refresh_rate = Some(rate);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            proxies: self.proxies,
            proxy_auth: self.proxy_auth,
            protocol: self.protocol.unwrap_or_default(),
            failure_cases: self.failure_cases.unwrap_or_else(|| DEFAULT_FAILURE_CASES.to_vec()),
            target_endpoint: self.target_endpoint.unwrap_or_else(|| "http://bing.com".to_string()),
            refresh_proxies: self.refresh_proxies.unwrap_or(false),
            refresh_rate: self.refresh_rate.unwrap_or(Duration::from_millis(3_600_000)),
        }
    }
}

impl Default for ProxyPoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cadence of the rate-limited dispatcher: up to `count` requests every `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Requests released per tick, at least 1.
    pub count: usize,
    /// Time between ticks, at least 1ms.
    pub interval: Duration,
}

impl DispatchConfig {
    /// Release up to `count` requests every `interval`, clamped to at least
    /// one request per millisecond-long tick.
    pub fn new(count: usize, interval: Duration) -> Self {
        Self {
            count: count.max(1),
            interval: interval.max(Duration::from_millis(1)),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new(1, Duration::from_millis(1000))
    }
}

/// Configuration for [`DiscreetRequest`](crate::DiscreetRequest).
#[derive(Debug, Clone)]
pub struct DiscreetConfig {
    /// Proxy pool settings.
    pub pool: ProxyPoolConfig,
    /// Dispatcher cadence.
    pub dispatch: DispatchConfig,
    /// Attempts per request when proxies keep failing, at least 1.
    pub max_retries: usize,
    /// User agents rotated across requests; empty means no header is set.
    pub user_agents: Vec<String>,
    /// Whether responses are read from and written to the cache by default.
    pub cache: bool,
    /// Expiry of cached responses.
    pub cache_ttl: Duration,
}

impl DiscreetConfig {
    /// Create a new configuration builder.
    pub fn builder() -> DiscreetConfigBuilder {
        DiscreetConfigBuilder::new()
    }
}

impl Default for DiscreetConfig {
    fn default() -> Self {
        DiscreetConfigBuilder::new().build()
    }
}

/// Builder for `DiscreetConfig`.
pub struct DiscreetConfigBuilder {
    pool: Option<ProxyPoolConfig>,
    dispatch: Option<DispatchConfig>,
    max_retries: Option<usize>,
    user_agents: Option<Vec<String>>,
    cache: Option<bool>,
    cache_ttl: Option<Duration>,
}

impl DiscreetConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            pool: None,
            dispatch: None,
            max_retries: None,
            user_agents: None,
            cache: None,
            cache_ttl: None,
        }
    }

    /// Set the proxy pool configuration.
    pub fn pool(mut self, pool: ProxyPoolConfig) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Release up to `count` requests every `interval`.
    pub fn dispatch(mut self, count: usize, interval: Duration) -> Self {
        self.dispatch = Some(DispatchConfig::new(count, interval));
        self
    }

    /// Set the number of attempts per request.
    pub fn max_retries(mut self, count: usize) -> Self {
        self.max_retries = Some(count);
        self
    }

    /// Replace the built-in user agent list.
    pub fn user_agents(mut self, agents: Vec<impl Into<String>>) -> Self {
        self.user_agents = Some(agents.into_iter().map(Into::into).collect());
        self
    }

    /// Enable or disable caching by default.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.cache = Some(enabled);
        self
    }

    /// Set the expiry of cached responses.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> DiscreetConfig {
        DiscreetConfig {
            pool: self.pool.unwrap_or_default(),
            dispatch: self.dispatch.unwrap_or_default(),
            max_retries: self.max_retries.unwrap_or(3).max(1),
            user_agents: self.user_agents.unwrap_or_else(default_user_agents),
            cache: self.cache.unwrap_or(false),
            cache_ttl: self.cache_ttl.unwrap_or(Duration::from_secs(86_400)),
        }
    }
}

impl Default for DiscreetConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
