//! The request client: cache, proxy rotation, user agents, dispatch and retry.

use crate::cache::CacheStore;
use crate::config::DiscreetConfig;
use crate::dispatcher::RateLimitedDispatcher;
use crate::error::{DiscreetError, Result};
use crate::pool::ProxyPool;
use crate::proxy::Proxy;
use crate::transport::{RawResponse, ReqwestTransport, RequestOptions, Transport};

use log::{debug, error, info, warn};
use rand::seq::IndexedRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "User-Agent";

/// Response handed back to callers.
///
/// Cache hits carry only the body: `status_code` and `raw` are `None`.
#[derive(Debug, Clone)]
pub struct DiscreetResponse {
    pub body: String,
    pub status_code: Option<u16>,
    pub cached: bool,
    pub raw: Option<RawResponse>,
}

impl DiscreetResponse {
    fn cached(body: String) -> Self {
        Self {
            body,
            status_code: None,
            cached: true,
            raw: None,
        }
    }

    fn fetched(response: RawResponse) -> Self {
        Self {
            body: response.body.clone(),
            status_code: Some(response.status_code),
            cached: false,
            raw: Some(response),
        }
    }
}

/// Issues requests through a rotating proxy pool at a bounded rate.
///
/// ```no_run
/// use discreet_request::{DiscreetConfig, DiscreetRequest, ProxyPoolConfig, RequestOptions};
/// use std::time::Duration;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = DiscreetConfig::builder()
///     .pool(ProxyPoolConfig::builder().proxies(vec!["10.0.0.1:8080"]).build())
///     .dispatch(3, Duration::from_secs(5))
///     .build();
/// let client = DiscreetRequest::with_reqwest(config)?;
/// client.init().await;
/// let response = client.request("https://api.ipify.org", RequestOptions::new()).await?;
/// println!("{}", response.body);
/// client.close();
/// # Ok(())
/// # }
/// ```
pub struct DiscreetRequest {
    config: DiscreetConfig,
    pool: Arc<ProxyPool>,
    dispatcher: Arc<RateLimitedDispatcher>,
    cache: Option<Arc<dyn CacheStore>>,
    initialized: AtomicBool,
}

impl DiscreetRequest {
    /// Wire a client over the given transport. Requests fail until
    /// [`init`](Self::init) has run.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: DiscreetConfig, transport: Arc<dyn Transport>) -> Self {
        let dispatcher = RateLimitedDispatcher::new(config.dispatch, transport);
        let pool = ProxyPool::new(config.pool.clone(), Arc::clone(&dispatcher));
        Self {
            config,
            pool,
            dispatcher,
            cache: None,
            initialized: AtomicBool::new(false),
        }
    }

    /// Wire a client over a [`ReqwestTransport`] with a 10 second timeout.
    pub fn with_reqwest(config: DiscreetConfig) -> std::result::Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(Duration::from_secs(10))?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Attach a cache store.
    pub fn with_cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    /// Compose the proxy pool and start accepting requests.
    ///
    /// Also brings a client back after [`close`](Self::close).
    pub async fn init(&self) {
        self.dispatcher.start();
        self.pool.compose().await;
        self.initialized.store(true, Ordering::Release);

        let (total, healthy) = self.pool.get_stats();
        if healthy == 0 {
            warn!("No healthy proxies available in pool ({} configured)", total);
        }
        info!("Discreet requests are enabled");
    }

    /// Stop health checks and dispatching. Requests still queued stay parked
    /// until the next [`init`](Self::init).
    pub fn close(&self) {
        self.initialized.store(false, Ordering::Release);
        self.pool.close();
        self.dispatcher.stop();
    }

    /// Whether [`init`](Self::init) has run and [`close`](Self::close) has not.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// The proxy pool requests rotate through.
    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// The dispatcher shared by requests and health checks.
    pub fn dispatcher(&self) -> &Arc<RateLimitedDispatcher> {
        &self.dispatcher
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &DiscreetConfig {
        &self.config
    }

    /// Whether successful responses are written to the cache.
    pub fn caching_enabled(&self) -> bool {
        self.config.cache && self.cache.is_some()
    }

    /// Request `url`, reading the cache when caching is enabled.
    pub async fn request(&self, url: &str, options: RequestOptions) -> Result<DiscreetResponse> {
        self.request_with_cache(url, options, self.caching_enabled()).await
    }

    /// Request `url`, reading the cache first when `use_cache` is set.
    ///
    /// A response whose status code is a failure case evicts its proxy and is
    /// retried through the next one, up to `max_retries` attempts in total.
    /// Once attempts run out, or the pool runs dry after at least one
    /// attempt, the last response is returned as is.
    pub async fn request_with_cache(
        &self,
        url: &str,
        options: RequestOptions,
        use_cache: bool,
    ) -> Result<DiscreetResponse> {
        if !self.is_initialized() {
            warn!("init() must be called before making a request");
            return Err(DiscreetError::RequestNotInitialized { url: url.to_string() });
        }

        if use_cache {
            if let Some(body) = self.load_endpoint_cache(url).await? {
                return Ok(DiscreetResponse::cached(body));
            }
        }

        let max_retries = self.config.max_retries.max(1);
        let mut attempt = 1;
        let mut last_response: Option<RawResponse> = None;
        loop {
            let proxy = match self.pool.get_proxy() {
                Ok(proxy) => proxy,
                Err(source) => {
                    if let Some(response) = last_response {
                        warn!("No proxies left for {} after {} attempt(s)", url, attempt - 1);
                        return Ok(DiscreetResponse::fetched(response));
                    }
                    return Err(DiscreetError::ProxyUnavailable {
                        url: url.to_string(),
                        source,
                    });
                }
            };
            let merged = self.build_options(&options, &proxy);
            info!(
                "Generating discreet request to {} with proxy {} (attempt {}/{})",
                url, proxy.endpoint, attempt, max_retries
            );

            let result = self.dispatcher.queue(url, merged).await;
            let response = match result.outcome {
                Ok(response) => response,
                Err(source) => {
                    error!("Request to {} through {} failed: {}", url, proxy.endpoint, source);
                    return Err(DiscreetError::Network {
                        url: url.to_string(),
                        source,
                    });
                }
            };

            if self.pool.config.is_failure(response.status_code) {
                warn!(
                    "Proxy {} answered {} for {}",
                    proxy.endpoint, response.status_code, url
                );
                self.pool.remove_proxy(&proxy.endpoint);
                if attempt < max_retries {
                    attempt += 1;
                    last_response = Some(response);
                    continue;
                }
                warn!("Giving up on {} after {} attempts", url, attempt);
                return Ok(DiscreetResponse::fetched(response));
            }

            if self.caching_enabled() {
                self.set_endpoint_cache(url, &response.body).await?;
            }
            return Ok(DiscreetResponse::fetched(response));
        }
    }

    /// Pick a user agent uniformly from the configured list.
    pub fn random_user_agent(&self) -> Option<&str> {
        self.config
            .user_agents
            .choose(&mut rand::rng())
            .map(String::as_str)
    }

    /// Merge the rotated user agent and proxy into the caller's options.
    ///
    /// Caller headers win over the rotated user agent; the proxy is always ours.
    fn build_options(&self, options: &RequestOptions, proxy: &Proxy) -> RequestOptions {
        let mut merged = options.clone();
        if merged.header_value(USER_AGENT).is_none() {
            if let Some(user_agent) = self.random_user_agent() {
                merged.headers.insert(USER_AGENT.to_string(), user_agent.to_string());
            }
        }
        merged.proxy = Some(proxy.url.clone());
        merged
    }

    /// Read a cached body. Without a store every lookup is a miss.
    pub async fn load_endpoint_cache(&self, url: &str) -> Result<Option<String>> {
        let Some(cache) = &self.cache else {
            return Ok(None);
        };
        let data = cache.get(url).await.map_err(|source| DiscreetError::Cache {
            key: url.to_string(),
            source,
        })?;
        if data.is_some() {
            debug!("Loaded endpoint from cache: {}", url);
        }
        Ok(data)
    }

    /// Store a body under `url` for the configured TTL.
    pub async fn set_endpoint_cache(&self, url: &str, body: &str) -> Result<()> {
        let Some(cache) = &self.cache else {
            return Err(DiscreetError::CacheUnavailable { key: url.to_string() });
        };
        debug!("Caching endpoint: {}", url);
        cache
            .set(url, body, self.config.cache_ttl)
            .await
            .map_err(|source| DiscreetError::Cache {
                key: url.to_string(),
                source,
            })
    }
}

impl Drop for DiscreetRequest {
    fn drop(&mut self) {
        self.pool.close();
        self.dispatcher.stop();
    }
}
