//! Core proxy pool implementation.

use crate::config::ProxyPoolConfig;
use crate::dispatcher::RateLimitedDispatcher;
use crate::error::NoProxyAvailable;
use crate::proxy::{build_proxy_url, Proxy, ProxyStatus};
use crate::transport::RequestOptions;

use futures::future;
use http::Method;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time;

/// Where a pool is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLifecycle {
    /// `compose()` has not been called yet.
    Uninitialized,
    /// Composed without health checks; every configured proxy is active.
    Idle,
    /// Composed with periodic health checks.
    Monitoring,
    /// `close()` was called. `compose()` re-arms the pool.
    Closed,
}

#[derive(Debug)]
struct Rotation {
    /// Proxies currently considered usable, a subset of the configured ones.
    active: Vec<String>,
    /// Index of the next proxy to hand out; always `< max(1, active.len())`.
    cursor: usize,
    lifecycle: PoolLifecycle,
}

/// A rotating, health-filtered set of proxy endpoints.
pub struct ProxyPool {
    /// Configuration for the pool.
    pub config: ProxyPoolConfig,
    rotation: Mutex<Rotation>,
    /// Health checks go through the dispatcher like any other request.
    dispatcher: Arc<RateLimitedDispatcher>,
    refresh: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyPool {
    /// Create an empty pool. Call [`compose`](Self::compose) to fill it.
    pub fn new(config: ProxyPoolConfig, dispatcher: Arc<RateLimitedDispatcher>) -> Arc<Self> {
        Arc::new(Self {
            config,
            rotation: Mutex::new(Rotation {
                active: Vec::new(),
                cursor: 0,
                lifecycle: PoolLifecycle::Uninitialized,
            }),
            dispatcher,
            refresh: Mutex::new(None),
        })
    }

    /// Fill the active set.
    ///
    /// Without `refresh_proxies` every configured proxy becomes active and no
    /// request is made. With it, the proxies are tested once now and again
    /// every `refresh_rate`. Calling this again re-arms the schedule.
    pub async fn compose(self: &Arc<Self>) {
        self.cancel_refresh();

        if !self.config.refresh_proxies {
            let mut rotation = self.rotation.lock();
            rotation.active = self.config.proxies.clone();
            rotation.cursor = 0;
            rotation.lifecycle = PoolLifecycle::Idle;
            info!("Proxy pool composed with {} proxies", rotation.active.len());
            return;
        }

        self.rotation.lock().lifecycle = PoolLifecycle::Monitoring;
        info!("Starting initial health check");
        self.test().await;

        // close() may have run while the initial test was in flight.
        if self.lifecycle() != PoolLifecycle::Monitoring {
            return;
        }

        let handle = Self::spawn_refresh(Arc::downgrade(self), self.config.refresh_rate);
        if let Some(previous) = self.refresh.lock().replace(handle) {
            previous.abort();
        }

        let (total, healthy) = self.get_stats();
        info!("Initial proxy pool status: {}/{} healthy proxies", healthy, total);
    }

    fn spawn_refresh(pool: Weak<Self>, period: time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                time::sleep(period).await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };

                // Membership may change size.
                pool.rotation.lock().cursor = 0;
                pool.test().await;

                let (total, healthy) = pool.get_stats();
                info!("Proxy pool status update: {}/{} healthy proxies", healthy, total);
            }
        })
    }

    fn cancel_refresh(&self) {
        if let Some(handle) = self.refresh.lock().take() {
            handle.abort();
        }
    }

    /// Probe every configured proxy and rebuild the active set.
    ///
    /// A proxy is kept when its probe completes with a status code outside
    /// the failure cases. Probes that fail to complete are logged and the
    /// proxy is left out; they never abort the pass.
    pub async fn test(&self) {
        info!("Testing {} proxies", self.config.proxies.len());

        let probes = self.config.proxies.iter().map(|endpoint| async move {
            let status = self.probe(endpoint).await;
            (endpoint, status)
        });
        let results = future::join_all(probes).await;

        let mut healthy = Vec::new();
        let mut unhealthy_count = 0;
        for (endpoint, status) in results {
            if status.is_healthy() {
                healthy.push(endpoint.clone());
            } else {
                unhealthy_count += 1;
            }
        }

        {
            let mut rotation = self.rotation.lock();
            if rotation.lifecycle == PoolLifecycle::Closed {
                return;
            }
            rotation.active = healthy;
            if rotation.cursor >= rotation.active.len() {
                rotation.cursor = 0;
            }
            info!(
                "Health check completed: {} healthy, {} unhealthy",
                rotation.active.len(),
                unhealthy_count
            );
        }
    }

    async fn probe(&self, endpoint: &str) -> ProxyStatus {
        let options = RequestOptions::new()
            .method(Method::GET)
            .proxy(self.build_proxy_url(endpoint));
        let result = self
            .dispatcher
            .queue(self.config.target_endpoint.clone(), options)
            .await;

        match result.outcome {
            Ok(response) => {
                let status = ProxyStatus::classify(response.status_code, &self.config.failure_cases);
                if status.is_healthy() {
                    info!(
                        "Proxy {} passed health test with status code {} {}",
                        endpoint, response.status_code, response.status_message
                    );
                } else {
                    warn!(
                        "Proxy {} failed health test with status code {} {}",
                        endpoint, response.status_code, response.status_message
                    );
                }
                status
            }
            Err(err) => {
                error!("Proxy {} health test did not complete: {}", endpoint, err);
                ProxyStatus::Unreachable
            }
        }
    }

    /// Get the next proxy in round-robin order.
    pub fn get_proxy(&self) -> Result<Proxy, NoProxyAvailable> {
        let endpoint = {
            let mut rotation = self.rotation.lock();
            if rotation.active.is_empty() {
                return Err(NoProxyAvailable);
            }
            if rotation.cursor >= rotation.active.len() {
                rotation.cursor = 0;
            }
            let endpoint = rotation.active[rotation.cursor].clone();
            rotation.cursor = (rotation.cursor + 1) % rotation.active.len();
            endpoint
        };

        Ok(Proxy {
            url: self.build_proxy_url(&endpoint),
            endpoint,
        })
    }

    /// Evict a proxy from the active set until the next health check.
    ///
    /// Returns `false` when the proxy was not active.
    pub fn remove_proxy(&self, endpoint: &str) -> bool {
        let mut rotation = self.rotation.lock();
        let Some(position) = rotation.active.iter().position(|p| p == endpoint) else {
            return false;
        };

        rotation.active.remove(position);
        // Keep pointing at the proxy that would have been served next.
        if position < rotation.cursor {
            rotation.cursor -= 1;
        }
        if rotation.cursor >= rotation.active.len() {
            rotation.cursor = 0;
        }
        warn!(
            "Proxy {} removed from pool, {} remaining",
            endpoint,
            rotation.active.len()
        );
        true
    }

    /// Compose the full proxy URL for an endpoint.
    pub fn build_proxy_url(&self, endpoint: &str) -> String {
        build_proxy_url(self.config.protocol, self.config.proxy_auth.as_ref(), endpoint)
    }

    /// Cancel scheduled health checks and empty the active set.
    pub fn close(&self) {
        self.cancel_refresh();
        let mut rotation = self.rotation.lock();
        rotation.active.clear();
        rotation.cursor = 0;
        rotation.lifecycle = PoolLifecycle::Closed;
        info!("Proxy pool closed");
    }

    /// Snapshot of the active proxies, in rotation order.
    pub fn active(&self) -> Vec<String> {
        self.rotation.lock().active.clone()
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> PoolLifecycle {
        self.rotation.lock().lifecycle
    }

    /// Whether a health-check schedule is armed.
    pub fn is_refreshing(&self) -> bool {
        self.refresh.lock().is_some()
    }

    /// Get statistics about the proxy pool: (configured, active).
    pub fn get_stats(&self) -> (usize, usize) {
        (self.config.proxies.len(), self.rotation.lock().active.len())
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        if let Some(handle) = self.refresh.get_mut().take() {
            handle.abort();
        }
    }
}
