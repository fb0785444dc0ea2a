//! # discreet-request
//!
//! Rate-limited HTTP requests through a rotating pool of proxies.
//!
//! Requests are queued on a dispatcher that releases a fixed number of them
//! per interval, routed through proxies picked round-robin from a
//! health-checked pool, sent with a rotated user agent, and optionally cached.
//! Proxies that answer with a failure status code are evicted and the request
//! is retried through the next one.

pub mod cache;
pub mod config;
pub mod discreet;
pub mod dispatcher;
pub mod error;
pub mod middleware;
pub mod pool;
pub mod proxy;
pub mod transport;
pub mod user_agents;
mod utils;

#[cfg(test)]
mod test_utils;

pub use cache::{CacheStore, MemoryCache};
pub use config::{DiscreetConfig, DiscreetConfigBuilder, DispatchConfig, ProxyPoolConfig, ProxyPoolConfigBuilder};
pub use discreet::{DiscreetRequest, DiscreetResponse};
pub use dispatcher::{DispatchResult, RateLimitedDispatcher, RequestDescriptor};
pub use error::{DiscreetError, NoProxyAvailable, Result, TransportError};
pub use middleware::DiscreetMiddleware;
pub use pool::{PoolLifecycle, ProxyPool};
pub use proxy::{build_proxy_url, parse_proxy_url, Protocol, Proxy, ProxyAuth, ProxyStatus};
pub use transport::{RawResponse, ReqwestTransport, RequestOptions, Transport};
pub use utils::parse_proxy_list;
