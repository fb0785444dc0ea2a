//! The network transport consumed by the dispatcher.

use crate::error::TransportError;

use async_trait::async_trait;
use http::{HeaderMap, Method};
use log::debug;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;

/// Options for a single outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Fully qualified proxy URL, or `None` for a direct request.
    pub proxy: Option<String>,
}

impl RequestOptions {
    /// A GET request with no headers, body or proxy.
    pub fn new() -> Self {
        Self {
            method: Method::GET,
            headers: HashMap::new(),
            body: None,
            proxy: None,
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header, replacing any previous value under the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Route the request through `proxy_url`.
    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy = Some(proxy_url.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A completed HTTP exchange, whatever its status.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status_code: u16,
    pub status_message: String,
    pub headers: HeaderMap,
    pub body: String,
}

/// Issues a single HTTP request.
///
/// Implementations must not panic on network failure: every failure is
/// reported through the returned `TransportError`, and timeouts are the
/// transport's own business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, url: &str, options: &RequestOptions) -> Result<RawResponse, TransportError>;
}

/// [`Transport`] backed by reqwest, with one client per proxy URL.
pub struct ReqwestTransport {
    timeout: Duration,
    direct: Client,
    proxied: Mutex<HashMap<String, Client>>,
}

impl ReqwestTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let direct = Self::client_builder(timeout).build()?;
        Ok(Self {
            timeout,
            direct,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
    }

    fn client_for(&self, proxy_url: Option<&str>) -> Result<Client, reqwest::Error> {
        let Some(proxy_url) = proxy_url else {
            return Ok(self.direct.clone());
        };

        if let Some(client) = self.proxied.lock().get(proxy_url) {
            return Ok(client.clone());
        }

        let client = Self::client_builder(self.timeout)
            .proxy(reqwest::Proxy::all(proxy_url)?)
            .build()?;
        self.proxied
            .lock()
            .insert(proxy_url.to_string(), client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, url: &str, options: &RequestOptions) -> Result<RawResponse, TransportError> {
        let client = self.client_for(options.proxy.as_deref())?;

        let mut builder = client.request(options.method.clone(), url);
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        debug!("{} {} -> {}", options.method, url, status);

        Ok(RawResponse {
            status_code: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
        })
    }
}
