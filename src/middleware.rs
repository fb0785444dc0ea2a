//! Middleware implementation for reqwest.

use crate::discreet::{DiscreetRequest, DiscreetResponse};
use crate::transport::RequestOptions;

use anyhow::anyhow;
use async_trait::async_trait;
use http::header::{CONNECTION, CONTENT_LENGTH, TE, TRAILER, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use log::warn;
use reqwest_middleware::{Error, Middleware, Next, Result};
use std::sync::Arc;

/// Header set on responses served from the cache.
pub const CACHE_HEADER: &str = "x-discreet-cache";

/// Upstream headers that describe the original framing rather than the
/// rebuilt body.
const FRAMING_HEADERS: [HeaderName; 6] = [CONNECTION, CONTENT_LENGTH, TE, TRAILER, TRANSFER_ENCODING, UPGRADE];

/// Middleware that routes every request through a [`DiscreetRequest`].
///
/// The inner client is never called: the discreet client owns the transport,
/// the proxy rotation and the rate limit.
#[derive(Clone)]
pub struct DiscreetMiddleware {
    client: Arc<DiscreetRequest>,
}

impl DiscreetMiddleware {
    /// Wrap an initialized client.
    pub fn new(client: Arc<DiscreetRequest>) -> Self {
        if !client.is_initialized() {
            warn!("DiscreetMiddleware created before DiscreetRequest::init()");
        }
        Self { client }
    }
}

fn to_options(req: &reqwest::Request) -> RequestOptions {
    let mut options = RequestOptions::new().method(req.method().clone());
    for (name, value) in req.headers() {
        match value.to_str() {
            Ok(value) => {
                options.headers.insert(name.as_str().to_string(), value.to_string());
            }
            Err(_) => warn!("Dropping non-ascii header {}", name),
        }
    }
    if let Some(bytes) = req.body().and_then(|body| body.as_bytes()) {
        options.body = Some(bytes.to_vec());
    }
    options
}

fn forwardable_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in &FRAMING_HEADERS {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
    headers
}

fn to_response(response: DiscreetResponse) -> Result<reqwest::Response> {
    let status = match response.status_code {
        Some(code) => StatusCode::from_u16(code).map_err(|e| Error::Middleware(anyhow!(e)))?,
        None => StatusCode::OK,
    };

    let mut builder = http::Response::builder().status(status);
    if let Some(headers) = builder.headers_mut() {
        if let Some(raw) = &response.raw {
            headers.extend(forwardable_headers(&raw.headers));
        }
        if response.cached {
            headers.insert(CACHE_HEADER, HeaderValue::from_static("HIT"));
        }
    }

    let http_response = builder
        .body(response.body)
        .map_err(|e| Error::Middleware(anyhow!(e)))?;
    Ok(reqwest::Response::from(http_response))
}

#[async_trait]
impl Middleware for DiscreetMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        _extensions: &mut http::Extensions,
        _next: Next<'_>,
    ) -> Result<reqwest::Response> {
        if req.body().is_some() && req.body().and_then(|body| body.as_bytes()).is_none() {
            return Err(Error::Middleware(anyhow!(
                "Request body is not buffered. Are you passing a streaming body?"
            )));
        }

        let url = req.url().to_string();
        let options = to_options(&req);
        let response = self
            .client
            .request(&url, options)
            .await
            .map_err(|e| Error::Middleware(anyhow!(e)))?;
        to_response(response)
    }
}
