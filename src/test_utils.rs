//! Test doubles shared by the unit tests.

use crate::error::TransportError;
use crate::transport::{RawResponse, RequestOptions, Transport};

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// What the mock answers with.
#[derive(Debug, Clone)]
pub(crate) struct MockOutcome {
    result: Result<(u16, String), String>,
    delay: Option<Duration>,
}

impl MockOutcome {
    pub(crate) fn status(code: u16, body: &str) -> Self {
        Self {
            result: Ok((code, body.to_string())),
            delay: None,
        }
    }

    pub(crate) fn error(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            delay: None,
        }
    }

    pub(crate) fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A recorded transport call.
#[derive(Debug, Clone)]
pub(crate) struct MockCall {
    pub(crate) url: String,
    pub(crate) options: RequestOptions,
    /// Time since the mock was created.
    pub(crate) elapsed: Duration,
}

/// Transport that answers from a script and records every call.
///
/// Outcomes are looked up by proxy URL first, then by target URL, then the
/// default applies.
pub(crate) struct MockTransport {
    created: Instant,
    default: Mutex<MockOutcome>,
    by_proxy: Mutex<HashMap<String, MockOutcome>>,
    by_url: Mutex<HashMap<String, MockOutcome>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockTransport {
    pub(crate) fn new(default: MockOutcome) -> Self {
        Self {
            created: Instant::now(),
            default: Mutex::new(default),
            by_proxy: Mutex::new(HashMap::new()),
            by_url: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn set_default(&self, outcome: MockOutcome) {
        *self.default.lock() = outcome;
    }

    pub(crate) fn respond_for_proxy(&self, proxy_url: &str, outcome: MockOutcome) {
        self.by_proxy.lock().insert(proxy_url.to_string(), outcome);
    }

    pub(crate) fn respond_for_url(&self, url: &str, outcome: MockOutcome) {
        self.by_url.lock().insert(url.to_string(), outcome);
    }

    pub(crate) fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Proxy URLs used by the recorded calls, in call order.
    pub(crate) fn proxies_used(&self) -> Vec<Option<String>> {
        self.calls
            .lock()
            .iter()
            .map(|call| call.options.proxy.clone())
            .collect()
    }

    fn outcome_for(&self, url: &str, options: &RequestOptions) -> MockOutcome {
        if let Some(outcome) = options
            .proxy
            .as_ref()
            .and_then(|proxy| self.by_proxy.lock().get(proxy).cloned())
        {
            return outcome;
        }
        if let Some(outcome) = self.by_url.lock().get(url).cloned() {
            return outcome;
        }
        self.default.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, url: &str, options: &RequestOptions) -> Result<RawResponse, TransportError> {
        self.calls.lock().push(MockCall {
            url: url.to_string(),
            options: options.clone(),
            elapsed: self.created.elapsed(),
        });

        let outcome = self.outcome_for(url, options);
        if let Some(delay) = outcome.delay {
            tokio::time::sleep(delay).await;
        }

        match outcome.result {
            Ok((code, body)) => Ok(RawResponse {
                status_code: code,
                status_message: StatusCode::from_u16(code)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or_default()
                    .to_string(),
                headers: HeaderMap::new(),
                body,
            }),
            Err(message) => Err(TransportError::new(message)),
        }
    }
}
