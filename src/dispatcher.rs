//! Rate-limited request dispatch.
//!
//! Requests are queued and released to the transport in batches: every
//! `interval` the dispatcher takes up to `count` descriptors off the front of
//! its FIFO queue and runs them concurrently. Each caller awaits only its own
//! result, delivered over a one-shot channel keyed by the request id.

use crate::config::DispatchConfig;
use crate::error::TransportError;
use crate::transport::{RawResponse, RequestOptions, Transport};

use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

/// A request waiting in the dispatch queue.
#[derive(Debug)]
pub struct RequestDescriptor {
    pub id: Uuid,
    pub url: String,
    pub options: RequestOptions,
}

/// The uninterpreted outcome of one transport call.
#[derive(Debug)]
pub struct DispatchResult {
    /// Id of the descriptor this result belongs to.
    pub id: Uuid,
    pub outcome: Result<RawResponse, TransportError>,
}

impl DispatchResult {
    /// The response body, if the call completed.
    pub fn body(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|response| response.body.as_str())
    }
}

/// Bounds outbound transport calls to `count` per `interval`.
pub struct RateLimitedDispatcher {
    config: DispatchConfig,
    transport: Arc<dyn Transport>,
    pending: Mutex<VecDeque<RequestDescriptor>>,
    listeners: Mutex<HashMap<Uuid, oneshot::Sender<DispatchResult>>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimitedDispatcher {
    /// Create a dispatcher and start its ticker.
    ///
    /// The first batch is released one `interval` after creation. A `count`
    /// of zero or a zero `interval` is raised to the minimum cadence.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: DispatchConfig, transport: Arc<dyn Transport>) -> Arc<Self> {
        let config = DispatchConfig::new(config.count, config.interval);
        let dispatcher = Arc::new(Self {
            config,
            transport,
            pending: Mutex::new(VecDeque::new()),
            listeners: Mutex::new(HashMap::new()),
            ticker: Mutex::new(None),
        });

        dispatcher.start();
        dispatcher
    }

    /// Start the ticker if it is not running.
    ///
    /// Requests left queued by [`stop`](Self::stop) go out from the next tick,
    /// one `interval` after this call.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock();
        if ticker.is_some() {
            return;
        }
        *ticker = Some(Self::spawn_ticker(Arc::downgrade(self), self.config));
        info!(
            "Dispatcher started: {} request(s) every {:?}",
            self.config.count, self.config.interval
        );
    }

    fn spawn_ticker(dispatcher: Weak<Self>, config: DispatchConfig) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + config.interval, config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(dispatcher) = dispatcher.upgrade() else {
                    break;
                };
                dispatcher.release_batch();
            }
        })
    }

    /// Queue a request and wait for its result.
    ///
    /// Never fails: transport errors come back inside the result. Requests
    /// still queued when [`stop`](Self::stop) is called never complete.
    pub async fn queue(&self, url: impl Into<String>, options: RequestOptions) -> DispatchResult {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.listeners.lock().insert(id, tx);
        self.pending.lock().push_back(RequestDescriptor {
            id,
            url: url.into(),
            options,
        });

        match rx.await {
            Ok(result) => result,
            Err(_) => DispatchResult {
                id,
                outcome: Err(TransportError::new("dispatcher shut down before the request completed")),
            },
        }
    }

    /// Take up to `count` descriptors off the queue and run them concurrently.
    fn release_batch(self: &Arc<Self>) {
        let batch: Vec<RequestDescriptor> = {
            let mut pending = self.pending.lock();
            let take = self.config.count.min(pending.len());
            pending.drain(..take).collect()
        };
        if batch.is_empty() {
            return;
        }
        debug!("Releasing {} request(s)", batch.len());

        for descriptor in batch {
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = dispatcher
                    .transport
                    .execute(&descriptor.url, &descriptor.options)
                    .await;
                dispatcher.deliver(DispatchResult {
                    id: descriptor.id,
                    outcome,
                });
            });
        }
    }

    fn deliver(&self, result: DispatchResult) {
        // Removing the sender tears down the channel for this id.
        let listener = self.listeners.lock().remove(&result.id);
        if let Some(tx) = listener {
            // The caller may have given up waiting.
            let _ = tx.send(result);
        }
    }

    /// Cancel the ticker. In-flight requests still complete.
    pub fn stop(&self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
            info!(
                "Dispatcher stopped with {} request(s) still queued",
                self.pending.lock().len()
            );
        }
    }

    /// Whether the ticker is still running.
    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Number of requests waiting to be released.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of callers still waiting on a result.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// The cadence in effect, after clamping.
    pub fn config(&self) -> DispatchConfig {
        self.config
    }
}

impl Drop for RateLimitedDispatcher {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockOutcome, MockTransport};
    use std::time::Duration;
    use tokio_test::{assert_pending, task};

    fn dispatcher(count: usize, interval_ms: u64, transport: &Arc<MockTransport>) -> Arc<RateLimitedDispatcher> {
        RateLimitedDispatcher::new(
            DispatchConfig::new(count, Duration::from_millis(interval_ms)),
            Arc::clone(transport) as Arc<dyn Transport>,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn releases_requests_within_the_batch_limit() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = dispatcher(2, 1000, &transport);

        let (first, second) = tokio::join!(
            dispatcher.queue("http://example.com/1", RequestOptions::new()),
            dispatcher.queue("http://example.com/2", RequestOptions::new()),
        );

        assert_eq!(first.body(), Some("ok"));
        assert_eq!(second.body(), Some("ok"));
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        for call in &calls {
            assert!(call.elapsed >= Duration::from_millis(1000));
            assert!(call.elapsed < Duration::from_millis(2000));
        }
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn defers_overflow_to_the_next_tick() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = dispatcher(2, 1000, &transport);

        let (first, second, third) = tokio::join!(
            dispatcher.queue("http://example.com/1", RequestOptions::new()),
            dispatcher.queue("http://example.com/2", RequestOptions::new()),
            dispatcher.queue("http://example.com/3", RequestOptions::new()),
        );
        assert!(first.outcome.is_ok() && second.outcome.is_ok() && third.outcome.is_ok());

        let calls = transport.calls();
        let urls: Vec<_> = calls.iter().map(|call| call.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["http://example.com/1", "http://example.com/2", "http://example.com/3"]
        );
        let first_tick = Duration::from_millis(1000)..Duration::from_millis(2000);
        assert!(first_tick.contains(&calls[0].elapsed));
        assert!(first_tick.contains(&calls[1].elapsed));
        assert!(calls[2].elapsed >= Duration::from_millis(2000));
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_sent_before_the_first_tick() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = dispatcher(1, 1000, &transport);

        let mut pending = task::spawn(dispatcher.queue("http://example.com", RequestOptions::new()));
        assert_pending!(pending.poll());
        assert_eq!(dispatcher.pending_len(), 1);
        assert_eq!(dispatcher.listener_count(), 1);
        assert_eq!(transport.call_count(), 0);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn tears_down_listeners_after_delivery() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = dispatcher(2, 1000, &transport);

        let result = dispatcher.queue("http://example.com", RequestOptions::new()).await;
        assert!(result.outcome.is_ok());
        assert_eq!(dispatcher.listener_count(), 0);
        assert_eq!(dispatcher.pending_len(), 0);
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_become_data() {
        let transport = Arc::new(MockTransport::new(MockOutcome::error("connection refused")));
        let dispatcher = dispatcher(2, 1000, &transport);

        let (failed, retried) = tokio::join!(
            dispatcher.queue("http://example.com/a", RequestOptions::new()),
            dispatcher.queue("http://example.com/b", RequestOptions::new()),
        );
        assert_eq!(
            failed.outcome.as_ref().map_err(|e| e.message().to_string()).err(),
            Some("connection refused".to_string())
        );
        assert!(retried.outcome.is_err());

        // The ticker survives failures.
        transport.set_default(MockOutcome::status(200, "back"));
        let result = dispatcher.queue("http://example.com/c", RequestOptions::new()).await;
        assert_eq!(result.body(), Some("back"));
        assert!(dispatcher.is_running());
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_leaves_queued_requests_unresolved() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = dispatcher(1, 1000, &transport);
        dispatcher.stop();
        assert!(!dispatcher.is_running());

        let waited = time::timeout(
            Duration::from_secs(10),
            dispatcher.queue("http://example.com", RequestOptions::new()),
        )
        .await;
        assert!(waited.is_err());
        assert_eq!(dispatcher.pending_len(), 1);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_resumes_a_stopped_dispatcher() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = dispatcher(1, 1000, &transport);
        dispatcher.stop();

        let mut queued = task::spawn(dispatcher.queue("http://example.com/queued", RequestOptions::new()));
        assert_pending!(queued.poll());
        time::sleep(Duration::from_secs(5)).await;
        assert_pending!(queued.poll());

        dispatcher.start();
        dispatcher.start();
        assert!(dispatcher.is_running());

        let result = queued.await;
        assert_eq!(result.body(), Some("ok"));
        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].elapsed >= Duration::from_secs(6));
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn zero_cadence_literals_are_clamped() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "ok")));
        let dispatcher = RateLimitedDispatcher::new(
            DispatchConfig {
                count: 0,
                interval: Duration::ZERO,
            },
            Arc::clone(&transport) as Arc<dyn Transport>,
        );
        assert_eq!(
            dispatcher.config(),
            DispatchConfig::new(1, Duration::from_millis(1))
        );

        let (first, second) = tokio::join!(
            dispatcher.queue("http://example.com/1", RequestOptions::new()),
            dispatcher.queue("http://example.com/2", RequestOptions::new()),
        );
        assert_eq!(first.body(), Some("ok"));
        assert_eq!(second.body(), Some("ok"));
        assert_eq!(transport.call_count(), 2);
        assert!(dispatcher.is_running());
        dispatcher.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn results_reach_their_own_caller() {
        let transport = Arc::new(MockTransport::new(MockOutcome::status(200, "default")));
        transport.respond_for_url(
            "http://example.com/slow",
            MockOutcome::status(200, "slow").delayed(Duration::from_millis(300)),
        );
        transport.respond_for_url("http://example.com/fast", MockOutcome::status(200, "fast"));
        let dispatcher = dispatcher(2, 1000, &transport);

        let (slow, fast) = tokio::join!(
            dispatcher.queue("http://example.com/slow", RequestOptions::new()),
            dispatcher.queue("http://example.com/fast", RequestOptions::new()),
        );
        assert_eq!(slow.body(), Some("slow"));
        assert_eq!(fast.body(), Some("fast"));
        assert_ne!(slow.id, fast.id);
        dispatcher.stop();
    }
}
