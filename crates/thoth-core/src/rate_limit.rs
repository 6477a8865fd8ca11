//! Per-endpoint token-bucket rate limiting
//!
//! Each remote endpoint gets a bucket `(tokens, last_refill, rate, burst)`.
//! Waiters for the same endpoint are admitted FIFO; reconfiguration takes
//! effect immediately without dropping queued waiters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DiscoveryError;

/// Built-in bucket parameters `(rate_per_second, burst)` per endpoint.
///
/// Overridable via [`RateLimiter::configure`] (e.g. PubMed rises to
/// 10 req/s once an API key is configured).
pub fn default_params(endpoint_id: &str) -> (f64, f64) {
    match endpoint_id {
        "arxiv" => (1.0 / 3.0, 1.0),
        "pubmed" => (3.0, 10.0),
        "crossref" => (50.0, 100.0),
        "openalex" => (10.0, 50.0),
        "semantic_scholar" => (100.0, 100.0),
        "browser" => (1.0, 5.0),
        _ => (1.0, 1.0),
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    burst: f64,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;
    }
}

struct Endpoint {
    /// FIFO admission queue: one waiter negotiates with the bucket at a time.
    admission: tokio::sync::Mutex<()>,
    bucket: Mutex<Bucket>,
    reconfigured: Notify,
}

/// Token-bucket rate limiter keyed by endpoint id.
pub struct RateLimiter {
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    fn endpoint(&self, endpoint_id: &str) -> Arc<Endpoint> {
        let mut map = self.endpoints.lock().unwrap();
        map.entry(endpoint_id.to_string())
            .or_insert_with(|| {
                let (rate, burst) = default_params(endpoint_id);
                Arc::new(Endpoint {
                    admission: tokio::sync::Mutex::new(()),
                    bucket: Mutex::new(Bucket {
                        tokens: burst,
                        last_refill: Instant::now(),
                        rate,
                        burst,
                    }),
                    reconfigured: Notify::new(),
                })
            })
            .clone()
    }

    /// Set bucket parameters for an endpoint. Takes effect immediately:
    /// the bucket restarts full and sleeping waiters are woken to
    /// recompute their wait.
    pub fn configure(&self, endpoint_id: &str, rate_per_second: f64, burst: f64) {
        let ep = self.endpoint(endpoint_id);
        {
            let mut bucket = ep.bucket.lock().unwrap();
            bucket.rate = rate_per_second.max(f64::MIN_POSITIVE);
            bucket.burst = burst.max(1.0);
            bucket.tokens = bucket.burst;
            bucket.last_refill = Instant::now();
        }
        ep.reconfigured.notify_waiters();
        log::debug!("rate limit for {endpoint_id}: {rate_per_second}/s burst {burst}");
    }

    /// Block until one token is available for `endpoint_id` or the cancel
    /// signal fires. Cancellation is the only non-ok outcome; ties between
    /// concurrent waiters are broken by arrival order.
    pub async fn acquire(
        &self,
        endpoint_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DiscoveryError> {
        let ep = self.endpoint(endpoint_id);
        let _admission = tokio::select! {
            guard = ep.admission.lock() => guard,
            _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
        };

        loop {
            let wait = {
                let mut bucket = ep.bucket.lock().unwrap();
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / bucket.rate)
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = ep.reconfigured.notified() => {}
                _ = cancel.cancelled() => return Err(DiscoveryError::Cancelled),
            }
        }
    }
}
