//! Token-bucket rate limiting keyed by provider.
//!
//! Buckets are created lazily on first use and shared by every module that
//! talks to the same provider, so two modules hitting one API draw from one
//! budget.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::debug;

/// Refill rate, capacity and maximum wait of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketConfig {
    pub refill_per_sec: f64,
    pub burst: u32,
    pub wait_timeout: Duration,
}

impl BucketConfig {
    pub fn new(refill_per_sec: f64, burst: u32, wait_timeout: Duration) -> Self {
        Self {
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            burst: burst.max(1),
            wait_timeout,
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self::new(5.0, 5, Duration::from_secs(30))
    }
}

/// No token became available within the bucket's wait timeout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit for '{bucket}' not available after waiting {waited:?}")]
pub struct RateLimited {
    pub bucket: String,
    pub waited: Duration,
}

/// Proof that one token was taken. Tokens are not returned.
#[derive(Debug)]
pub struct Permit {
    bucket: String,
}

impl Permit {
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: &BucketConfig) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            tokens: capacity,
            capacity,
            refill_per_sec: config.refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - self.tokens;
            // Tiny refill rates overflow Duration; the caller caps the wait at its deadline
            Err(Duration::try_from_secs_f64(missing / self.refill_per_sec).unwrap_or(Duration::MAX))
        }
    }
}

/// Per-provider token buckets.
pub struct RateLimiter {
    default: BucketConfig,
    overrides: HashMap<String, BucketConfig>,
    buckets: Mutex<HashMap<String, Arc<AsyncMutex<Bucket>>>>,
}

impl RateLimiter {
    pub fn new(default: BucketConfig) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Use a dedicated configuration for one provider key.
    pub fn with_bucket(mut self, key: impl Into<String>, config: BucketConfig) -> Self {
        self.overrides.insert(key.into(), config);
        self
    }

    pub fn config_for(&self, key: &str) -> BucketConfig {
        self.overrides.get(key).copied().unwrap_or(self.default)
    }

    fn bucket(&self, key: &str) -> Arc<AsyncMutex<Bucket>> {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(Bucket::new(&self.config_for(key)))))
            .clone()
    }

    /// Wait for a token from `key`'s bucket.
    ///
    /// Fails with [`RateLimited`] once the bucket's wait timeout has elapsed
    /// without a token becoming available.
    pub async fn acquire(&self, key: &str) -> Result<Permit, RateLimited> {
        let config = self.config_for(key);
        let bucket = self.bucket(key);
        let started = Instant::now();
        let deadline = started + config.wait_timeout;

        loop {
            let wait = {
                let mut bucket = bucket.lock().await;
                match bucket.try_take(Instant::now()) {
                    Ok(()) => {
                        return Ok(Permit {
                            bucket: key.to_string(),
                        })
                    }
                    Err(wait) => wait,
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(RateLimited {
                    bucket: key.to_string(),
                    waited: now.duration_since(started),
                });
            }

            let sleep_for = wait.min(deadline.duration_since(now));
            debug!("Rate limit '{}': waiting {:?}", key, sleep_for);
            tokio::time::sleep(sleep_for).await;
        }
    }
}
