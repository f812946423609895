//! Token bucket rate limiter shared by all chunk workers.
//!
//! Tokens accrue continuously at `rps` tokens/second up to `burst`. Each
//! provider request consumes one token; [`RateLimiter::acquire`] suspends the
//! caller until a token is available. Waiters are not served in strict FIFO
//! order, but grants never exceed `rps` amortized over any one-second window
//! once the initial burst is spent.
//!
//! Bucket arithmetic is done in integer nano-tokens so refill is exact.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

const NANOS_PER_TOKEN: u128 = 1_000_000_000;

/// Rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Steady refill rate (requests per second).
    pub rps: u32,
    /// Bucket capacity (maximum burst).
    pub burst: u32,
}

impl RateLimiterConfig {
    /// `rps` requests per second with a burst of `2 × rps`.
    pub fn per_second(rps: u32) -> Self {
        Self {
            rps,
            burst: rps.saturating_mul(2),
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(10)
    }
}

struct BucketState {
    /// Available tokens, in nano-tokens.
    tokens: u128,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct TokenBucket {
    capacity: u128,
    /// Nano-tokens gained per nanosecond (= tokens per second).
    rate: u128,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = u128::from(config.burst.max(1)) * NANOS_PER_TOKEN;
        Self {
            capacity,
            rate: u128::from(config.rps),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take one token without waiting.
    ///
    /// Returns `Ok(())` on success, or the time until a token will be
    /// available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);

        if state.tokens >= NANOS_PER_TOKEN {
            state.tokens -= NANOS_PER_TOKEN;
            return Ok(());
        }
        if self.rate == 0 {
            // A zero rate never refills; re-check once per second.
            return Err(Duration::from_secs(1));
        }
        let deficit = NANOS_PER_TOKEN - state.tokens;
        let wait_nanos = deficit.div_ceil(self.rate);
        Err(Duration::from_nanos(u64::try_from(wait_nanos).unwrap_or(u64::MAX)))
    }

    /// Currently available whole tokens.
    pub fn available(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        u64::try_from(state.tokens / NANOS_PER_TOKEN).unwrap_or(u64::MAX)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_nanos();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }
}

/// Async rate limiter wrapping the token bucket.
pub struct RateLimiter {
    bucket: TokenBucket,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config),
            config,
        }
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }

    /// Wait until one request slot is available, then take it.
    pub async fn acquire(&self) {
        loop {
            match self.bucket.try_acquire() {
                Ok(()) => return,
                Err(wait) => {
                    tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Take a slot if one is free right now.
    pub fn try_acquire(&self) -> bool {
        self.bucket.try_acquire().is_ok()
    }

    pub fn available(&self) -> u64 {
        self.bucket.available()
    }
}
