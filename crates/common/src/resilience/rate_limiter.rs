//! Token bucket rate limiting
//!
//! A [`TokenBucket`] allows bursts up to its capacity and then refills at a
//! fixed rate. Callers either poll with [`TokenBucket::try_acquire`] or block
//! with [`TokenBucket::acquire`], which sleeps until enough tokens have been
//! refilled and gives up when the supplied cancellation token fires.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::clock::{Clock, SystemClock};

/// Errors returned by rate limiter operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    /// More tokens were requested than the bucket can ever hold
    #[error("requested {requested} tokens exceeds burst capacity of {capacity}")]
    BurstExceeded { requested: u64, capacity: u64 },

    /// The wait was cancelled before tokens became available
    #[error("rate limit wait cancelled")]
    Cancelled,

    /// The limiter configuration is invalid
    #[error("invalid rate limiter configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for token bucket rate limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBucketConfig {
    /// Maximum number of tokens the bucket can hold
    pub capacity: u64,
    /// Number of tokens to refill per interval
    pub refill_amount: u64,
    /// Time interval for token refill
    pub refill_interval: Duration,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self { capacity: 100, refill_amount: 10, refill_interval: Duration::from_secs(1) }
    }
}

impl TokenBucketConfig {
    /// Create a new configuration builder
    pub fn builder() -> TokenBucketConfigBuilder {
        TokenBucketConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RateLimitError> {
        if self.capacity == 0 {
            return Err(RateLimitError::InvalidConfig("capacity must be greater than 0".into()));
        }
        if self.refill_amount == 0 {
            return Err(RateLimitError::InvalidConfig(
                "refill_amount must be greater than 0".into(),
            ));
        }
        if self.refill_interval.is_zero() {
            return Err(RateLimitError::InvalidConfig(
                "refill_interval must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for TokenBucketConfig
#[derive(Debug)]
pub struct TokenBucketConfigBuilder {
    config: TokenBucketConfig,
}

impl Default for TokenBucketConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBucketConfigBuilder {
    pub fn new() -> Self {
        Self { config: TokenBucketConfig::default() }
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = capacity;
        self
    }

    pub fn refill_amount(mut self, amount: u64) -> Self {
        self.config.refill_amount = amount;
        self
    }

    pub fn refill_interval(mut self, interval: Duration) -> Self {
        self.config.refill_interval = interval;
        self
    }

    pub fn build(self) -> Result<TokenBucketConfig, RateLimitError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: Instant,
}

/// Token bucket rate limiter
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
///
/// use permsync_common::resilience::{TokenBucket, TokenBucketConfig};
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TokenBucketConfig::builder()
///     .capacity(10)
///     .refill_amount(5)
///     .refill_interval(Duration::from_secs(1))
///     .build()?;
/// let limiter = TokenBucket::new(config)?;
///
/// assert!(limiter.try_acquire(3));
/// # Ok(())
/// # }
/// ```
pub struct TokenBucket<C: Clock = SystemClock> {
    config: TokenBucketConfig,
    state: Arc<Mutex<BucketState>>,
    clock: Arc<C>,
}

impl<C: Clock> TokenBucket<C> {
    /// Create a new token bucket with custom clock
    ///
    /// The bucket starts full.
    pub fn with_clock(config: TokenBucketConfig, clock: C) -> Result<Self, RateLimitError> {
        config.validate()?;

        let state = BucketState { tokens: config.capacity, last_refill: clock.now() };
        Ok(Self { config, state: Arc::new(Mutex::new(state)), clock: Arc::new(clock) })
    }

    /// Maximum number of tokens a single acquisition may request
    pub fn capacity(&self) -> u64 {
        self.config.capacity
    }

    /// Refill tokens based on whole intervals elapsed since the last refill.
    ///
    /// Partial intervals carry over to the next call.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        let interval_nanos = self.config.refill_interval.as_nanos().max(1);
        let refills = elapsed.as_nanos() / interval_nanos;
        if refills == 0 {
            return;
        }

        if state.tokens >= self.config.capacity {
            state.last_refill = now;
            return;
        }

        let refills = u64::try_from(refills).unwrap_or(u64::MAX);
        let tokens_to_add = refills.saturating_mul(self.config.refill_amount);
        state.tokens = state.tokens.saturating_add(tokens_to_add).min(self.config.capacity);
        state.last_refill += self
            .config
            .refill_interval
            .checked_mul(u32::try_from(refills).unwrap_or(u32::MAX))
            .unwrap_or(elapsed);

        debug!(added = tokens_to_add, available = state.tokens, "Refilled token bucket");
    }

    /// Time until `tokens` can be taken, given the current state.
    fn wait_for(&self, state: &BucketState, tokens: u64, now: Instant) -> Duration {
        let deficit = tokens.saturating_sub(state.tokens);
        if deficit == 0 {
            return Duration::ZERO;
        }
        let refills = deficit.div_ceil(self.config.refill_amount);
        let full_wait = self
            .config
            .refill_interval
            .checked_mul(u32::try_from(refills).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX);
        full_wait.saturating_sub(now.saturating_duration_since(state.last_refill))
    }

    /// Try to acquire the specified number of tokens
    ///
    /// Returns `true` if tokens were acquired, `false` if not enough tokens
    /// available.
    pub fn try_acquire(&self, tokens: u64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state, self.clock.now());

        if state.tokens < tokens {
            debug!(requested = tokens, available = state.tokens, "Rate limit: insufficient tokens");
            return false;
        }
        state.tokens -= tokens;
        true
    }

    /// Wait until `tokens` are available and take them.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::BurstExceeded`] when `tokens` exceeds the
    /// bucket capacity and [`RateLimitError::Cancelled`] when `cancel` fires
    /// before the tokens could be taken.
    pub async fn acquire(
        &self,
        tokens: u64,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        if tokens > self.config.capacity {
            return Err(RateLimitError::BurstExceeded {
                requested: tokens,
                capacity: self.config.capacity,
            });
        }

        loop {
            if cancel.is_cancelled() {
                return Err(RateLimitError::Cancelled);
            }

            let wait = {
                let mut state = self.state.lock();
                let now = self.clock.now();
                self.refill(&mut state, now);
                if state.tokens >= tokens {
                    state.tokens -= tokens;
                    return Ok(());
                }
                self.wait_for(&state, tokens, now)
            };

            debug!(requested = tokens, wait_ms = wait.as_millis(), "Waiting for rate limit tokens");
            tokio::select! {
                () = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                () = tokio::time::sleep(wait.max(Duration::from_millis(1))) => {}
            }
        }
    }

    /// Get the current number of available tokens
    pub fn available_tokens(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state, self.clock.now());
        state.tokens
    }
}

impl TokenBucket<SystemClock> {
    /// Create a new token bucket with system clock
    pub fn new(config: TokenBucketConfig) -> Result<Self, RateLimitError> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> Clone for TokenBucket<C> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> std::fmt::Debug for TokenBucket<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket").field("config", &self.config).finish_non_exhaustive()
    }
}
