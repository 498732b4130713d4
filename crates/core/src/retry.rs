//! Backoff policy and circuit breaker for backend calls
//!
//! - Exponential backoff with jitter, computed per attempt
//! - Named policies for interactive reads and for non-idempotent writes
//! - Circuit breaker shared by every request of one client
//!
//! The caller owns the loop (and the sleeping), so the same policy works for
//! async clients and for tests that only want the delays.
//!
//! # Example
//!
//! ```
//! use carevisit_core::retry::RetryConfig;
//! use std::time::Duration;
//!
//! let config = RetryConfig { jitter: false, ..RetryConfig::default() };
//! assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
//! assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
//! ```

use serde::{Deserialize, Serialize};
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Short delays for reads a worker is waiting on
    pub fn interactive() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// A single attempt. Used for writes the server does not deduplicate.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: false,
        }
    }

    /// Calculate the delay before `attempt` (zero-based; attempt 0 never waits)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.jitter {
            capped * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// True if another attempt is allowed after `attempts_made`
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// Pseudo-random value in [0.0, 1.0) from the std hasher's random keys
fn jitter_fraction() -> f64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(Instant::now().elapsed().as_nanos());
    (hasher.finish() % 1000) as f64 / 1000.0
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Successes in half-open needed to close it again
    pub success_threshold: u32,
    /// Time to wait before letting a probe through
    #[serde(with = "duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Breaker {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { successes: u32 },
}

impl Breaker {
    fn state(self) -> CircuitState {
        match self {
            Self::Closed { .. } => CircuitState::Closed,
            Self::Open { .. } => CircuitState::Open,
            Self::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

/// Fails requests fast while the backend is down
///
/// One breaker is shared by every request of a client, so a write is refused
/// right away when reads have just been failing.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    breaker: Mutex<Breaker>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breaker: Mutex::new(Breaker::Closed { failures: 0 }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Breaker> {
        self.breaker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    /// Whether a request may go out; an open circuit lets one probe through
    /// once `reset_timeout` has passed
    pub fn can_execute(&self) -> bool {
        let mut breaker = self.lock();
        match *breaker {
            Breaker::Open { since } if since.elapsed() < self.config.reset_timeout => false,
            Breaker::Open { .. } => {
                *breaker = Breaker::HalfOpen { successes: 0 };
                true
            }
            Breaker::Closed { .. } | Breaker::HalfOpen { .. } => true,
        }
    }

    pub fn record_success(&self) {
        let mut breaker = self.lock();
        *breaker = match *breaker {
            Breaker::HalfOpen { successes } if successes + 1 < self.config.success_threshold => {
                Breaker::HalfOpen {
                    successes: successes + 1,
                }
            }
            Breaker::Open { since } => Breaker::Open { since },
            _ => Breaker::Closed { failures: 0 },
        };
    }

    pub fn record_failure(&self) {
        let mut breaker = self.lock();
        *breaker = match *breaker {
            Breaker::Closed { failures } if failures + 1 < self.config.failure_threshold => {
                Breaker::Closed {
                    failures: failures + 1,
                }
            }
            Breaker::Open { since } => Breaker::Open { since },
            _ => Breaker::Open {
                since: Instant::now(),
            },
        };
    }

    pub fn reset(&self) {
        *self.lock() = Breaker::Closed { failures: 0 };
    }
}
