//! Conflict retry with exponential backoff.
//!
//! Ticket-type counters and ticket records are mutated with a
//! load → validate → compare-and-swap cycle. When the swap loses a race the whole
//! cycle runs again against fresh state, so the loser either succeeds on the new
//! snapshot or fails with the business rejection that the winner caused.
//!
//! # Example
//!
//! ```rust
//! use ticketing_core::retry::{RetryPolicy, retry_on_conflict};
//! use ticketing_core::StoreError;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), StoreError> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(1))
//!     .max_delay(Duration::from_millis(20))
//!     .build();
//!
//! let sold = retry_on_conflict(&policy, "ticket-type/vip", || async {
//!     // load, validate, compare-and-swap
//!     Ok::<_, StoreError>(1_u32)
//! })
//! .await?;
//! # assert_eq!(sold, 1);
//! # Ok(())
//! # }
//! ```

use crate::error::StoreError;
use std::time::Duration;
use tokio::time::sleep;

/// Errors that can report an optimistic concurrency conflict.
///
/// Implemented by [`StoreError`] and by every engine error that wraps it, so a
/// retry loop can tell "somebody else wrote first" apart from a real failure.
pub trait Conflict {
    /// Returns true if the failed attempt lost a compare-and-swap race.
    fn is_conflict(&self) -> bool;

    /// Returns true if the backend was briefly unreachable.
    ///
    /// Only [`retry_through_outages`] acts on this.
    fn is_transient(&self) -> bool {
        false
    }
}

impl Conflict for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }

    fn is_transient(&self) -> bool {
        StoreError::is_transient(self)
    }
}

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 64
/// - `initial_delay`: 1ms
/// - `max_delay`: 25ms
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = initial_delay * (multiplier ^ attempt)
    /// Capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.unwrap_or(64),
            initial_delay: self.initial_delay.unwrap_or(Duration::from_millis(1)),
            max_delay: self.max_delay.unwrap_or(Duration::from_millis(25)),
            multiplier: self.multiplier.unwrap_or(2.0),
        }
    }
}

/// Re-run `operation` while it fails with a concurrency conflict.
///
/// Any other error (a business rejection or a fatal storage error) is returned
/// immediately without retrying. When the budget is spent the caller receives
/// [`StoreError::RetriesExhausted`] for `key`.
///
/// # Errors
///
/// Returns the first non-conflict error produced by `operation`, or
/// `StoreError::RetriesExhausted` converted into `E`.
pub async fn retry_on_conflict<F, Fut, T, E>(policy: &RetryPolicy, key: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Conflict + From<StoreError> + std::fmt::Display,
{
    retry_while(policy, key, operation, |err: &E| err.is_conflict()).await
}

/// Like [`retry_on_conflict`], but also rides out transient backend failures.
///
/// Meant for writes that must land once their precondition has been acted on,
/// such as recording a reservation that has already taken inventory. Conflicts
/// and transient failures share one budget.
///
/// # Errors
///
/// Returns the first error that is neither a conflict nor transient, or
/// `StoreError::RetriesExhausted` converted into `E`.
pub async fn retry_through_outages<F, Fut, T, E>(policy: &RetryPolicy, key: &str, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Conflict + From<StoreError> + std::fmt::Display,
{
    retry_while(policy, key, operation, |err: &E| err.is_conflict() || err.is_transient()).await
}

async fn retry_while<F, Fut, T, E, P>(policy: &RetryPolicy, key: &str, mut operation: F, retryable: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Conflict + From<StoreError> + std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(key, attempt, "Write settled after retry");
                }
                return Ok(result);
            },
            Err(err) if retryable(&err) => {
                if attempt >= policy.max_retries {
                    metrics::counter!("ticketing_conflict_retries_exhausted_total").increment(1);
                    tracing::error!(
                        key,
                        attempts = attempt + 1,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(E::from(StoreError::RetriesExhausted {
                        key: key.to_string(),
                        attempts: attempt + 1,
                    }));
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    key,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Write failed, retrying"
                );
                metrics::counter!("ticketing_conflict_retries_total").increment(1);

                sleep(delay).await;
                attempt += 1;
            },
            Err(err) => return Err(err),
        }
    }
}
