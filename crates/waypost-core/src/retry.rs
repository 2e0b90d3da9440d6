//! Bounded retry with exponential backoff for backend calls.
//!
//! The default policy makes at most 3 attempts and waits
//! `base_delay × multiplier^(n-1)` after the n-th failure (1 s, then 2 s).
//! The attempt count is the only ceiling; there is no max-delay cap unless
//! one is configured.
//!
//! # Example
//!
//! ```
//! use waypost_core::{RetryConfig, with_retry, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::default();
//!
//! let session = with_retry(&config, "session/start", || async {
//!     // Your backend call here
//!     Ok::<_, Error>("sess-1".to_string())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one (minimum 1).
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(with = "crate::config::duration_ms")]
    pub base_delay: Duration,
    /// Backoff multiplier (1.0 = constant delay, 2.0 = double each time).
    pub backoff_multiplier: f64,
    /// Optional ceiling on a single delay.
    #[serde(
        with = "crate::config::option_duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_delay: Option<Duration>,
    /// Whether to add up to 25% random jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: None,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with the given number of attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    // ==================== Builder Methods ====================

    /// Set the total number of attempts.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the delay after the first failure.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Cap each individual delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set backoff multiplier.
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("retry.max_attempts must be >= 1"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config(
                "retry.backoff_multiplier must be >= 1.0",
            ));
        }
        if let Some(max) = self.max_delay
            && max < self.base_delay
        {
            return Err(Error::invalid_config(
                "retry.max_delay must be >= retry.base_delay",
            ));
        }
        Ok(())
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let mut delay = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        if let Some(max) = self.max_delay {
            delay = delay.min(max.as_secs_f64());
        }

        if self.jitter {
            let jitter_factor = 1.0 + (rand::rng().random::<f64>() * 0.25);
            delay *= jitter_factor;
        }

        Duration::from_secs_f64(delay)
    }
}

/// Execute an async operation with retry logic.
///
/// Returns the first success, the first non-retryable error, or the error of
/// the final attempt once `max_attempts` is exhausted.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) || attempt == max_attempts {
                    return Err(e);
                }

                let delay = config.delay_after_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    operation_name, attempt, max_attempts, e, delay
                );
                sleep(delay).await;
            }
        }
    }

    Err(Error::Unknown(format!(
        "{} failed with no attempts made",
        operation_name
    )))
}

/// Check if an error is worth another attempt.
pub(crate) fn is_retryable(error: &Error) -> bool {
    match error {
        // Transport failures are usually transient
        Error::Network(_) => true,
        Error::Timeout { .. } => true,
        // Server-side and throttling responses can recover; client errors cannot
        Error::Api { status, .. } => *status >= 500 || *status == 408 || *status == 429,
        Error::Unknown(_) => true,
        Error::PositionUnavailable(_) => true,
        Error::GeolocationUnsupported
        | Error::PermissionDenied
        | Error::TrackingFailed(_)
        | Error::Storage(_)
        | Error::Serialization(_)
        | Error::InvalidPreferences(_)
        | Error::InvalidConfig(_)
        | Error::Cancelled => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_millis(1000));
        assert_eq!(config.max_delay, None);
        assert!(!config.jitter);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_after_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_after_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_after_attempt(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_delay_capped_when_configured() {
        let config = RetryConfig::default().max_delay(Duration::from_millis(1500));
        assert_eq!(config.delay_after_attempt(2), Duration::from_millis(1500));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        assert!(RetryConfig::new(0).validate().is_err());
        assert!(RetryConfig::default().backoff_multiplier(0.5).validate().is_err());
    }

    #[test]
    fn test_is_retryable() {
        assert!(is_retryable(&Error::network("connection reset")));
        assert!(is_retryable(&Error::api(503, "unavailable")));
        assert!(is_retryable(&Error::api(429, "slow down")));
        assert!(!is_retryable(&Error::api(400, "bad sample")));
        assert!(!is_retryable(&Error::api(401, "expired token")));
        assert!(!is_retryable(&Error::Cancelled));
        assert!(!is_retryable(&Error::tracking_failed("disabled")));
    }

    #[tokio::test]
    async fn test_with_retry_immediate_success() {
        let result = with_retry(&RetryConfig::default(), "test", || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let started = tokio::time::Instant::now();
        let result: Result<i32> = with_retry(&RetryConfig::default(), "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(Error::network("transient error"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        // Would succeed on the 4th call
        let result: Result<i32> = with_retry(&RetryConfig::default(), "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                if count < 3 {
                    Err(Error::network("persistent error"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32> = with_retry(&RetryConfig::default(), "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(Error::api(400, "rejected"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
