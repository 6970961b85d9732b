//! Retry logic with exponential backoff for transient errors.

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::types::RetryConfig;
use std::time::Instant;

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called when an operation is being retried.
    ///
    /// # Arguments
    /// * `attempt` - Current attempt number (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay_secs` - Seconds until next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_secs: u64);
}

/// Callback that reports retries through the log facade.
pub struct LogCallback;

impl RetryCallback for LogCallback {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay_secs: u64) {
        log::warn!(
            "Attempt {}/{} failed: {}. Retrying in {}s...",
            attempt,
            max_attempts,
            error,
            delay_secs
        );
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation if it returns a retryable error, sleeping on `clock`
/// with exponential backoff between attempts.
///
/// # Returns
/// The result of the operation, or the last error if all attempts failed.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    clock: &dyn Clock,
    callback: Option<&dyn RetryCallback>,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry_loop(config, clock, callback, None, operation)
}

/// Like [`with_retry`], but never sleeps past `deadline`.
///
/// Each backoff is cut to the time left; once none is left the last error
/// is returned without another attempt.
pub fn with_retry_until<T, F>(
    config: &RetryConfig,
    clock: &dyn Clock,
    callback: Option<&dyn RetryCallback>,
    deadline: Instant,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    retry_loop(config, clock, callback, Some(deadline), operation)
}

fn retry_loop<T, F>(
    config: &RetryConfig,
    clock: &dyn Clock,
    callback: Option<&dyn RetryCallback>,
    deadline: Option<Instant>,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut last_error: Option<Error> = None;

    for attempt in 0..config.max_attempts.max(1) {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_retryable() {
                    return Err(e);
                }

                if attempt + 1 >= config.max_attempts {
                    last_error = Some(e);
                    break;
                }

                let mut delay = config.delay_for_attempt(attempt);
                if let Some(deadline) = deadline {
                    let remaining = deadline.saturating_duration_since(clock.now());
                    if remaining.is_zero() {
                        log::debug!("Not retrying past the deadline: {}", e);
                        last_error = Some(e);
                        break;
                    }
                    delay = delay.min(remaining);
                }

                if let Some(cb) = callback {
                    cb.on_retry(attempt + 1, config.max_attempts, &e, delay.as_secs());
                }

                clock.sleep(delay);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::Other("retry exhausted".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::Cell;
    use std::time::Duration;

    fn transient() -> Error {
        Error::Transient {
            message: "i/o timeout".to_string(),
        }
    }

    #[test]
    fn test_with_retry_success_first_try() {
        let clock = ManualClock::new();
        let result = with_retry(&RetryConfig::no_retry(), &clock, None, || Ok::<_, Error>(42));
        assert_eq!(result.unwrap(), 42);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_with_retry_non_retryable_error() {
        let clock = ManualClock::new();
        let attempts = Cell::new(0);

        let result: Result<()> = with_retry(&RetryConfig::default(), &clock, None, || {
            attempts.set(attempts.get() + 1);
            Err(Error::NotFound {
                name: "job".to_string(),
            })
        });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }

    #[test]
    fn test_with_retry_eventual_success() {
        let clock = ManualClock::new();
        let config = RetryConfig::new(3, Duration::from_secs(1), 2.0);
        let attempts = Cell::new(0);

        let callback: &dyn RetryCallback = &LogCallback;
        let result = with_retry(&config, &clock, Some(callback), || {
            let current = attempts.get();
            attempts.set(current + 1);
            if current < 2 { Err(transient()) } else { Ok("done") }
        });

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.get(), 3);
        // 1s + 2s of backoff
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_with_retry_exhausted() {
        let clock = ManualClock::new();
        let config = RetryConfig::new(2, Duration::from_secs(1), 2.0);
        let attempts = Cell::new(0);

        let result: Result<()> = with_retry(&config, &clock, None, || {
            attempts.set(attempts.get() + 1);
            Err(transient())
        });

        assert!(matches!(result, Err(Error::Transient { .. })));
        assert_eq!(attempts.get(), 2);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_with_retry_until_caps_backoff_at_deadline() {
        let clock = ManualClock::new();
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);
        let deadline = clock.now() + Duration::from_secs(5);
        let attempts = Cell::new(0);

        let result: Result<()> = with_retry_until(&config, &clock, None, deadline, || {
            attempts.set(attempts.get() + 1);
            Err(transient())
        });

        assert!(matches!(result, Err(Error::Transient { .. })));
        // Sleeps 2s, then 3s (cut from 4s), then stops at the deadline
        assert_eq!(attempts.get(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_with_retry_until_past_deadline_tries_once() {
        let clock = ManualClock::new();
        let deadline = clock.now();
        clock.advance(Duration::from_secs(1));
        let attempts = Cell::new(0);

        let result: Result<()> =
            with_retry_until(&RetryConfig::default(), &clock, None, deadline, || {
                attempts.set(attempts.get() + 1);
                Err(transient())
            });

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }
}
