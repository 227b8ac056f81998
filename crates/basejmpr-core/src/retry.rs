//! Retry with exponential backoff for artifact downloads

use std::time::Duration;

use crate::fetch::FetchError;

/// Exponential backoff: 2^attempt seconds (2s, 4s, 8s, ...)
pub const fn backoff_duration(attempt: u32) -> Duration {
    Duration::from_secs(2u64.pow(attempt))
}

/// Retry a fallible download with exponential backoff.
///
/// Retries up to `max_retries` times on retryable errors. Returns the first
/// success, or the final error on exhaustion / non-retryable error.
pub fn retry_with_backoff<T>(
    label: &str,
    max_retries: u32,
    mut attempt_fn: impl FnMut() -> Result<T, FetchError>,
) -> Result<T, FetchError> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() => {
                attempt += 1;
                log::warn!("{label}: attempt {attempt}/{max_retries} failed: {e}, retrying...");
                std::thread::sleep(backoff_duration(attempt));
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_exponential() {
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(3), Duration::from_secs(8));
    }

    #[test]
    fn non_retryable_error_is_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("test", 3, || {
            calls += 1;
            Err(FetchError::Interrupted)
        });
        assert!(matches!(result, Err(FetchError::Interrupted)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn zero_retries_gives_up_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = retry_with_backoff("test", 0, || {
            calls += 1;
            Err(FetchError::Http {
                status: Some(503),
                message: "unavailable".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn success_passes_through() {
        let result = retry_with_backoff("test", 3, || Ok::<_, FetchError>(42));
        assert_eq!(result.unwrap(), 42);
    }
}
