//! Bounded retry for transient transport failures

use std::time::Duration;

use tracing::warn;

use crate::error::{Result, TransportError};

/// Retry an operation a fixed number of times on transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one (at least 1)
    pub attempts: u32,

    /// Sleep between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Run `op`, retrying on errors for which [`TransportError::is_transient`]
    /// holds. Other errors, and the failure of the last attempt, propagate.
    pub fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.run_if(TransportError::is_transient, op)
    }

    /// Like [`run`](Self::run) with a custom retry predicate
    pub fn run_if<T, F, P>(&self, should_retry: P, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: Fn(&TransportError) -> bool,
    {
        let mut remaining = self.attempts.max(1);
        while remaining > 1 {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if should_retry(&e) => {
                    warn!("Retry Error: Exception details -- \"{}\"", e);
                    std::thread::sleep(self.delay);
                    remaining -= 1;
                }
                Err(e) => return Err(e),
            }
        }
        op()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO)
    }

    #[test]
    fn test_success_first_try() {
        let mut calls = 0;
        let value = fast(3)
            .run(|| {
                calls += 1;
                Ok(42)
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_transient_error_attempted_exactly_n_times() {
        let mut calls = 0;
        let result: Result<()> = fast(3).run(|| {
            calls += 1;
            Err(TransportError::transient("connection reset"))
        });
        assert!(matches!(result, Err(TransportError::TransientTransport(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_matching_error_propagates_immediately() {
        let mut calls = 0;
        let result: Result<()> = fast(3).run(|| {
            calls += 1;
            Err(TransportError::auth("sudo", "Incorrect become password"))
        });
        assert!(matches!(result, Err(TransportError::Authentication { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recovers_after_transient_failures() {
        let mut calls = 0;
        let value = fast(3)
            .run(|| {
                calls += 1;
                if calls < 3 {
                    Err(TransportError::connectivity("unreachable"))
                } else {
                    Ok("done")
                }
            })
            .unwrap();
        assert_eq!(value, "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_custom_predicate() {
        let mut calls = 0;
        let result: Result<()> = fast(4).run_if(
            |e| matches!(e, TransportError::Compatibility(_)),
            || {
                calls += 1;
                Err(TransportError::compatibility("ControlPersist"))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 4);
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts, 1);

        let mut calls = 0;
        let _ = policy.run(|| -> Result<()> {
            calls += 1;
            Err(TransportError::transient("x"))
        });
        assert_eq!(calls, 1);
    }
}
