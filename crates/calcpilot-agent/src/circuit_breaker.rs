//! Circuit breaker for model API failures
//!
//! Each model client owns one. After `threshold` consecutive hard failures
//! requests are refused until `timeout` has passed, then one trial request is
//! let through.

use calcpilot_core::{CalcError, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests allowed
    Closed,
    /// Too many failures, requests refused
    Open,
    /// Timeout elapsed, one trial request allowed
    HalfOpen,
}

/// Consecutive-failure circuit breaker
///
/// ```
/// use calcpilot_agent::CircuitBreaker;
///
/// let cb = CircuitBreaker::new(2, 60);
/// cb.record_failure();
/// cb.record_failure();
/// assert!(cb.check().is_err());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    last_failure_ms: AtomicU64,
    threshold: u32,
    timeout: Duration,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl CircuitBreaker {
    /// `threshold` consecutive failures open the circuit for `timeout_secs`
    pub fn new(threshold: u32, timeout_secs: u64) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            last_failure_ms: AtomicU64::new(0),
            threshold,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn elapsed_since_failure_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_failure_ms.load(Ordering::Relaxed))
    }

    pub fn state(&self) -> CircuitState {
        if self.failure_count.load(Ordering::Relaxed) < self.threshold {
            return CircuitState::Closed;
        }

        if self.elapsed_since_failure_ms() >= self.timeout.as_millis() as u64 {
            CircuitState::HalfOpen
        } else {
            CircuitState::Open
        }
    }

    /// Reset after a successful request
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.last_failure_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }

    /// Milliseconds until a trial request is allowed, 0 unless open
    pub fn time_until_retry(&self) -> u64 {
        match self.state() {
            CircuitState::Open => {
                (self.timeout.as_millis() as u64).saturating_sub(self.elapsed_since_failure_ms())
            }
            _ => 0,
        }
    }

    /// `Err(ApiLimit)` while the circuit is open
    pub fn check(&self) -> Result<()> {
        match self.state() {
            CircuitState::Open => Err(CalcError::ApiLimit(format!(
                "Circuit breaker is open after {} consecutive failures. Wait {} seconds before retry.",
                self.failure_count(),
                self.time_until_retry().div_ceil(1000)
            ))),
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_initial_state_closed() {
        let cb = CircuitBreaker::default();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.check().is_ok());
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = CircuitBreaker::new(3, 60);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        let err = cb.check().unwrap_err();
        assert!(matches!(err, CalcError::ApiLimit(_)));
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = CircuitBreaker::new(3, 60);

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.failure_count(), 0);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = CircuitBreaker::new(2, 1);

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.time_until_retry() <= 1000);

        sleep(Duration::from_millis(1100));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.check().is_ok());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
