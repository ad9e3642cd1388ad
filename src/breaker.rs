use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
}

/// Per-channel failure gate. One instance per delivery channel; the only
/// shared in-process mutable state between workers.
///
/// CLOSED passes traffic and trips OPEN at `failure_threshold` failures.
/// OPEN rejects until `recovery_timeout` has elapsed since the last failure,
/// then passively moves to HALF_OPEN on the next `can_proceed` check.
/// HALF_OPEN lets probes through; one failure reopens, `success_threshold`
/// consecutive successes close.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(breaker = %name, "Circuit breaker initialized");

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn can_proceed(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);

                if elapsed {
                    info!(breaker = %self.name, "Circuit breaker entering half-open state");
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();

        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                debug!(
                    breaker = %self.name,
                    successes = inner.success_count,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if inner.success_count >= self.config.success_threshold {
                    info!(breaker = %self.name, "Circuit breaker closed after successful recovery");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                }
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();

        inner.failure_count += 1;
        inner.last_failure_at = Some(Instant::now());

        if inner.state == CircuitState::HalfOpen {
            warn!(breaker = %self.name, "Circuit breaker reopened after failed recovery attempt");
            inner.state = CircuitState::Open;
            return;
        }

        if inner.failure_count >= self.config.failure_threshold {
            warn!(
                breaker = %self.name,
                failures = inner.failure_count,
                "Circuit breaker opened due to consecutive failures"
            );
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(
            "email",
            CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 2,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_failure_threshold() {
        let breaker = breaker();

        for _ in 0..4 {
            breaker.record_failure();
            assert!(breaker.can_proceed());
        }

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_success_resets_failure_count() {
        let breaker = breaker();

        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();

        for _ in 0..4 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn allows_probe_after_recovery_timeout() {
        let breaker = breaker();

        for _ in 0..5 {
            breaker.record_failure();
        }
        assert!(!breaker.can_proceed());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!breaker.can_proceed());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.can_proceed());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_success_threshold_in_half_open() {
        let breaker = breaker();

        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.can_proceed());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_proceed());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let breaker = breaker();

        for _ in 0..5 {
            breaker.record_failure();
        }
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.can_proceed());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_proceed());
    }
}
