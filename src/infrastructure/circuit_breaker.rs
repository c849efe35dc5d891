//! Generic circuit breaker wrapping arbitrary async calls, protecting the
//! exchange adapter against cascading failures.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitBreakerState>>,
    failure_threshold: usize,
    success_threshold: usize,
    timeout: Duration,
    name: String,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: usize,
        success_threshold: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
            failure_threshold,
            success_threshold,
            timeout,
            name: name.into(),
        }
    }

    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut state = self.state.write().await;
            if state.state == CircuitState::Open {
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() > self.timeout {
                        info!("CircuitBreaker [{}]: Open -> HalfOpen (timeout elapsed)", self.name);
                        state.state = CircuitState::HalfOpen;
                        state.success_count = 0;
                    } else {
                        return Err(CircuitBreakerError::Open(format!(
                            "circuit breaker [{}] is open, retry in {:?}",
                            self.name,
                            self.timeout - last_failure.elapsed()
                        )));
                    }
                }
            }
        }

        match f.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.success_threshold {
                    info!("CircuitBreaker [{}]: HalfOpen -> Closed", self.name);
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                warn!("CircuitBreaker [{}]: success recorded in Open state", self.name);
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.failure_count += 1;
        state.last_failure_time = Some(Instant::now());

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.failure_threshold {
                    error!("CircuitBreaker [{}]: Closed -> Open ({} failures)", self.name, state.failure_count);
                    state.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("CircuitBreaker [{}]: HalfOpen -> Open (failure during recovery)", self.name);
                state.state = CircuitState::Open;
                state.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker is open: {0}")]
    Open(String),
    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("test", 3, 2, Duration::from_secs(1));
        for _ in 0..3 {
            let _ = cb.call(async { Err::<(), &str>("error") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        let result = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
    }

    #[tokio::test]
    async fn recovers_after_timeout() {
        let cb = CircuitBreaker::new("test", 2, 2, Duration::from_millis(100));
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), &str>("error") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(cb.call(async { Ok::<(), &str>(()) }).await.is_ok());
        assert!(cb.call(async { Ok::<(), &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn halfopen_reopens_on_failure() {
        let cb = CircuitBreaker::new("test", 2, 2, Duration::from_millis(100));
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), &str>("error") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = cb.call(async { Err::<(), &str>("error") }).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
