use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tuning parameters for a circuit breaker.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Time the circuit stays open before a half-open probe is allowed.
    pub recovery_timeout: Duration,
    /// Rolling window over which error rate and latency are evaluated.
    pub monitoring_window: Duration,
    /// Per-call timeout; exceeding it counts as a failure.
    pub latency_threshold: Duration,
    /// Minimum samples in the window before the error-rate trip applies.
    pub minimum_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            monitoring_window: Duration::from_secs(60),
            latency_threshold: Duration::from_secs(10),
            minimum_requests: 10,
        }
    }
}

/// Failure surfaced by [`CircuitBreaker::execute`].
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E: std::error::Error> {
    #[error("circuit '{0}' is open")]
    Open(String),

    #[error("circuit '{0}': operation timed out after {1:?}")]
    Timeout(String, Duration),

    #[error(transparent)]
    Inner(E),
}

/// Observable counters for a breaker.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerStats {
    pub state: CircuitState,
    pub failures: u64,
    pub successes: u64,
    pub total_requests: u64,
    pub last_failure_age_ms: Option<u64>,
    pub avg_latency_ms: f64,
    pub error_rate: f64,
}

struct Sample {
    at: Instant,
    ok: bool,
    latency: Duration,
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    failures: u64,
    successes: u64,
    total_requests: u64,
    last_failure: Option<Instant>,
    samples: VecDeque<Sample>,
}

/// CLOSED/OPEN/HALF_OPEN breaker wrapping calls to a single dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                failures: 0,
                successes: 0,
                total_requests: 0,
                last_failure: None,
                samples: VecDeque::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` under the breaker. Fails fast with [`BreakerError::Open`]
    /// while the circuit is open; otherwise applies the latency-threshold
    /// timeout and records the outcome.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == CircuitState::Open {
                let recovered = inner
                    .last_failure
                    .is_some_and(|at| at.elapsed() >= self.config.recovery_timeout);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(circuit = %self.name, "circuit half-open, probing");
                } else {
                    return Err(BreakerError::Open(self.name.clone()));
                }
            }
            inner.total_requests += 1;
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.latency_threshold, op()).await;
        let latency = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.record(true, latency).await;
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record(false, latency).await;
                Err(BreakerError::Inner(e))
            }
            Err(_) => {
                self.record(false, latency).await;
                Err(BreakerError::Timeout(
                    self.name.clone(),
                    self.config.latency_threshold,
                ))
            }
        }
    }

    async fn record(&self, ok: bool, latency: Duration) {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        inner.samples.push_back(Sample { at: now, ok, latency });
        let window = self.config.monitoring_window;
        while inner
            .samples
            .front()
            .is_some_and(|s| now.duration_since(s.at) > window)
        {
            inner.samples.pop_front();
        }

        if ok {
            inner.successes += 1;
            inner.consecutive_failures = 0;
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                inner.consecutive_failures = 0;
                inner.samples.clear();
                tracing::info!(circuit = %self.name, "circuit closed after successful probe");
            }
            return;
        }

        inner.failures += 1;
        inner.consecutive_failures += 1;
        inner.last_failure = Some(now);

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            tracing::warn!(circuit = %self.name, "probe failed, circuit re-opened");
            return;
        }

        let window_failures = inner.samples.iter().filter(|s| !s.ok).count() as u32;
        let sample_count = inner.samples.len() as u32;
        let error_rate = f64::from(window_failures) / f64::from(sample_count.max(1));
        let avg_latency = if inner.samples.is_empty() {
            Duration::ZERO
        } else {
            inner.samples.iter().map(|s| s.latency).sum::<Duration>() / sample_count
        };

        let tripped = inner.consecutive_failures >= self.config.failure_threshold
            || window_failures >= self.config.failure_threshold
            || (sample_count >= self.config.minimum_requests && error_rate > 0.5)
            || avg_latency > 2 * self.config.latency_threshold;

        if tripped && inner.state == CircuitState::Closed {
            inner.state = CircuitState::Open;
            tracing::warn!(
                circuit = %self.name,
                consecutive_failures = inner.consecutive_failures,
                error_rate,
                "circuit opened"
            );
        }
    }

    pub async fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock().await;
        let sample_count = inner.samples.len();
        let avg_latency_ms = if sample_count == 0 {
            0.0
        } else {
            inner
                .samples
                .iter()
                .map(|s| s.latency.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / sample_count as f64
        };
        let window_failures = inner.samples.iter().filter(|s| !s.ok).count();
        BreakerStats {
            state: inner.state,
            failures: inner.failures,
            successes: inner.successes,
            total_requests: inner.total_requests,
            last_failure_age_ms: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
            avg_latency_ms,
            error_rate: window_failures as f64 / sample_count.max(1) as f64,
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    pub async fn force_open(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
    }

    pub async fn force_close(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
    }

    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.failures = 0;
        inner.successes = 0;
        inner.total_requests = 0;
        inner.last_failure = None;
        inner.samples.clear();
    }
}
