//! Per-source circuit breakers.
//!
//! Isolates failing sources so the scraper stops spending its budget on them,
//! and probes them again once a cool-down has elapsed.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures | failure ratio]--> OPEN (rejecting) --[cool-down]--> HALF_OPEN (one probe)
//!                                                                                          |
//!                                                  <--[probe failure, cool-down grows]--   |
//!                                                                                          |
//! CLOSED <------------------------------------[probe success]------------------------------+
//! ```
//!
//! Each source gets its own [`CircuitBreaker`] with its own lock, created
//! lazily by the [`CircuitBreakerRegistry`], so unrelated sources never
//! contend with each other.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::error::AppError;
use crate::models::clamp_score;

/// Current state of a source's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected without touching the source.
    Open,
    /// A single probe request is allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker-derived health class used for tier assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceHealth {
    Healthy,
    Degraded,
    Recovering,
    Unhealthy,
}

/// Health score at or above which a closed circuit counts as healthy.
const HEALTHY_SCORE: f64 = 70.0;
const OPEN_SCORE: f64 = 10.0;
const HALF_OPEN_SCORE: f64 = 50.0;

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Number of recent outcomes kept for the failure-ratio rule and health score.
    pub window_size: usize,

    /// Failure ratio over the window that opens the circuit.
    pub failure_ratio_threshold: f64,

    /// The ratio rule only applies once the window holds this many outcomes.
    pub min_window_samples: usize,

    /// Cool-down before an open circuit admits a probe.
    pub recovery_timeout: Duration,

    /// Cool-down multiplier applied when a half-open probe fails.
    pub probe_backoff_multiplier: f32,

    /// Cool-down multiplier applied when the tripping failure is a 429.
    pub rate_limit_backoff_multiplier: f32,

    /// Upper bound for the grown cool-down.
    pub max_recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_size: 20,
            failure_ratio_threshold: 0.6,
            min_window_samples: 10,
            recovery_timeout: Duration::from_secs(60),
            probe_backoff_multiplier: 1.5,
            rate_limit_backoff_multiplier: 2.0,
            max_recovery_timeout: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    /// Recent outcomes, `true` for success. Bounded by `window_size`.
    outcomes: VecDeque<bool>,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    last_error_message: Option<String>,
    current_recovery_timeout: Duration,
    probe_in_flight: bool,
}

impl CircuitBreakerInner {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            outcomes: VecDeque::with_capacity(config.window_size),
            last_failure_time: None,
            last_state_change: Instant::now(),
            last_error_message: None,
            current_recovery_timeout: config.recovery_timeout,
            probe_in_flight: false,
        }
    }

    fn push_outcome(&mut self, success: bool, window: usize) {
        if window == 0 {
            return;
        }
        while self.outcomes.len() >= window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn success_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 1.0;
        }
        let ok = self.outcomes.iter().filter(|o| **o).count();
        ok as f64 / self.outcomes.len() as f64
    }

    fn transition(&mut self, to: CircuitState) {
        self.state = to;
        self.last_state_change = Instant::now();
    }

    fn remaining_cooldown(&self) -> Duration {
        self.current_recovery_timeout
            .saturating_sub(self.last_state_change.elapsed())
    }

    fn health_score(&self) -> f64 {
        match self.state {
            CircuitState::Open => OPEN_SCORE,
            CircuitState::HalfOpen => HALF_OPEN_SCORE,
            CircuitState::Closed => {
                let penalty = (self.consecutive_failures as f64 * 10.0).min(50.0);
                clamp_score(self.success_ratio() * 100.0 - penalty)
            }
        }
    }
}

/// Point-in-time view of one source's circuit, for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub source_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub health_score: f64,
    pub success_ratio: f64,
    pub last_error: Option<String>,
    #[serde(skip)]
    pub time_until_half_open: Option<Duration>,
    #[serde(skip)]
    pub since_state_change: Duration,
    #[serde(skip)]
    pub since_last_failure: Option<Duration>,
}

/// Error type for circuit breaker operations.
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    /// Circuit is open; the operation was not invoked.
    #[error("Circuit for source '{source_id}' is open, retry after {}s", retry_after.as_secs())]
    Open {
        source_id: String,
        retry_after: Duration,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(AppError),
}

impl From<CircuitBreakerError> for AppError {
    fn from(err: CircuitBreakerError) -> Self {
        match err {
            CircuitBreakerError::Open {
                source_id,
                retry_after,
            } => AppError::CircuitOpen {
                source_id,
                retry_after,
            },
            CircuitBreakerError::Inner(e) => e,
        }
    }
}

/// Thread-safe circuit breaker for a single source.
#[derive(Clone)]
pub struct CircuitBreaker {
    source_id: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

/// Clears the half-open probe slot if the probe future is dropped before
/// its outcome is recorded.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock_inner().probe_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(source_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let inner = CircuitBreakerInner::new(&config);
        Self {
            source_id: source_id.into(),
            config,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.source_id, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// True unless the circuit is open.
    pub fn is_healthy(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Health score in `[0, 100]`.
    pub fn health_score(&self) -> f64 {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.health_score()
    }

    pub fn health(&self) -> SourceHealth {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Open => SourceHealth::Unhealthy,
            CircuitState::HalfOpen => SourceHealth::Recovering,
            CircuitState::Closed if inner.health_score() >= HEALTHY_SCORE => SourceHealth::Healthy,
            CircuitState::Closed => SourceHealth::Degraded,
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open =
            (inner.state == CircuitState::Open).then(|| inner.remaining_cooldown());

        CircuitSnapshot {
            source_id: self.source_id.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            health_score: inner.health_score(),
            success_ratio: inner.success_ratio(),
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
            since_state_change: inner.last_state_change.elapsed(),
            since_last_failure: inner.last_failure_time.map(|t| t.elapsed()),
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes operation, tracks success/failure
    /// - Open: returns `CircuitBreakerError::Open` immediately
    /// - HalfOpen: the first caller runs as the probe; others are rejected
    ///   until the probe resolves
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut slot = ProbeSlot {
            breaker: self,
            armed: false,
        };

        {
            let mut inner = self.lock_inner();
            self.maybe_transition_to_half_open(&mut inner);

            match inner.state {
                CircuitState::Open => {
                    return Err(CircuitBreakerError::Open {
                        source_id: self.source_id.clone(),
                        retry_after: inner.remaining_cooldown(),
                    });
                }
                CircuitState::HalfOpen if inner.probe_in_flight => {
                    return Err(CircuitBreakerError::Open {
                        source_id: self.source_id.clone(),
                        retry_after: Duration::ZERO,
                    });
                }
                CircuitState::HalfOpen => {
                    tracing::debug!(circuit = %self.source_id, "Admitting half-open probe");
                    inner.probe_in_flight = true;
                    slot.armed = true;
                }
                CircuitState::Closed => {}
            }
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(e) if e.should_trip_circuit() => self.record_failure(e),
            Err(_) => {}
        }
        // Recording above already settled the probe; the guard only covers
        // non-tripping errors and cancellation.
        drop(slot);

        result.map_err(CircuitBreakerError::Inner)
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();
        inner.push_outcome(true, self.config.window_size);
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            tracing::info!(circuit = %self.source_id, "Probe succeeded, closing circuit");
            inner.transition(CircuitState::Closed);
            inner.outcomes.clear();
            inner.outcomes.push_back(true);
            inner.last_error_message = None;
            inner.current_recovery_timeout = self.config.recovery_timeout;
            inner.probe_in_flight = false;
        }
    }

    pub fn record_failure(&self, error: &AppError) {
        let mut inner = self.lock_inner();
        inner.push_outcome(false, self.config.window_size);
        inner.last_error_message = Some(error.to_string());

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(Instant::now());

                let ratio_tripped = inner.outcomes.len() >= self.config.min_window_samples
                    && 1.0 - inner.success_ratio() >= self.config.failure_ratio_threshold;

                if inner.consecutive_failures >= self.config.failure_threshold || ratio_tripped {
                    tracing::warn!(
                        circuit = %self.source_id,
                        failures = inner.consecutive_failures,
                        ratio_tripped,
                        error = %error,
                        "Opening circuit"
                    );
                    inner.transition(CircuitState::Open);

                    if error.is_rate_limit() {
                        inner.current_recovery_timeout = self.grow(
                            inner.current_recovery_timeout,
                            self.config.rate_limit_backoff_multiplier,
                        );
                        tracing::info!(
                            circuit = %self.source_id,
                            recovery_timeout_secs = inner.current_recovery_timeout.as_secs(),
                            "Extended cool-down due to rate limit"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures += 1;
                inner.last_failure_time = Some(Instant::now());

                let mut multiplier = self.config.probe_backoff_multiplier;
                if error.is_rate_limit() {
                    multiplier *= self.config.rate_limit_backoff_multiplier;
                }
                inner.current_recovery_timeout =
                    self.grow(inner.current_recovery_timeout, multiplier);
                inner.transition(CircuitState::Open);
                inner.probe_in_flight = false;

                tracing::warn!(
                    circuit = %self.source_id,
                    error = %error,
                    recovery_timeout_secs = inner.current_recovery_timeout.as_secs(),
                    "Probe failed, reopening circuit"
                );
            }
            // A call admitted before the circuit opened; the cool-down is not extended.
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.source_id, "Circuit manually reset");
        *inner = CircuitBreakerInner::new(&self.config);
    }

    /// Multiply the cool-down, saturating at the configured cap.
    fn grow(&self, current: Duration, multiplier: f32) -> Duration {
        let cap = self.config.max_recovery_timeout;
        Duration::try_from_secs_f32(current.as_secs_f32() * multiplier.max(1.0))
            .map_or(cap, |grown| grown.min(cap))
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && inner.last_state_change.elapsed() >= inner.current_recovery_timeout
        {
            tracing::info!(circuit = %self.source_id, "Cool-down elapsed, circuit half-open");
            inner.transition(CircuitState::HalfOpen);
            inner.probe_in_flight = false;
        }
    }
}

/// Aggregate breaker counts for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitStats {
    pub total: usize,
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Lazily-populated table of one breaker per source id.
///
/// The table lock is only held to look up or insert a breaker; all state
/// changes happen under the individual breaker's lock.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned breaker registry");
            poisoned.into_inner()
        })
    }

    /// The breaker for `source_id`, created closed on first use.
    pub fn breaker(&self, source_id: &str) -> CircuitBreaker {
        let mut table = self.lock_table();
        table
            .entry(source_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(source_id, self.config.clone()))
            .clone()
    }

    pub async fn execute<F, T, Fut>(
        &self,
        source_id: &str,
        operation: F,
    ) -> Result<T, CircuitBreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        self.breaker(source_id).call(operation).await
    }

    pub fn state(&self, source_id: &str) -> CircuitState {
        self.breaker(source_id).state()
    }

    pub fn is_source_healthy(&self, source_id: &str) -> bool {
        self.breaker(source_id).is_healthy()
    }

    pub fn health_score(&self, source_id: &str) -> f64 {
        self.breaker(source_id).health_score()
    }

    pub fn health(&self, source_id: &str) -> SourceHealth {
        self.breaker(source_id).health()
    }

    pub fn reset(&self, source_id: &str) {
        self.breaker(source_id).reset();
    }

    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let breakers: Vec<CircuitBreaker> = self.lock_table().values().cloned().collect();
        let mut snapshots: Vec<_> = breakers.iter().map(CircuitBreaker::snapshot).collect();
        snapshots.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        snapshots
    }

    pub fn stats(&self) -> CircuitStats {
        let breakers: Vec<CircuitBreaker> = self.lock_table().values().cloned().collect();
        let mut stats = CircuitStats {
            total: breakers.len(),
            ..Default::default()
        };
        for breaker in &breakers {
            match breaker.state() {
                CircuitState::Closed => stats.closed += 1,
                CircuitState::Open => stats.open += 1,
                CircuitState::HalfOpen => stats.half_open += 1,
            }
        }
        stats
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
