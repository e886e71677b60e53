//! Circuit breaker per source
//!
//! Three phases:
//! - CLOSED: normal operation, consecutive failures are counted
//! - OPEN: calls are rejected until the cooldown since the last failure elapses
//! - HALF_OPEN: a limited number of probe calls test recovery
//!
//! All transitions live in the pure [`transition`] function; [`CircuitBreaker`]
//! only applies it under a lock. There is no background timer: OPEN becomes
//! HALF_OPEN lazily, on the next permission check after the cooldown.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Consecutive half-open successes before closing
    pub success_threshold: u32,
    /// Cooldown after the last failure before probing, in seconds
    pub timeout_secs: f64,
    /// Probe calls admitted while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_secs: 60.0,
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs.max(0.0))
    }
}

/// Phase of the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen { probes_used: u32 },
}

impl CircuitPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen { .. } => "half_open",
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full breaker state: phase plus counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub phase: CircuitPhase,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_time: Option<Instant>,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self {
            phase: CircuitPhase::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
        }
    }
}

impl CircuitState {
    fn closed() -> Self {
        Self::default()
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitEvent {
    /// A caller asks whether it may call the source
    PermissionCheck,
    Success,
    Failure,
}

/// Apply one event. Returns the next state and, for permission checks,
/// whether the call is admitted (`true` for recorded outcomes).
pub fn transition(
    state: &CircuitState,
    event: CircuitEvent,
    now: Instant,
    config: &CircuitBreakerConfig,
) -> (CircuitState, bool) {
    let mut next = *state;

    match (event, state.phase) {
        (CircuitEvent::PermissionCheck, CircuitPhase::Closed) => (next, true),
        (CircuitEvent::PermissionCheck, CircuitPhase::Open) => {
            let cooled_down = state
                .last_failure_time
                .map_or(true, |t| now.saturating_duration_since(t) >= config.timeout());
            if cooled_down {
                next.phase = CircuitPhase::HalfOpen { probes_used: 1 };
                next.success_count = 0;
                (next, true)
            } else {
                (next, false)
            }
        }
        (CircuitEvent::PermissionCheck, CircuitPhase::HalfOpen { probes_used }) => {
            if probes_used < config.half_open_max_calls {
                next.phase = CircuitPhase::HalfOpen {
                    probes_used: probes_used + 1,
                };
                (next, true)
            } else {
                (next, false)
            }
        }

        (CircuitEvent::Success, CircuitPhase::Closed) => {
            next.failure_count = 0;
            (next, true)
        }
        (CircuitEvent::Success, CircuitPhase::HalfOpen { .. }) => {
            next.success_count += 1;
            if next.success_count >= config.success_threshold {
                next = CircuitState {
                    last_failure_time: state.last_failure_time,
                    ..CircuitState::closed()
                };
            }
            (next, true)
        }
        // A late result from a call admitted before the breaker opened
        (CircuitEvent::Success, CircuitPhase::Open) => (next, true),

        (CircuitEvent::Failure, phase) => {
            next.failure_count = state.failure_count.saturating_add(1);
            next.last_failure_time = Some(now);
            match phase {
                CircuitPhase::HalfOpen { .. } => {
                    next.phase = CircuitPhase::Open;
                    next.success_count = 0;
                }
                CircuitPhase::Closed if next.failure_count >= config.failure_threshold => {
                    next.phase = CircuitPhase::Open;
                    next.success_count = 0;
                }
                _ => {}
            }
            (next, true)
        }
    }
}

/// Serializable breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: String,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_failure_age_ms: Option<u64>,
    pub config: CircuitBreakerConfig,
}

/// Circuit breaker for a single source
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a call may proceed.
    ///
    /// Records nothing about outcomes. Its only effects are the lazy
    /// OPEN -> HALF_OPEN move and counting the half-open probe it admits.
    pub fn can_execute(&self) -> bool {
        let mut state = self.state.lock();
        let before = state.phase;
        let (next, admitted) = transition(
            &state,
            CircuitEvent::PermissionCheck,
            Instant::now(),
            &self.config,
        );
        *state = next;

        if before == CircuitPhase::Open && admitted {
            tracing::info!(source = %self.name, "Circuit breaker transitioning to HALF_OPEN");
        }
        admitted
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock();
        let before = state.phase;
        let (next, _) = transition(&state, CircuitEvent::Success, Instant::now(), &self.config);
        *state = next;

        if let CircuitPhase::HalfOpen { .. } = before {
            if next.phase == CircuitPhase::Closed {
                tracing::info!(source = %self.name, "✅ Circuit breaker closed");
            } else {
                tracing::info!(
                    source = %self.name,
                    successes = next.success_count,
                    required = self.config.success_threshold,
                    "Circuit breaker probe succeeded"
                );
            }
        }
    }

    pub fn record_failure(&self, error: &dyn fmt::Display) {
        let mut state = self.state.lock();
        let before = state.phase;
        let (next, _) = transition(&state, CircuitEvent::Failure, Instant::now(), &self.config);
        *state = next;

        tracing::warn!(
            source = %self.name,
            failures = next.failure_count,
            threshold = self.config.failure_threshold,
            error = %error,
            "Circuit breaker recorded failure"
        );
        if before != CircuitPhase::Open && next.phase == CircuitPhase::Open {
            tracing::error!(
                source = %self.name,
                during_recovery = matches!(before, CircuitPhase::HalfOpen { .. }),
                "🔌 Circuit breaker opened"
            );
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> CircuitState {
        *self.state.lock()
    }

    pub fn phase(&self) -> CircuitPhase {
        self.state.lock().phase
    }

    pub fn stats(&self) -> BreakerStats {
        let state = self.state();
        BreakerStats {
            name: self.name.clone(),
            state: state.phase.to_string(),
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_age_ms: state
                .last_failure_time
                .map(|t| t.elapsed().as_millis() as u64),
            config: self.config.clone(),
        }
    }

    /// Force the breaker closed and forget the last failure
    pub fn reset(&self) {
        tracing::info!(source = %self.name, "Circuit breaker manual reset");
        *self.state.lock() = CircuitState::default();
    }
}

/// Breakers keyed by source name, created lazily on first lookup
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Breaker for `source_name`, shared by every caller
    pub fn get(&self, source_name: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        breakers
            .entry(source_name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(source_name, self.config.clone())))
            .clone()
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> =
            self.breakers.lock().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.lock().values() {
            breaker.reset();
        }
    }

    pub fn reset(&self, source_name: &str) {
        if let Some(breaker) = self.breakers.lock().get(source_name) {
            breaker.reset();
        }
    }
}
