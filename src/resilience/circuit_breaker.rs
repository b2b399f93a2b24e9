//! Circuit breaker for storage dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through, failures counted
//! - Open: dependency assumed down, calls fail fast without being invoked
//! - Half-Open: one probe call allowed through
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: after recovery_timeout since opened_at
//! Half-Open → Closed: probe call succeeds (failure counter reset)
//! Half-Open → Open: probe call fails
//! ```
//!
//! # Design Decisions
//! - Per-dependency circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open; concurrent callers are rejected, not queued
//! - Every call carries a deadline; a timeout is a failure
//! - Transition decisions are serialized by a mutex that is never held
//!   across an await
//! - An outcome is applied only if no transition happened while the call
//!   ran, so late results cannot double-count

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::CircuitBreakerConfig;
use crate::error::GuardError;
use crate::observability::metrics;
use crate::observability::{EventSink, SecurityEvent};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitState {
    pub state: BreakerState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
    pub half_open_probe_in_flight: bool,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Bumped on every transition.
    generation: u64,
}

/// Circuit breaker guarding one named dependency.
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

type Transition = (BreakerState, BreakerState);

impl CircuitBreaker {
    pub fn new(
        dependency: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
                generation: 0,
            }),
            clock,
            events,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitState {
        let inner = self.lock();
        CircuitState {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
            half_open_probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Run `f` through the breaker with the configured per-call timeout.
    ///
    /// Returns `CircuitOpen` without invoking `f` when the circuit rejects
    /// the call, `Timeout` when `f` exceeds its deadline, and `f`'s own error
    /// unmodified as `Dependency`.
    pub async fn call<T, E, F, Fut>(&self, f: F) -> Result<T, GuardError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = match self.admit() {
            Ok(ticket) => ticket,
            Err(retry_after) => {
                self.events.emit(SecurityEvent::CircuitOpen {
                    dependency: self.dependency.clone(),
                    retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
                });
                return Err(GuardError::CircuitOpen {
                    dependency: self.dependency.clone(),
                    retry_after,
                });
            }
        };

        let timeout = self.config.call_timeout();
        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => {
                ticket.complete(true);
                Ok(value)
            }
            Ok(Err(e)) => {
                ticket.complete(false);
                Err(GuardError::Dependency(e))
            }
            Err(_) => {
                tracing::warn!(
                    dependency = %self.dependency,
                    timeout_ms = timeout.as_millis() as u64,
                    "Dependency call timed out"
                );
                ticket.complete(false);
                Err(GuardError::Timeout {
                    dependency: self.dependency.clone(),
                    timeout,
                })
            }
        }
    }

    /// Decide whether a call may proceed. `Err` carries the retry-after
    /// hint, if one is known.
    fn admit(&self) -> Result<Ticket<'_>, Option<Duration>> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Ticket::new(self, inner.generation, false)),
            BreakerState::Open => {
                let now = self.clock.now();
                let ready_at = inner.opened_at.unwrap_or(now) + self.config.recovery_timeout();
                if now < ready_at {
                    return Err(Some(ready_at - now));
                }
                let transition = Self::transition(&mut inner, BreakerState::HalfOpen);
                inner.probe_in_flight = true;
                let ticket = Ticket::new(self, inner.generation, true);
                drop(inner);
                self.notify(transition);
                tracing::info!(dependency = %self.dependency, "Circuit half-open, sending probe");
                Ok(ticket)
            }
            BreakerState::HalfOpen if inner.probe_in_flight => Err(None),
            BreakerState::HalfOpen => {
                inner.probe_in_flight = true;
                Ok(Ticket::new(self, inner.generation, true))
            }
        }
    }

    fn on_outcome(&self, generation: u64, probe: bool, success: bool) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }

        let transition = match (inner.state, success) {
            (BreakerState::Closed, true) => {
                inner.consecutive_failures = 0;
                None
            }
            (BreakerState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(self.clock.now());
                    Some(Self::transition(&mut inner, BreakerState::Open))
                } else {
                    None
                }
            }
            (BreakerState::HalfOpen, true) if probe => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probe_in_flight = false;
                Some(Self::transition(&mut inner, BreakerState::Closed))
            }
            (BreakerState::HalfOpen, false) if probe => {
                inner.consecutive_failures += 1;
                inner.opened_at = Some(self.clock.now());
                inner.probe_in_flight = false;
                Some(Self::transition(&mut inner, BreakerState::Open))
            }
            _ => None,
        };
        let failures = inner.consecutive_failures;
        drop(inner);

        if let Some(transition) = transition {
            if transition.1 == BreakerState::Open {
                tracing::warn!(dependency = %self.dependency, failures = failures, "Circuit opened");
            }
            self.notify(transition);
        }
    }

    /// Release an abandoned probe so the next caller can probe instead.
    fn on_cancel(&self, generation: u64, probe: bool) {
        if !probe {
            return;
        }
        let mut inner = self.lock();
        if inner.generation == generation && inner.state == BreakerState::HalfOpen {
            inner.probe_in_flight = false;
        }
    }

    fn transition(inner: &mut Inner, to: BreakerState) -> Transition {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        (from, to)
    }

    fn notify(&self, (from, to): Transition) {
        metrics::record_circuit_state(&self.dependency, to);
        self.events.emit(SecurityEvent::CircuitTransition {
            dependency: self.dependency.clone(),
            from,
            to,
        });
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("state", &self.state())
            .finish()
    }
}

/// Admission to run one call. Dropping it without `complete` (the caller's
/// future was cancelled) releases a probe slot and counts nothing.
struct Ticket<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    probe: bool,
    done: bool,
}

impl<'a> Ticket<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, probe: bool) -> Self {
        Self {
            breaker,
            generation,
            probe,
            done: false,
        }
    }

    fn complete(mut self, success: bool) {
        self.done = true;
        self.breaker.on_outcome(self.generation, self.probe, success);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.on_cancel(self.generation, self.probe);
        }
    }
}

/// One breaker per dependency name, created on first use.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
            events,
        }
    }

    /// Breaker for `dependency`, creating it closed if absent.
    pub fn get(&self, dependency: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(dependency) {
            return breaker.clone();
        }
        self.breakers
            .entry(dependency.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    dependency,
                    self.config.clone(),
                    self.clock.clone(),
                    self.events.clone(),
                ))
            })
            .clone()
    }

    /// Snapshot of every known breaker, sorted by dependency name.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.breakers.len())
            .finish()
    }
}
