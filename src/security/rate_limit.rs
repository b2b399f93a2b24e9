//! Adaptive per-principal rate limiting.
//!
//! A token bucket per principal, with a sliding-window abuse detector on
//! top: a principal denied more than `abuse_threshold` times within
//! `abuse_window` is penalized, shrinking both its capacity and refill rate by
//! `penalty_multiplier` for `penalty` duration.
//!
//! # Concurrency
//! State lives in a sharded `DashMap`; each admission holds the shard lock
//! for the principal while it mutates the bucket, so updates for one
//! principal are linearized and different principals rarely contend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::clock::Clock;
use crate::config::RateLimitConfig;

/// Outcome of [`AdaptiveRateLimiter::admit`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allow,
    Deny {
        retry_after: Duration,
        /// The principal is currently under an abuse penalty.
        escalated: bool,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow)
    }
}

/// Per-principal limiter state.
#[derive(Debug, Clone)]
struct RateLimitState {
    tokens: f64,
    last_refill: Instant,
    /// Start of the current denial-counting window.
    window_start: Instant,
    /// Denials in the current window.
    window_count: u32,
    /// Denials in the window before it, weighted into the sliding estimate.
    previous_count: u32,
    penalty_until: Option<Instant>,
    last_seen: Instant,
}

impl RateLimitState {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            window_start: now,
            window_count: 0,
            previous_count: 0,
            penalty_until: None,
            last_seen: now,
        }
    }

    fn penalized(&self, now: Instant) -> bool {
        self.penalty_until.map_or(false, |until| now < until)
    }

    fn refill(&mut self, now: Instant, capacity: f64, rate: f64) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(capacity);
        self.last_refill = now;
    }

    /// Record a denial; returns the sliding-window denial estimate.
    fn record_denial(&mut self, now: Instant, window: Duration) -> f64 {
        let mut elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= window * 2 {
            self.previous_count = 0;
            self.window_count = 0;
            self.window_start = now;
            elapsed = Duration::ZERO;
        } else if elapsed >= window {
            self.previous_count = self.window_count;
            self.window_count = 0;
            self.window_start += window;
            elapsed -= window;
        }
        self.window_count += 1;

        let overlap = 1.0 - elapsed.as_secs_f64() / window.as_secs_f64();
        f64::from(self.previous_count) * overlap + f64::from(self.window_count)
    }
}

/// Token-bucket limiter with adaptive penalties for abusive principals.
pub struct AdaptiveRateLimiter {
    states: DashMap<String, RateLimitState>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            states: DashMap::new(),
            config,
            clock,
        }
    }

    /// Consume one token for `principal_id`, or say how long to wait.
    pub fn admit(&self, principal_id: &str) -> Admission {
        if !self.config.enabled {
            return Admission::Allow;
        }

        let now = self.clock.now();
        let capacity = f64::from(self.config.capacity);
        let mut state = match self.states.get_mut(principal_id) {
            Some(state) => state,
            None => self
                .states
                .entry(principal_id.to_string())
                .or_insert_with(|| RateLimitState::new(capacity, now)),
        };
        state.last_seen = now;

        let (capacity, rate) = self.effective_limits(&state, now);
        state.refill(now, capacity, rate);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Admission::Allow;
        }

        let estimate = state.record_denial(now, self.config.abuse_window());
        if estimate > f64::from(self.config.abuse_threshold) && !state.penalized(now) {
            state.penalty_until = Some(now + self.config.penalty());
            state.window_count = 0;
            state.previous_count = 0;
            let (capacity, _) = self.effective_limits(&state, now);
            state.tokens = state.tokens.min(capacity);
            tracing::warn!(
                principal = %principal_id,
                denials = estimate as u64,
                penalty_secs = self.config.penalty_secs,
                "Abuse threshold exceeded, applying rate penalty"
            );
        }

        let (_, rate) = self.effective_limits(&state, now);
        let retry_after = if rate > 0.0 {
            Duration::try_from_secs_f64((1.0 - state.tokens) / rate).unwrap_or(Duration::MAX)
        } else {
            self.config.penalty()
        };

        Admission::Deny {
            retry_after,
            escalated: state.penalized(now),
        }
    }

    /// Drop state for principals not seen within `ttl`. Returns how many
    /// were evicted.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = self.clock.now();
        let before = self.states.len();
        self.states.retain(|_, state| {
            now.saturating_duration_since(state.last_seen) < ttl || state.penalized(now)
        });
        let evicted = before.saturating_sub(self.states.len());
        if evicted > 0 {
            tracing::debug!(evicted = evicted, remaining = self.states.len(), "Evicted idle rate limit state");
        }
        evicted
    }

    /// Whether `principal_id` is currently penalized.
    pub fn is_penalized(&self, principal_id: &str) -> bool {
        let now = self.clock.now();
        self.states.get(principal_id).map_or(false, |s| s.penalized(now))
    }

    /// Number of principals with live state.
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn effective_limits(&self, state: &RateLimitState, now: Instant) -> (f64, f64) {
        let capacity = f64::from(self.config.capacity);
        let rate = self.config.refill_per_sec;
        if state.penalized(now) {
            let m = self.config.penalty_multiplier;
            ((capacity * m).max(1.0), rate * m)
        } else {
            (capacity, rate)
        }
    }
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("tracked", &self.states.len())
            .field("capacity", &self.config.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(config: RateLimitConfig) -> (AdaptiveRateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (AdaptiveRateLimiter::new(config, clock.clone()), clock)
    }

    fn config(capacity: u32, refill: f64) -> RateLimitConfig {
        RateLimitConfig {
            capacity,
            refill_per_sec: refill,
            ..Default::default()
        }
    }

    #[test]
    fn test_capacity_plus_one_denies_exactly_one() {
        let (limiter, clock) = limiter(config(10, 2.0));

        let results: Vec<Admission> = (0..11).map(|_| limiter.admit("alice")).collect();
        assert_eq!(results.iter().filter(|a| a.is_allowed()).count(), 10);
        assert!(!results[10].is_allowed());

        clock.advance(Duration::from_millis(500));
        assert!(limiter.admit("alice").is_allowed());
        assert!(!limiter.admit("alice").is_allowed());
    }

    #[test]
    fn test_retry_after_reflects_refill_rate() {
        let (limiter, _) = limiter(config(1, 4.0));
        assert!(limiter.admit("bob").is_allowed());

        match limiter.admit("bob") {
            Admission::Deny { retry_after, escalated } => {
                assert_eq!(retry_after, Duration::from_millis(250));
                assert!(!escalated);
            }
            Admission::Allow => panic!("expected denial"),
        }
    }

    #[test]
    fn test_tiny_refill_rate_saturates_retry_after() {
        let (limiter, _) = limiter(config(1, 1e-20));
        assert!(limiter.admit("dave").is_allowed());

        match limiter.admit("dave") {
            Admission::Deny { retry_after, .. } => assert_eq!(retry_after, Duration::MAX),
            Admission::Allow => panic!("expected denial"),
        }
    }

    #[test]
    fn test_principals_are_independent() {
        let (limiter, _) = limiter(config(1, 1.0));
        assert!(limiter.admit("alice").is_allowed());
        assert!(!limiter.admit("alice").is_allowed());
        assert!(limiter.admit("bob").is_allowed());
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let (limiter, clock) = limiter(config(3, 10.0));
        clock.advance(Duration::from_secs(60));

        let admitted = (0..10).filter(|_| limiter.admit("carol").is_allowed()).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_abuse_escalates_to_penalty() {
        let (limiter, clock) = limiter(RateLimitConfig {
            capacity: 8,
            refill_per_sec: 8.0,
            abuse_threshold: 3,
            abuse_window_secs: 60,
            penalty_secs: 30,
            penalty_multiplier: 0.25,
            ..Default::default()
        });

        for _ in 0..8 {
            assert!(limiter.admit("mallory").is_allowed());
        }
        for _ in 0..3 {
            assert_eq!(
                limiter.admit("mallory"),
                Admission::Deny {
                    retry_after: Duration::from_millis(125),
                    escalated: false
                }
            );
        }
        match limiter.admit("mallory") {
            Admission::Deny { escalated, retry_after } => {
                assert!(escalated);
                // Refill is 2/s while penalized.
                assert_eq!(retry_after, Duration::from_millis(500));
            }
            Admission::Allow => panic!("expected denial"),
        }
        assert!(limiter.is_penalized("mallory"));

        // Long idle: capacity is capped at 8 * 0.25 while penalized.
        clock.advance(Duration::from_secs(10));
        let admitted = (0..8).filter(|_| limiter.admit("mallory").is_allowed()).count();
        assert_eq!(admitted, 2);

        clock.advance(Duration::from_secs(30));
        assert!(!limiter.is_penalized("mallory"));
        let admitted = (0..10).filter(|_| limiter.admit("mallory").is_allowed()).count();
        assert_eq!(admitted, 8);
    }

    #[test]
    fn test_denials_outside_window_do_not_escalate() {
        let (limiter, clock) = limiter(RateLimitConfig {
            capacity: 1,
            refill_per_sec: 0.01,
            abuse_threshold: 1,
            abuse_window_secs: 10,
            ..Default::default()
        });
        assert!(limiter.admit("dave").is_allowed());

        for _ in 0..2 {
            assert!(!limiter.admit("dave").is_allowed());
            clock.advance(Duration::from_secs(25));
        }
        assert!(!limiter.is_penalized("dave"));
    }

    #[test]
    fn test_evict_idle() {
        let (limiter, clock) = limiter(config(5, 1.0));
        limiter.admit("old");
        clock.advance(Duration::from_secs(120));
        limiter.admit("fresh");

        assert_eq!(limiter.evict_idle(Duration::from_secs(60)), 1);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_disabled_always_allows() {
        let (limiter, _) = limiter(RateLimitConfig {
            enabled: false,
            capacity: 1,
            ..Default::default()
        });
        assert!((0..100).all(|_| limiter.admit("anyone").is_allowed()));
        assert_eq!(limiter.tracked(), 0);
    }
}
