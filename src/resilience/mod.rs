//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted operation:
//!     → CircuitBreakerRegistry (breaker for the operation's dependency)
//!     → circuit_breaker.rs (fail fast when open, single probe when half-open)
//!     → tokio::time::timeout (per-call deadline)
//!     → wrapped storage call
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every dependency call has a deadline
//! - No retries on the caller's behalf; retry policy belongs to the caller
//! - Circuit breaker prevents cascading failures
//! - The dependency's own error type is passed through unmodified

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerRegistry, CircuitState};
