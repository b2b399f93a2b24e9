//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Validated operation:
//!     → rate_limit.rs (per-principal token bucket, abuse penalties)
//!     → limits.rs     (concurrency slot, bounded wait queue)
//!     → Pass to circuit-wrapped dependency call
//! ```
//!
//! # Design Decisions
//! - Cheap rejections first: the rate limiter never waits, the
//!   concurrency limiter may
//! - Fail closed: a rejected operation never reaches the dependency
//! - No trust in the caller's pacing; every principal is metered

pub mod limits;
pub mod rate_limit;

pub use limits::{ConcurrencyLimiter, Permit};
pub use rate_limit::{AdaptiveRateLimiter, Admission};
