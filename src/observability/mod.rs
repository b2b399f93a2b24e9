//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! protect pipeline, breakers, key manager:
//!     → events.rs  (SecurityEvent → EventSink: tracing, or a channel to an
//!                   audit consumer)
//!     → metrics.rs (rejections, verdict levels, breaker state, key events,
//!                   in-flight gauge, call latency)
//!
//! logging.rs installs the subscriber that both end up in.
//! ```
//!
//! # Design Decisions
//! - Events never carry payloads, matched fragments or key material; only
//!   ids, levels, families and hashes
//! - Metric labels stay low-cardinality: dependency names, never principals
//! - Recording is a no-op until a recorder or subscriber is installed

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{ChannelEventSink, EventSink, SecurityEvent, TracingEventSink};
