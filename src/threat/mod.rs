//! Threat detection subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound payload (serde_json::Value or &str):
//!     → validator.rs (structural limits, short-circuit on violation)
//!     → validator.rs (allow-list bypass per field)
//!     → patterns.rs  (ThreatPatternMatcher runs every Detector)
//!     → verdict.rs   (ValidationVerdict: max level + findings)
//! ```
//!
//! # Design Decisions
//! - Detectors are independent trait objects; adding a family never touches
//!   the validator
//! - Findings carry hashes and offsets, never the matched text
//! - Verdicts are deterministic (serde_json maps iterate in key order)

pub mod detector;
pub mod patterns;
pub mod validator;
pub mod verdict;

pub use detector::{Detection, Detector, PatternDetector, Site};
pub use patterns::ThreatPatternMatcher;
pub use validator::{ValidationLimits, ZeroTrustValidator};
pub use verdict::{Finding, ThreatFamily, ThreatLevel, ValidationVerdict};
