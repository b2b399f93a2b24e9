//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → handed to Registry, which builds every component from it
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Registry::apply swaps validator + threat policy atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Only validation settings are hot-reloadable; limiter, breaker and
//!   key settings need a restart

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, ConcurrencyConfig, CustomPattern, EncryptionConfig, GuardConfig,
    MaintenanceConfig, ObservabilityConfig, RateLimitConfig, ThreatPolicyConfig, ValidationConfig,
};
pub use validation::{validate_config, ConfigViolation};
