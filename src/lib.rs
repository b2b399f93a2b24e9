//! Zero-trust validation and resilience middleware for storage access.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod threat;

pub use config::schema::GuardConfig;
pub use error::{GuardError, InitError};
pub use lifecycle::{Registry, Shutdown};
pub use middleware::{Operation, OperationKind, SecurityMiddleware};
