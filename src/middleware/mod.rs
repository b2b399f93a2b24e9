//! Security middleware facade.
//!
//! # Data Flow
//! ```text
//! Operation {principal_id, dependency, kind, payload, sensitive_fields}
//!     + storage callback
//!     → pipeline.rs (SecurityMiddleware::protect)
//!     → result or GuardError<E>
//! ```

pub mod operation;
pub mod pipeline;

pub use operation::{Operation, OperationKind};
pub use pipeline::SecurityMiddleware;
