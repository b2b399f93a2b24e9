//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Init (registry.rs):
//!     GuardConfig → Validate → Build middleware → Spawn maintenance
//!
//! Running:
//!     maintenance.rs: interval tick → key rotation + idle eviction
//!     config watcher  → Registry::apply
//!
//! Teardown (registry.rs, shutdown.rs):
//!     Shutdown::trigger → background tasks exit → awaited
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - All process-wide state hangs off one `Registry`; there are no globals
//! - Background tasks share one broadcast shutdown channel

pub mod maintenance;
pub mod registry;
pub mod shutdown;
pub mod signals;

pub use maintenance::MaintenanceTask;
pub use registry::{Registry, RegistryBuilder};
pub use shutdown::Shutdown;
