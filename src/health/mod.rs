//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each member of the current snapshot
//!     → Update member state
//!
//! Passive health checks (passive.rs):
//!     Forwarding outcome observed
//!     → Increment failure/success streak
//!     → Update member state if threshold reached
//!
//! State machine (load_balancer/backend.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Health state is per-member, and survives reloads

pub mod active;
pub mod passive;

pub use active::HealthMonitor;
pub use passive::{observe_outcome, ForwardOutcome};
