//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → cluster identified
//!     → registry.rs (look up the cluster's members)
//!     → Apply load balancing strategy:
//!         - round_robin.rs (rotate through eligible members)
//!         - least_requests.rs (pick member with fewest in-flight requests)
//!         - random.rs (uniform pick)
//!     → backend.rs (reserve an in-flight slot)
//!     → Return guard or ClusterUnavailable
//! ```
//!
//! # Design Decisions
//! - Strategies are stateless apart from the round-robin cursor
//! - Strategy selection per cluster
//! - Unhealthy or saturated members excluded from selection

use std::fmt::Debug;
use std::sync::Arc;

pub mod backend;
pub mod least_requests;
pub mod random;
pub mod registry;
pub mod round_robin;

pub use backend::{Backend, BackendGuard, HealthState};
pub use registry::{Cluster, ClusterRegistry};

/// A member selection strategy.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick one eligible member, or `None` when there is none.
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>>;
}

/// Members that are healthy (or unprobed) and below their ceiling.
pub(crate) fn eligible(backends: &[Arc<Backend>]) -> Vec<&Arc<Backend>> {
    backends
        .iter()
        .filter(|b| b.is_healthy() && b.has_capacity())
        .collect()
}
