//! Least-requests load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, eligible, LoadBalancer};

/// Least requests selector.
/// Selects the eligible member with the fewest in-flight requests.
#[derive(Debug, Default)]
pub struct LeastRequests;

impl LeastRequests {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastRequests {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        // Ties go to the first member (stability).
        eligible(backends)
            .into_iter()
            .min_by_key(|b| b.active_requests())
            .cloned()
    }
}
