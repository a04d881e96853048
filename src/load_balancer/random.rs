//! Uniform random load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{backend::Backend, eligible, LoadBalancer};

#[derive(Debug, Default)]
pub struct Random;

impl Random {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for Random {
    fn next_server(&self, backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
        let candidates = eligible(backends);
        if candidates.is_empty() {
            return None;
        }
        Some(candidates[fastrand::usize(..candidates.len())].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::backend::HealthState;

    #[test]
    fn only_picks_healthy_members() {
        let lb = Random::new();
        let up = Arc::new(Backend::new("web", "up", "http://127.0.0.1:1", "127.0.0.1:1", 10));
        let down = Arc::new(Backend::new("web", "down", "http://127.0.0.1:2", "127.0.0.1:2", 10));
        down.set_health(HealthState::Unhealthy);
        let backends = vec![up, down];

        for _ in 0..50 {
            assert_eq!(lb.next_server(&backends).unwrap().name, "up");
        }
    }
}
