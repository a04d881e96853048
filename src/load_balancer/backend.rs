//! Cluster member abstraction.
//!
//! # Responsibilities
//! - Represent a single backend member of a cluster
//! - Track in-flight requests (for least-requests selection)
//! - Enforce the member's concurrency ceiling
//! - Track health state (Unknown/Healthy/Unhealthy) with hysteresis

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single cluster member.
#[derive(Debug)]
pub struct Backend {
    /// Member name, unique within its cluster.
    pub name: String,
    /// Owning cluster id.
    pub cluster: String,
    /// Destination as configured.
    pub address: String,
    /// `host:port` used for upstream URIs.
    pub authority: String,
    /// Maximum concurrent in-flight requests.
    pub max_connections: usize,
    active_requests: AtomicUsize,

    /// Current health state (0=Unknown, 1=Healthy, 2=Unhealthy).
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl Backend {
    pub fn new(
        cluster: impl Into<String>,
        name: impl Into<String>,
        address: impl Into<String>,
        authority: impl Into<String>,
        max_connections: usize,
    ) -> Self {
        Self {
            name: name.into(),
            cluster: cluster.into(),
            address: address.into(),
            authority: authority.into(),
            max_connections,
            active_requests: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        }
    }

    /// `cluster/name`, used in logs and metrics.
    pub fn id(&self) -> String {
        format!("{}/{}", self.cluster, self.name)
    }

    pub fn active_requests(&self) -> usize {
        self.active_requests.load(Ordering::Relaxed)
    }

    pub fn has_capacity(&self) -> bool {
        self.active_requests() < self.max_connections
    }

    /// Reserve an in-flight slot; `None` when the member is saturated.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BackendGuard> {
        let mut prev = self.active_requests.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_connections {
                return None;
            }
            match self.active_requests.compare_exchange_weak(
                prev,
                prev + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(BackendGuard {
            backend: self.clone(),
        })
    }

    // --- Health Logic ---

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Acquire))
    }

    /// Healthy or not yet probed.
    pub fn is_healthy(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Force a state, resetting the hysteresis counters.
    pub fn set_health(&self, state: HealthState) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.consecutive_successes.store(0, Ordering::Relaxed);
        self.state.store(state as u8, Ordering::Release);
    }

    /// Report a successful request/check. Returns true on a transition to Healthy.
    pub fn mark_success(&self, healthy_threshold: usize) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);

        let current = self.health();
        if current == HealthState::Healthy {
            return false;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        // Unknown members are already in rotation; one success settles them.
        if current == HealthState::Unknown || successes >= healthy_threshold {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Healthy as u8, Ordering::Release);
            return current == HealthState::Unhealthy;
        }
        false
    }

    /// Report a failed request/check. Returns true on a transition to Unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: usize) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);

        if self.health() == HealthState::Unhealthy {
            return false;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.state.store(HealthState::Unhealthy as u8, Ordering::Release);
            return true;
        }
        false
    }
}

/// Holds one in-flight slot on a member; released on drop.
#[derive(Debug)]
pub struct BackendGuard {
    backend: Arc<Backend>,
}

impl BackendGuard {
    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }
}

impl Deref for BackendGuard {
    type Target = Backend;
    fn deref(&self) -> &Self::Target {
        &self.backend
    }
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        self.backend.active_requests.fetch_sub(1, Ordering::AcqRel);
    }
}
