//! Passive health checking (failure detection).
//!
//! # Design Decisions
//! - Connection errors, timeouts and 502/503/504 count as failures
//! - Every other response, 4xx and plain 500 included, counts as success
//! - Shares the hysteresis counters with the active checker

use axum::http::StatusCode;

use crate::config::HealthCheckConfig;
use crate::load_balancer::Backend;
use crate::observability::metrics;

/// What happened to one forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    Response(StatusCode),
    /// No connection could be established; the member never saw the request.
    ConnectFailed,
    /// The connection broke before a response head arrived.
    Failed,
    TimedOut,
}

impl ForwardOutcome {
    pub fn is_failure(&self) -> bool {
        match self {
            ForwardOutcome::Response(status) => matches!(
                *status,
                StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
            ),
            ForwardOutcome::ConnectFailed | ForwardOutcome::Failed | ForwardOutcome::TimedOut => true,
        }
    }
}

/// Feed a forwarding outcome into the member's health state.
pub fn observe_outcome(backend: &Backend, outcome: ForwardOutcome, config: &HealthCheckConfig) {
    if outcome.is_failure() {
        if backend.mark_failure(config.unhealthy_threshold as usize) {
            tracing::warn!(member = %backend.id(), outcome = ?outcome, "Member marked unhealthy");
            metrics::record_backend_health(&backend.id(), false);
        }
    } else if backend.mark_success(config.healthy_threshold as usize) {
        tracing::info!(member = %backend.id(), "Member recovered");
        metrics::record_backend_health(&backend.id(), true);
    }
}
