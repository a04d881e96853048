//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a failed attempt may be repeated
//! - Enforce a retry budget (retries as a fraction of requests per window)
//!
//! # Design Decisions
//! - Only idempotent methods without a request body are retried
//! - Only connect failures are retried: the backend never saw the request
//! - Retries target the member already selected, never a different one
//! - Retry budget prevents retry storms under load

use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::http::Method;

use crate::health::ForwardOutcome;

/// Whether an attempt that ended in `outcome` may be repeated.
pub fn is_retryable(method: &Method, has_body: bool, outcome: ForwardOutcome) -> bool {
    method.is_idempotent() && !has_body && outcome == ForwardOutcome::ConnectFailed
}

#[derive(Debug)]
struct BudgetWindow {
    started: Instant,
    requests: u64,
    retries: u64,
}

/// Caps retries at `ratio` of requests seen in the current window, with a
/// small floor so quiet periods can still retry.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f32,
    min_retries: u64,
    window: Duration,
    state: Mutex<BudgetWindow>,
}

impl RetryBudget {
    pub fn new(ratio: f32, min_retries: u64) -> Self {
        Self::with_window(ratio, min_retries, Duration::from_secs(10))
    }

    pub fn with_window(ratio: f32, min_retries: u64, window: Duration) -> Self {
        Self {
            ratio: ratio.clamp(0.0, 1.0),
            min_retries,
            window,
            state: Mutex::new(BudgetWindow {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BudgetWindow) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.started.elapsed() >= self.window {
            *state = BudgetWindow {
                started: Instant::now(),
                requests: 0,
                retries: 0,
            };
        }
        f(&mut state)
    }

    pub fn record_request(&self) {
        self.with_state(|s| s.requests += 1);
    }

    /// Withdraw one retry from the budget if any is left.
    pub fn can_retry(&self) -> bool {
        let ratio = f64::from(self.ratio);
        let min_retries = self.min_retries;
        self.with_state(|s| {
            let allowed = ((s.requests as f64) * ratio) as u64;
            if s.retries < allowed.max(min_retries) {
                s.retries += 1;
                true
            } else {
                false
            }
        })
    }
}
