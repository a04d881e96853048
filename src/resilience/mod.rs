//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Attempt to the selected member fails to connect:
//!     → retries.rs (retryable? budget left?)
//!     → backoff.rs (exponential delay with jitter)
//!     → same member again
//! ```
//!
//! # Design Decisions
//! - Off by default; the forwarder reports failures upward otherwise
//! - Retries only for bodyless idempotent requests (GET, HEAD, etc.)
//! - Never fails over to a different member

pub mod backoff;
pub mod retries;
