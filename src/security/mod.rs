//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (cross-origin grant, preflight answers)
//!     → rate_limit.rs (per-client fixed-window quotas)
//!     → [authentication / authorization in the pipeline]
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Forward
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - No trust in client input beyond the configured real-IP header
//! - Explicit CORS origins; never a wildcard with credentials

pub mod cors;
pub mod headers;
pub mod rate_limit;
