//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (host, path)
//!     → matcher.rs (canonicalize the path once)
//!     → router.rs (route lookup in evaluation order)
//!     → matcher.rs (host + segment-aware prefix checks)
//!     → Return: winning RouteRule or RouteNotFound
//!
//! Route Compilation (at startup and on every reload):
//!     RouteConfig[]
//!     → Normalize path patterns, parse transforms
//!     → Sort: host-bound first, longest prefix, declaration order
//!     → Freeze as immutable RouteTable inside a snapshot
//! ```
//!
//! # Design Decisions
//! - Routes compiled ahead of time, immutable at runtime
//! - No regex in hot path (prefix matching only)
//! - Deterministic: same input always matches same route
//! - Exactly one winner per request

pub mod matcher;
pub mod router;

pub use router::{RouteRule, RouteTable, Transform, ANONYMOUS_POLICY};
