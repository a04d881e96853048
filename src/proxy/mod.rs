//! Proxy forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Routed request + member guard
//!     → forwarder.rs (rewrite URI, scrub headers, send with deadlines)
//!     → member response streamed back to the caller
//!     → outcome fed to passive health checking
//! ```

pub mod forwarder;

pub use forwarder::{ForwardTarget, Forwarder};
