//! Marketplace API gateway library.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────▶ http::server ──▶ pipeline ──────────────────────────────────┐
//!                               │ quota (security::rate_limit)            │
//!                               │ route lookup (routing)                  │
//!                               │ authentication (auth::token)            │
//!                               │ authorization (auth::policy)            │
//!                               │ member selection (load_balancer)        │
//!                               ▼                                         │
//!                             proxy::forwarder ──▶ Backend member         │
//!     Client Response ◀───────────────────────────────────────────────────┘
//!
//!     Cross-cutting: config (+ hot reload), health, resilience,
//!                    observability, lifecycle, admin
//! ```

// Core subsystems
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod proxy;
pub mod routing;

// Identity
pub mod auth;

// Traffic management
pub mod health;
pub mod load_balancer;

// Cross-cutting concerns
pub mod admin;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
