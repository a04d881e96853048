//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse, env overrides)
//!     → validation.rs (semantic checks, all errors collected)
//!     → GatewayConfig (validated, immutable)
//!     → compiled into a GatewaySnapshot
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new snapshot built off to the side
//!     → single atomic swap; in-flight requests keep their old snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - A missing signing key aborts startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ClusterConfig, CorsConfig, GatewayConfig, HealthCheckConfig, JwtConfig,
    ListenerConfig, LoadBalancingPolicy, LogFormat, MemberConfig, ObservabilityConfig,
    RateLimitConfig, RateLimitRuleConfig, RetryConfig, RouteConfig, TimeoutConfig,
    TransformConfig,
};
