//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Identity reported by the informational endpoint.
    pub service: ServiceInfoConfig,

    /// Routes and clusters.
    pub reverse_proxy: ReverseProxyConfig,

    /// Bearer token validation settings.
    pub jwt: JwtConfig,

    /// Named authorization policies.
    pub authorization: AuthorizationConfig,

    /// Per-client quota rules.
    pub ip_rate_limiting: RateLimitConfig,

    /// Cross-origin settings.
    pub cors: CorsConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Static payload for `GET /`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceInfoConfig {
    pub name: String,
    pub version: String,
    /// Downstream service name -> base URL.
    pub downstream: BTreeMap<String, String>,
}

impl Default for ServiceInfoConfig {
    fn default() -> Self {
        Self {
            name: "Marketplace API Gateway".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            downstream: BTreeMap::new(),
        }
    }
}

/// Routes in declaration order plus the clusters they point at.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ReverseProxyConfig {
    /// Declaration order is significant: it breaks ties between rules
    /// with equally long path prefixes.
    pub routes: Vec<RouteConfig>,

    pub clusters: BTreeMap<String, ClusterConfig>,
}

/// Route configuration mapping requests to a cluster.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    #[serde(alias = "name")]
    pub id: String,

    /// Host header to match (case-insensitive, port ignored).
    #[serde(default)]
    pub host: Option<String>,

    /// Path pattern: "/api/catalog/{**catch-all}", "/api/catalog/*" or "/api/catalog".
    pub path: String,

    /// Cluster id to forward to.
    pub cluster: String,

    /// Policy name; absent or "anonymous" means no authentication.
    #[serde(default)]
    pub authorization_policy: Option<String>,

    #[serde(default)]
    pub transforms: TransformConfig,
}

/// Request rewrites applied before forwarding.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TransformConfig {
    pub path_remove_prefix: Option<String>,
    pub path_prefix: Option<String>,
    /// Headers set (overwriting) on the upstream request.
    pub request_headers: BTreeMap<String, String>,
}

/// Member selection strategy within a cluster.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    LeastRequests,
    Random,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClusterConfig {
    pub load_balancing: LoadBalancingPolicy,
    pub members: Vec<MemberConfig>,
}

/// Backend member configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MemberConfig {
    /// Member identifier, unique within its cluster.
    pub name: String,

    /// Destination URL (e.g., "http://127.0.0.1:5001").
    pub address: String,

    /// Maximum concurrent in-flight requests to this member.
    #[serde(default = "default_max_member_requests")]
    pub max_connections: usize,
}

fn default_max_member_requests() -> usize {
    100
}

/// Bearer token validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Symmetric signing secret (HS*). Overridden by `GATEWAY_JWT_SECRET`.
    pub secret_key: Option<String>,

    /// PEM public key for asymmetric algorithms (RS*, ES*).
    pub public_key_path: Option<String>,

    pub algorithm: String,
    pub issuer: String,
    pub audience: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            public_key_path: None,
            algorithm: "HS256".to_string(),
            issuer: "marketplace-identity".to_string(),
            audience: "marketplace-clients".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Policy name -> acceptable roles. An empty list admits any authenticated identity.
    pub policies: BTreeMap<String, Vec<String>>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        let mut policies = BTreeMap::new();
        policies.insert("admin".to_string(), vec!["Admin".to_string()]);
        Self { policies }
    }
}

/// Fixed-window quota configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Trusted header carrying the client address (e.g., "X-Real-IP").
    pub real_ip_header: Option<String>,

    /// Client keys never limited.
    pub ip_whitelist: Vec<String>,

    /// Endpoint patterns never limited (same syntax as rule endpoints).
    pub endpoint_whitelist: Vec<String>,

    /// How often stale windows are reclaimed, in seconds.
    pub sweep_interval_secs: u64,

    pub rules: Vec<RateLimitRuleConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            real_ip_header: None,
            ip_whitelist: Vec::new(),
            endpoint_whitelist: Vec::new(),
            sweep_interval_secs: 60,
            rules: vec![RateLimitRuleConfig {
                endpoint: "*".to_string(),
                period: Duration::from_secs(60),
                limit: 1000,
            }],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitRuleConfig {
    /// "*", "/api/orders/*" or "POST:/api/orders/*".
    pub endpoint: String,

    /// Window length, e.g. "1s", "1m", "1h".
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Requests admitted per window.
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Explicit origins. Empty disables cross-origin access.
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: ["authorization", "content-type", "x-request-id"]
                .iter()
                .map(|h| h.to_string())
                .collect(),
            max_age_secs: 3600,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in seconds.
    pub timeout_secs: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Independent deadlines for each blocking step of a backend call.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connection establishment.
    #[serde(with = "humantime_serde")]
    pub connect: Duration,

    /// Time until the backend's response head arrives.
    #[serde(with = "humantime_serde")]
    pub response: Duration,

    /// Maximum gap between response body frames.
    #[serde(with = "humantime_serde")]
    pub stream_idle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            response: Duration::from_secs(30),
            stream_idle: Duration::from_secs(60),
        }
    }
}

/// Retry configuration. Retries only ever target the member already selected.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Fraction of requests that may be retries (e.g., 0.1 for 10%).
    pub budget_ratio: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
            budget_ratio: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) used when RUST_LOG is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    pub bind_address: String,

    /// Policy the admin caller's token must satisfy.
    pub policy: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            policy: "admin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 10 * 1024 * 1024,
        }
    }
}
