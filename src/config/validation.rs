//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing clusters and policies)
//! - Validate value ranges (timeouts > 0, connect < response, quotas > 0)
//! - Refuse to start without token key material
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use url::Url;

use crate::auth::policy::AUTHENTICATED_POLICY;
use crate::config::schema::GatewayConfig;
use crate::routing::{RouteRule, ANONYMOUS_POLICY};
use crate::security::rate_limit::{EndpointPattern, QuotaRule};

/// One semantic problem in a configuration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Parse a member destination into an `http://host:port` authority.
pub fn member_authority(address: &str) -> Result<String, String> {
    let url = Url::parse(address).map_err(|e| format!("'{}': {}", address, e))?;
    if url.scheme() != "http" {
        return Err(format!("'{}': only http:// destinations are supported", address));
    }
    let host = url
        .host_str()
        .ok_or_else(|| format!("'{}': missing host", address))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| format!("'{}': missing port", address))?;
    Ok(format!("{}:{}", host, port))
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    validate_jwt(config, &mut errors);
    validate_routes(config, &mut errors);
    validate_clusters(config, &mut errors);
    validate_rate_limits(config, &mut errors);

    let cors = &config.cors;
    if cors.allow_credentials && cors.allowed_origins.iter().any(|o| o == "*") {
        errors.push(ValidationError::new(
            "cors.allowed_origins",
            "wildcard origin cannot be combined with allow_credentials; list origins explicitly",
        ));
    }

    let timeouts = [
        ("timeouts.connect", config.timeouts.connect),
        ("timeouts.response", config.timeouts.response),
        ("timeouts.stream_idle", config.timeouts.stream_idle),
    ];
    for (field, value) in timeouts {
        if value == Duration::ZERO {
            errors.push(ValidationError::new(field, "must be greater than zero"));
        }
    }
    // The response deadline includes the connect.
    if config.timeouts.connect >= config.timeouts.response {
        errors.push(ValidationError::new(
            "timeouts.connect",
            "must be shorter than timeouts.response",
        ));
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::new("health_check.interval_secs", "must be greater than zero"));
        }
        if !config.health_check.path.starts_with('/') {
            errors.push(ValidationError::new("health_check.path", "must start with '/'"));
        }
    }

    if config.retries.enabled && config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }

    if config.admin.enabled
        && config.admin.policy != AUTHENTICATED_POLICY
        && !config.authorization.policies.contains_key(&config.admin.policy)
    {
        errors.push(ValidationError::new(
            "admin.policy",
            format!("unknown policy '{}'", config.admin.policy),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_jwt(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let jwt = &config.jwt;
    let algorithm = jwt.algorithm.parse::<jsonwebtoken::Algorithm>();
    match algorithm {
        Err(_) => errors.push(ValidationError::new(
            "jwt.algorithm",
            format!("unsupported algorithm '{}'", jwt.algorithm),
        )),
        Ok(_) if jwt.algorithm.starts_with("HS") => {
            if jwt.secret_key.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "jwt.secret_key",
                    "a signing key is required (set jwt.secret_key or GATEWAY_JWT_SECRET)",
                ));
            }
        }
        Ok(_) => {
            if jwt.public_key_path.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "jwt.public_key_path",
                    format!("algorithm {} requires a PEM public key", jwt.algorithm),
                ));
            }
        }
    }
    if jwt.issuer.trim().is_empty() {
        errors.push(ValidationError::new("jwt.issuer", "must not be empty"));
    }
    if jwt.audience.trim().is_empty() {
        errors.push(ValidationError::new("jwt.audience", "must not be empty"));
    }
}

fn validate_routes(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for (i, route) in config.reverse_proxy.routes.iter().enumerate() {
        if route.id.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("reverse_proxy.routes[{}].id", i),
                "must not be empty",
            ));
        } else if !seen.insert(route.id.as_str()) {
            errors.push(ValidationError::new(
                format!("reverse_proxy.routes[{}].id", route.id),
                "duplicate route id",
            ));
        }

        if let Err(e) = RouteRule::from_config(i, route) {
            errors.push(e);
        }

        if !config.reverse_proxy.clusters.contains_key(&route.cluster) {
            errors.push(ValidationError::new(
                format!("reverse_proxy.routes[{}].cluster", route.id),
                format!("unknown cluster '{}'", route.cluster),
            ));
        }

        if let Some(policy) = route.authorization_policy.as_deref().map(str::trim) {
            let known = policy.is_empty()
                || policy.eq_ignore_ascii_case(ANONYMOUS_POLICY)
                || policy == AUTHENTICATED_POLICY
                || config.authorization.policies.contains_key(policy);
            if !known {
                errors.push(ValidationError::new(
                    format!("reverse_proxy.routes[{}].authorization_policy", route.id),
                    format!("unknown policy '{}'", policy),
                ));
            }
        }
    }
}

fn validate_clusters(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    for (id, cluster) in &config.reverse_proxy.clusters {
        if cluster.members.is_empty() {
            errors.push(ValidationError::new(
                format!("reverse_proxy.clusters.{}.members", id),
                "cluster has no members",
            ));
        }
        let mut names = HashSet::new();
        for member in &cluster.members {
            let field = format!("reverse_proxy.clusters.{}.members[{}]", id, member.name);
            if !names.insert(member.name.as_str()) {
                errors.push(ValidationError::new(field.clone(), "duplicate member name"));
            }
            if let Err(e) = member_authority(&member.address) {
                errors.push(ValidationError::new(format!("{}.address", field), e));
            }
            if member.max_connections == 0 {
                errors.push(ValidationError::new(
                    format!("{}.max_connections", field),
                    "must be greater than zero",
                ));
            }
        }
    }
}

fn validate_rate_limits(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let limits = &config.ip_rate_limiting;
    for (i, rule) in limits.rules.iter().enumerate() {
        if let Err(e) = QuotaRule::from_config(rule) {
            errors.push(ValidationError::new(format!("ip_rate_limiting.rules[{}]", i), e));
        }
    }
    for (i, endpoint) in limits.endpoint_whitelist.iter().enumerate() {
        if let Err(e) = EndpointPattern::parse(endpoint) {
            errors.push(ValidationError::new(
                format!("ip_rate_limiting.endpoint_whitelist[{}]", i),
                e,
            ));
        }
    }
    if let Some(name) = &limits.real_ip_header {
        if axum::http::HeaderName::from_bytes(name.trim().as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "ip_rate_limiting.real_ip_header",
                format!("'{}' is not a valid header name", name),
            ));
        }
    }
    if limits.enabled && limits.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "ip_rate_limiting.sweep_interval_secs",
            "must be greater than zero",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ClusterConfig, MemberConfig, RateLimitRuleConfig, RouteConfig};

    fn valid_config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.jwt.secret_key = Some("test-secret".into());
        config.reverse_proxy.clusters.insert(
            "catalog".into(),
            ClusterConfig {
                members: vec![MemberConfig {
                    name: "c1".into(),
                    address: "http://127.0.0.1:5001".into(),
                    max_connections: 10,
                }],
                ..Default::default()
            },
        );
        config.reverse_proxy.routes.push(RouteConfig {
            id: "catalog".into(),
            host: None,
            path: "/api/catalog/{**catch-all}".into(),
            cluster: "catalog".into(),
            authorization_policy: Some("admin".into()),
            transforms: Default::default(),
        });
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert_eq!(validate_config(&valid_config()), Ok(()));
    }

    #[test]
    fn missing_signing_key_is_fatal() {
        let mut config = valid_config();
        config.jwt.secret_key = None;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "jwt.secret_key"));
    }

    #[test]
    fn asymmetric_algorithm_needs_public_key() {
        let mut config = valid_config();
        config.jwt.algorithm = "RS256".into();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "jwt.public_key_path"));
    }

    #[test]
    fn collects_every_problem() {
        let mut config = valid_config();
        config.reverse_proxy.routes[0].cluster = "missing".into();
        config.reverse_proxy.routes[0].authorization_policy = Some("nope".into());
        config.reverse_proxy.routes[0].path = "no-slash".into();
        config
            .reverse_proxy
            .clusters
            .get_mut("catalog")
            .unwrap()
            .members[0]
            .address = "https://secure:443".into();
        config.ip_rate_limiting.rules.push(RateLimitRuleConfig {
            endpoint: "*".into(),
            period: Duration::ZERO,
            limit: 0,
        });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.len() >= 5, "{:?}", errors);
    }

    #[test]
    fn rejects_wildcard_origin_with_credentials() {
        let mut config = valid_config();
        config.cors.allowed_origins = vec!["*".into()];
        config.cors.allow_credentials = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "cors.allowed_origins");
    }

    #[test]
    fn connect_timeout_must_undercut_response_timeout() {
        let mut config = valid_config();
        config.timeouts.connect = Duration::from_secs(5);
        config.timeouts.response = Duration::from_millis(300);
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "timeouts.connect"));

        config.timeouts.response = config.timeouts.connect;
        assert!(validate_config(&config).is_err());

        config.timeouts.response = Duration::from_secs(6);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn member_authority_defaults_port() {
        assert_eq!(member_authority("http://catalog").unwrap(), "catalog:80");
        assert_eq!(member_authority("http://10.0.0.5:5001/").unwrap(), "10.0.0.5:5001");
        assert!(member_authority("ftp://x:1").is_err());
    }
}
