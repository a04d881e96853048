//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes in evaluation order
//! - Look up the single winning route for a request
//! - Return matched route or explicit no-match
//!
//! # Evaluation order
//! 1. Rules bound to a host, before host-less rules
//! 2. Longest path prefix first
//! 3. Declaration order in the config file
//!
//! The table is immutable after construction; reloads build a new table.

use axum::http::{HeaderName, HeaderValue};
use std::cmp::Reverse;
use std::sync::Arc;

use crate::config::validation::ValidationError;
use crate::config::{RouteConfig, TransformConfig};
use crate::error::GatewayError;
use crate::routing::matcher::{normalize_path_pattern, HostMatcher, PathPrefixMatcher};

/// Policy name meaning "no authentication".
pub const ANONYMOUS_POLICY: &str = "anonymous";

/// Request rewrites attached to a route.
#[derive(Debug, Clone, Default)]
pub struct Transform {
    path_remove_prefix: Option<PathPrefixMatcher>,
    path_prefix: Option<String>,
    request_headers: Vec<(HeaderName, HeaderValue)>,
}

impl Transform {
    fn from_config(route: &str, config: &TransformConfig) -> Result<Self, ValidationError> {
        let field = |name: &str| format!("reverse_proxy.routes[{}].transforms.{}", route, name);

        let path_remove_prefix = match &config.path_remove_prefix {
            Some(p) => Some(PathPrefixMatcher::new(
                normalize_path_pattern(p)
                    .map_err(|e| ValidationError::new(field("path_remove_prefix"), e))?,
            )),
            None => None,
        };
        let path_prefix = match &config.path_prefix {
            Some(p) => Some(
                normalize_path_pattern(p)
                    .map_err(|e| ValidationError::new(field("path_prefix"), e))?,
            ),
            None => None,
        };

        let mut request_headers = Vec::with_capacity(config.request_headers.len());
        for (name, value) in &config.request_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                ValidationError::new(field("request_headers"), format!("'{}': {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ValidationError::new(field("request_headers"), format!("'{}': {}", name, e))
            })?;
            request_headers.push((name, value));
        }

        Ok(Self {
            path_remove_prefix,
            path_prefix,
            request_headers,
        })
    }

    /// Apply prefix removal then prefix addition to a request path.
    pub fn rewrite_path(&self, path: &str) -> String {
        let mut out = path.to_string();
        if let Some(remove) = &self.path_remove_prefix {
            if remove.len() > 0 && remove.matches(path) {
                out = path[remove.prefix().len()..].to_string();
                if out.is_empty() {
                    out.push('/');
                }
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if prefix != "/" {
                out = format!("{}{}", prefix, out);
            }
        }
        out
    }

    pub fn request_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.request_headers
    }
}

/// A compiled route.
#[derive(Debug)]
pub struct RouteRule {
    pub id: String,
    pub host: Option<HostMatcher>,
    pub path: PathPrefixMatcher,
    pub cluster: String,
    /// `None` when the route is anonymous.
    pub policy: Option<String>,
    pub transform: Transform,
    /// Position in the config file.
    pub order: usize,
}

impl RouteRule {
    pub fn from_config(order: usize, config: &RouteConfig) -> Result<Self, ValidationError> {
        let prefix = normalize_path_pattern(&config.path).map_err(|e| {
            ValidationError::new(format!("reverse_proxy.routes[{}].path", config.id), e)
        })?;
        let policy = config
            .authorization_policy
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case(ANONYMOUS_POLICY))
            .map(str::to_string);

        Ok(Self {
            id: config.id.clone(),
            host: config.host.as_deref().map(HostMatcher::new),
            path: PathPrefixMatcher::new(prefix),
            cluster: config.cluster.clone(),
            policy,
            transform: Transform::from_config(&config.id, &config.transforms)?,
            order,
        })
    }

    pub fn requires_authentication(&self) -> bool {
        self.policy.is_some()
    }

    fn matches(&self, host: Option<&str>, path: &str) -> bool {
        let host_ok = match &self.host {
            Some(matcher) => matcher.matches(host),
            None => true,
        };
        host_ok && self.path.matches(path)
    }
}

/// Compiled, immutable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    /// Rules sorted into evaluation order.
    rules: Vec<Arc<RouteRule>>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Result<Self, ValidationError> {
        let mut rules = routes
            .iter()
            .enumerate()
            .map(|(i, r)| RouteRule::from_config(i, r).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        // Stable sort keeps declaration order among equals.
        rules.sort_by_key(|r| (r.host.is_none(), Reverse(r.path.len())));

        Ok(Self { rules })
    }

    /// Find the winning rule. `host` must be normalized.
    pub fn lookup(&self, host: Option<&str>, path: &str) -> Result<Arc<RouteRule>, GatewayError> {
        self.rules
            .iter()
            .find(|r| r.matches(host, path))
            .cloned()
            .ok_or_else(|| GatewayError::RouteNotFound {
                path: path.to_string(),
            })
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Arc<RouteRule>] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, host: Option<&str>, path: &str, cluster: &str) -> RouteConfig {
        RouteConfig {
            id: id.into(),
            host: host.map(Into::into),
            path: path.into(),
            cluster: cluster.into(),
            authorization_policy: None,
            transforms: TransformConfig::default(),
        }
    }

    #[test]
    fn longer_prefix_wins_regardless_of_order() {
        let forward = RouteTable::from_config(&[
            route("api", None, "/api/*", "general"),
            route("catalog", None, "/api/catalog/*", "catalog"),
        ])
        .unwrap();
        let reversed = RouteTable::from_config(&[
            route("catalog", None, "/api/catalog/*", "catalog"),
            route("api", None, "/api/*", "general"),
        ])
        .unwrap();

        for table in [forward, reversed] {
            assert_eq!(table.lookup(None, "/api/catalog/items").unwrap().cluster, "catalog");
            assert_eq!(table.lookup(None, "/api/orders/1").unwrap().cluster, "general");
        }
    }

    #[test]
    fn equal_prefixes_resolve_by_declaration_order() {
        let table = RouteTable::from_config(&[
            route("first", None, "/api/orders/{**catch-all}", "orders-a"),
            route("second", None, "/api/orders/*", "orders-b"),
        ])
        .unwrap();
        assert_eq!(table.lookup(None, "/api/orders/9").unwrap().id, "first");
    }

    #[test]
    fn host_rules_take_precedence() {
        let table = RouteTable::from_config(&[
            route("catalog", None, "/api/catalog/*", "catalog"),
            route("media-host", Some("media.example.com"), "/", "media"),
        ])
        .unwrap();

        let hit = table
            .lookup(Some("media.example.com"), "/api/catalog/items")
            .unwrap();
        assert_eq!(hit.cluster, "media");

        let hit = table.lookup(Some("other.example.com"), "/api/catalog/items").unwrap();
        assert_eq!(hit.cluster, "catalog");
    }

    #[test]
    fn no_match_is_explicit() {
        let table = RouteTable::from_config(&[route("catalog", None, "/api/catalog", "c")]).unwrap();
        let err = table.lookup(None, "/api/transport").unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound { .. }));
    }

    #[test]
    fn anonymous_policy_means_no_auth() {
        let mut config = route("r", None, "/", "c");
        config.authorization_policy = Some("Anonymous".into());
        assert!(!RouteRule::from_config(0, &config).unwrap().requires_authentication());

        config.authorization_policy = Some("admin".into());
        assert!(RouteRule::from_config(0, &config).unwrap().requires_authentication());
    }

    #[test]
    fn transform_rewrites_path() {
        let transform = Transform::from_config(
            "r",
            &TransformConfig {
                path_remove_prefix: Some("/api/catalog".into()),
                path_prefix: Some("/v1".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(transform.rewrite_path("/api/catalog/items"), "/v1/items");
        assert_eq!(transform.rewrite_path("/api/catalog"), "/v1/");
        assert_eq!(transform.rewrite_path("/other"), "/v1/other");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let mut transforms = TransformConfig::default();
        transforms
            .request_headers
            .insert("bad header".into(), "x".into());
        assert!(Transform::from_config("r", &transforms).is_err());
    }
}
