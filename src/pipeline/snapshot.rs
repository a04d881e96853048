//! Compiled configuration served to requests.
//!
//! A snapshot is built off to the side from a validated `GatewayConfig` and
//! installed with a single `ArcSwap::store`. Each request loads exactly one
//! snapshot, so every stage of that request sees the same version.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};

use crate::auth::{PolicySet, TokenValidator};
use crate::config::validation::{validate_config, ValidationError};
use crate::config::{ConfigError, GatewayConfig};
use crate::load_balancer::ClusterRegistry;
use crate::proxy::Forwarder;
use crate::routing::RouteTable;
use crate::security::rate_limit::RateLimitPolicy;

pub type SharedSnapshot = Arc<ArcSwap<GatewaySnapshot>>;

#[derive(Debug)]
pub struct GatewaySnapshot {
    /// Increments with every installed reload, starting at 1.
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub config: GatewayConfig,
    pub routes: RouteTable,
    pub clusters: ClusterRegistry,
    pub validator: TokenValidator,
    pub policies: PolicySet,
    pub rate_limits: RateLimitPolicy,
    pub forwarder: Forwarder,
}

impl GatewaySnapshot {
    /// Validate and compile `config`. Members unchanged since `previous`
    /// keep their health state.
    pub fn build(
        config: GatewayConfig,
        previous: Option<&GatewaySnapshot>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let routes = RouteTable::from_config(&config.reverse_proxy.routes)?;
        let clusters = ClusterRegistry::from_config(
            &config.reverse_proxy.clusters,
            previous.map(|p| &p.clusters),
        )?;
        let validator = TokenValidator::new(&config.jwt)?;
        let policies = PolicySet::from_config(&config.authorization.policies);
        let rate_limits = RateLimitPolicy::from_config(&config.ip_rate_limiting).map_err(|e| {
            ConfigError::Validation(vec![ValidationError::new("ip_rate_limiting", e)])
        })?;
        let forwarder = Forwarder::new(&config.timeouts, &config.retries, &config.health_check);

        Ok(Self {
            version: previous.map_or(1, |p| p.version + 1),
            loaded_at: Utc::now(),
            config,
            routes,
            clusters,
            validator,
            policies,
            rate_limits,
            forwarder,
        })
    }

    pub fn into_shared(self) -> SharedSnapshot {
        Arc::new(ArcSwap::from_pointee(self))
    }
}

/// Build a successor of the current snapshot and install it.
///
/// On error the current snapshot stays in service.
pub fn reload(shared: &SharedSnapshot, config: GatewayConfig) -> Result<u64, ConfigError> {
    let current = shared.load_full();
    let next = GatewaySnapshot::build(config, Some(&current))?;
    let version = next.version;
    shared.store(Arc::new(next));
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, MemberConfig, RouteConfig};
    use crate::load_balancer::HealthState;

    fn config(member: &str) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.jwt.secret_key = Some("snapshot-secret".into());
        config.reverse_proxy.clusters.insert(
            "orders".into(),
            ClusterConfig {
                members: vec![MemberConfig {
                    name: "o1".into(),
                    address: member.into(),
                    max_connections: 10,
                }],
                ..Default::default()
            },
        );
        config.reverse_proxy.routes.push(RouteConfig {
            id: "orders".into(),
            host: None,
            path: "/api/orders/{**catch-all}".into(),
            cluster: "orders".into(),
            authorization_policy: Some("authenticated".into()),
            transforms: Default::default(),
        });
        config
    }

    #[test]
    fn reload_bumps_version_and_keeps_health() {
        let shared = GatewaySnapshot::build(config("http://127.0.0.1:7001"), None)
            .unwrap()
            .into_shared();
        shared.load().clusters.all_backends()[0].set_health(HealthState::Unhealthy);

        let version = reload(&shared, config("http://127.0.0.1:7001")).unwrap();
        assert_eq!(version, 2);
        assert_eq!(
            shared.load().clusters.all_backends()[0].health(),
            HealthState::Unhealthy
        );
    }

    #[test]
    fn invalid_reload_leaves_snapshot_in_place() {
        let shared = GatewaySnapshot::build(config("http://127.0.0.1:7001"), None)
            .unwrap()
            .into_shared();

        let mut broken = config("http://127.0.0.1:7001");
        broken.reverse_proxy.routes[0].cluster = "nowhere".into();
        assert!(reload(&shared, broken).is_err());
        assert_eq!(shared.load().version, 1);
    }

    #[test]
    fn missing_key_is_rejected() {
        let mut c = config("http://127.0.0.1:7001");
        c.jwt.secret_key = None;
        assert!(matches!(
            GatewaySnapshot::build(c, None),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn bad_quota_rule_is_a_validation_error() {
        let mut c = config("http://127.0.0.1:7001");
        c.ip_rate_limiting.rules[0].limit = 0;
        match GatewaySnapshot::build(c, None) {
            Err(ConfigError::Validation(errors)) => {
                assert!(errors.iter().all(|e| e.field.starts_with("ip_rate_limiting")));
            }
            other => panic!("expected validation error, got {:?}", other.map(|s| s.version)),
        }
    }
}
