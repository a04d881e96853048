//! Gateway request pipeline.
//!
//! # Data Flow
//! ```text
//! Received
//!     → PathStage             (canonical path, or 400)
//!     → QuotaStage            → RateLimitChecked
//!     → RouteLookupStage      (records the winning rule, if any)
//!     → AuthenticationStage   → Authenticated
//!     → AuthorizationStage    → Authorized
//!     → MemberSelectionStage  → Routed
//!     → Forwarder             → Forwarded
//!     → response relayed     → Completed
//!
//! Any stage may instead move the request to Rejected(reason).
//! ```
//!
//! # Design Decisions
//! - One snapshot per request; reloads never change a request mid-flight
//! - Stages are synchronous and pure apart from quota counters
//! - The only await point is the forward itself

pub mod snapshot;
pub mod stages;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, Response};
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};

use crate::auth::ClientIdentity;
use crate::clock::Clock;
use crate::error::GatewayError;
use crate::load_balancer::BackendGuard;
use crate::observability::metrics;
use crate::proxy::ForwardTarget;
use crate::routing::matcher::normalize_host;
use crate::routing::RouteRule;
use crate::security::rate_limit::{QuotaStatus, QuotaTracker};

pub use snapshot::{GatewaySnapshot, SharedSnapshot};
pub use stages::{
    AuthenticationStage, AuthorizationStage, MemberSelectionStage, PathStage, QuotaStage,
    RouteLookupStage,
};

/// Where a request is in its lifecycle. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    RateLimitChecked,
    Authenticated,
    Authorized,
    Routed,
    Forwarded,
    Completed,
    /// Terminal; carries the machine-readable reason.
    Rejected(&'static str),
}

/// Per-request working state shared by the stages.
pub struct RequestContext {
    pub snapshot: Arc<GatewaySnapshot>,
    pub headers: HeaderMap,
    pub method: Method,
    /// Canonical once `PathStage` has run.
    pub path: String,
    /// Normalized Host (lowercase, no port).
    pub host: Option<String>,
    pub peer: Option<SocketAddr>,
    pub now: DateTime<Utc>,
    pub request_id: String,

    pub client: Option<String>,
    pub quota: Option<QuotaStatus>,
    pub route: Option<Arc<RouteRule>>,
    pub identity: Option<ClientIdentity>,
    pub member: Option<BackendGuard>,

    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl RequestContext {
    pub fn new(
        snapshot: Arc<GatewaySnapshot>,
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
        peer: Option<SocketAddr>,
        now: DateTime<Utc>,
    ) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(normalize_host);
        let request_id = headers
            .get(crate::http::request::X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        Self {
            snapshot,
            headers,
            method,
            path: path.into(),
            host,
            peer,
            now,
            request_id,
            client: None,
            quota: None,
            route: None,
            identity: None,
            member: None,
            state: PipelineState::Received,
            transitions: vec![PipelineState::Received],
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Every state this request has been in, in order.
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    fn advance(&mut self, next: PipelineState) {
        self.state = next.clone();
        self.transitions.push(next);
    }
}

/// One synchronous pipeline step.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// State entered when this stage succeeds; `None` for helper stages.
    fn reaches(&self) -> Option<PipelineState>;

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError>;
}

/// The ordered stages plus the state they share across requests.
pub struct GatewayPipeline {
    stages: Vec<Box<dyn Stage>>,
    clock: Arc<dyn Clock>,
}

impl GatewayPipeline {
    pub fn new(tracker: Arc<QuotaTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            stages: vec![
                Box::new(PathStage),
                Box::new(QuotaStage::new(tracker)),
                Box::new(RouteLookupStage),
                Box::new(AuthenticationStage),
                Box::new(AuthorizationStage),
                Box::new(MemberSelectionStage),
            ],
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run the synchronous stages. On success the context is `Routed` and
    /// holds a member guard.
    pub fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        for stage in &self.stages {
            if let Err(e) = stage.evaluate(ctx) {
                tracing::info!(
                    request_id = %ctx.request_id,
                    stage = stage.name(),
                    reason = e.code(),
                    error = %e,
                    "Request rejected"
                );
                metrics::record_rejection(e.code());
                ctx.advance(PipelineState::Rejected(e.code()));
                return Err(e);
            }
            if let Some(next) = stage.reaches() {
                ctx.advance(next);
            }
        }
        Ok(())
    }

    /// Take one request from `Received` to `Completed` or `Rejected`.
    pub async fn handle(
        &self,
        snapshot: Arc<GatewaySnapshot>,
        request: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Response<Body> {
        self.dispatch(snapshot, request, peer).await.0
    }

    /// Like [`handle`](Self::handle), also returning every state the request passed through.
    pub async fn dispatch(
        &self,
        snapshot: Arc<GatewaySnapshot>,
        request: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> (Response<Body>, Vec<PipelineState>) {
        let start = Instant::now();
        let (mut parts, body) = request.into_parts();
        let method_label = parts.method.to_string();

        let mut ctx = RequestContext::new(
            snapshot.clone(),
            parts.method.clone(),
            parts.uri.path(),
            std::mem::take(&mut parts.headers),
            peer,
            self.clock.now(),
        );

        if let Err(e) = self.evaluate(&mut ctx) {
            let route = ctx.route.as_ref().map_or("none", |r| r.id.as_str());
            let response = e.into_response();
            metrics::record_request(&method_label, response.status().as_u16(), route, start);
            return (response, ctx.transitions);
        }

        let (Some(route), Some(member)) = (ctx.route.take(), ctx.member.take()) else {
            let e = GatewayError::Internal("pipeline finished without a member".into());
            ctx.advance(PipelineState::Rejected(e.code()));
            return (e.into_response(), ctx.transitions);
        };
        let quota = ctx.quota.take();
        parts.headers = std::mem::take(&mut ctx.headers);
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        ctx.advance(PipelineState::Forwarded);

        let target = ForwardTarget {
            route: &route,
            path: &ctx.path,
            peer,
            request_id: &ctx.request_id,
            host: host.as_deref(),
        };
        let request = Request::from_parts(parts, body);
        let result = snapshot.forwarder.forward(request, target, member).await;

        let mut response = match result {
            Ok(response) => {
                ctx.advance(PipelineState::Completed);
                response
            }
            Err(e) => {
                metrics::record_rejection(e.code());
                ctx.advance(PipelineState::Rejected(e.code()));
                e.into_response()
            }
        };
        if let Some(status) = quota {
            status.apply_headers(response.headers_mut());
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.id,
            status = %response.status(),
            state = ?ctx.state(),
            elapsed = ?start.elapsed(),
            "Request completed"
        );
        metrics::record_request(&method_label, response.status().as_u16(), &route.id, start);
        (response, ctx.transitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthFailure;
    use crate::clock::ManualClock;
    use crate::config::{ClusterConfig, GatewayConfig, MemberConfig, RateLimitRuleConfig, RouteConfig};
    use crate::load_balancer::HealthState;
    use axum::http::HeaderValue;
    use chrono::TimeZone;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use std::time::Duration;

    const SECRET: &str = "pipeline-secret";

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_800_000_000, 0).unwrap()
    }

    fn config() -> GatewayConfig {
        config_with_catalog("http://127.0.0.1:7101")
    }

    fn config_with_catalog(catalog: &str) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.jwt.secret_key = Some(SECRET.into());
        config.ip_rate_limiting.rules = vec![RateLimitRuleConfig {
            endpoint: "*".into(),
            period: Duration::from_secs(60),
            limit: 3,
        }];
        for (cluster, address) in [("catalog", catalog), ("admin", "http://127.0.0.1:7102")] {
            config.reverse_proxy.clusters.insert(
                cluster.into(),
                ClusterConfig {
                    members: vec![MemberConfig {
                        name: format!("{}-1", cluster),
                        address: address.to_string(),
                        max_connections: 10,
                    }],
                    ..Default::default()
                },
            );
        }
        config.reverse_proxy.routes = vec![
            RouteConfig {
                id: "catalog".into(),
                host: None,
                path: "/api/catalog/{**catch-all}".into(),
                cluster: "catalog".into(),
                authorization_policy: None,
                transforms: Default::default(),
            },
            RouteConfig {
                id: "admin".into(),
                host: None,
                path: "/api/admin/{**catch-all}".into(),
                cluster: "admin".into(),
                authorization_policy: Some("admin".into()),
                transforms: Default::default(),
            },
            RouteConfig {
                id: "api".into(),
                host: None,
                path: "/api/{**catch-all}".into(),
                cluster: "admin".into(),
                authorization_policy: None,
                transforms: Default::default(),
            },
        ];
        config
    }

    fn token(roles: &[&str]) -> String {
        let claims = json!({
            "sub": "user-7",
            "role": roles,
            "iss": "marketplace-identity",
            "aud": "marketplace-clients",
            "exp": now().timestamp() + 600,
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    fn pipeline() -> GatewayPipeline {
        GatewayPipeline::new(Arc::new(QuotaTracker::new()), Arc::new(ManualClock::new(now())))
    }

    fn context(snapshot: &Arc<GatewaySnapshot>, path: &str, headers: &HeaderMap) -> RequestContext {
        RequestContext::new(
            snapshot.clone(),
            Method::GET,
            path,
            headers.clone(),
            Some("198.51.100.1:40000".parse().unwrap()),
            now(),
        )
    }

    fn run(
        pipeline: &GatewayPipeline,
        snapshot: &Arc<GatewaySnapshot>,
        path: &str,
        headers: &HeaderMap,
    ) -> (Result<(), GatewayError>, Vec<PipelineState>) {
        let mut ctx = context(snapshot, path, headers);
        let result = pipeline.evaluate(&mut ctx);
        (result, ctx.transitions().to_vec())
    }

    /// Accepts one connection and answers it with `200 ok`.
    async fn one_shot_backend() -> std::net::SocketAddr {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await;
        });
        addr
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn snapshot() -> Arc<GatewaySnapshot> {
        Arc::new(GatewaySnapshot::build(config(), None).unwrap())
    }

    #[test]
    fn anonymous_route_walks_every_state() {
        let (result, states) = run(&pipeline(), &snapshot(), "/api/catalog/items", &HeaderMap::new());
        assert!(result.is_ok());
        assert_eq!(
            states,
            vec![
                PipelineState::Received,
                PipelineState::RateLimitChecked,
                PipelineState::Authenticated,
                PipelineState::Authorized,
                PipelineState::Routed,
            ]
        );
    }

    #[test]
    fn missing_token_stops_before_routing_even_if_cluster_is_down() {
        let snapshot = snapshot();
        for b in snapshot.clusters.all_backends() {
            b.set_health(HealthState::Unhealthy);
        }
        let (result, states) = run(&pipeline(), &snapshot, "/api/admin/users", &HeaderMap::new());
        assert!(matches!(result, Err(GatewayError::Unauthenticated(AuthFailure::Missing))));
        assert_eq!(states.last(), Some(&PipelineState::Rejected("unauthenticated")));
        assert!(!states.contains(&PipelineState::Routed));
    }

    #[test]
    fn valid_identity_without_role_is_forbidden() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token(&["Buyer"]))).unwrap(),
        );
        let (result, states) = run(&pipeline(), &snapshot(), "/api/admin/users", &headers);
        assert!(matches!(result, Err(GatewayError::Forbidden { .. })));
        assert!(states.contains(&PipelineState::Authenticated));
        assert!(!states.contains(&PipelineState::Authorized));
    }

    #[test]
    fn admin_role_is_routed() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token(&["Admin"]))).unwrap(),
        );
        let (result, _) = run(&pipeline(), &snapshot(), "/api/admin/users", &headers);
        assert!(result.is_ok());
    }

    #[test]
    fn quota_rejects_before_anything_else() {
        let pipeline = pipeline();
        let snapshot = snapshot();
        for _ in 0..3 {
            assert!(run(&pipeline, &snapshot, "/api/catalog/x", &HeaderMap::new()).0.is_ok());
        }
        let (result, states) = run(&pipeline, &snapshot, "/api/admin/x", &HeaderMap::new());
        assert!(matches!(result, Err(GatewayError::RateLimited { limit: 3, .. })));
        assert_eq!(
            states,
            vec![PipelineState::Received, PipelineState::Rejected("rate_limited")]
        );
    }

    #[test]
    fn unknown_path_and_dead_cluster() {
        let snapshot = snapshot();
        let (result, _) = run(&pipeline(), &snapshot, "/nothing", &HeaderMap::new());
        assert!(matches!(result, Err(GatewayError::RouteNotFound { .. })));

        for b in snapshot.clusters.all_backends() {
            b.set_health(HealthState::Unhealthy);
        }
        let (result, _) = run(&pipeline(), &snapshot, "/api/catalog/items", &HeaderMap::new());
        assert!(matches!(result, Err(GatewayError::ClusterUnavailable { .. })));
    }

    #[test]
    fn encoded_and_dotted_paths_cannot_dodge_a_protected_route() {
        let snapshot = snapshot();
        for path in [
            "/api/admin/users",
            "/api/%61dmin/users",
            "/api/x/../admin/users",
            "/api//admin/users",
            "/api/./admin/users",
        ] {
            let pipeline = pipeline();
            let mut ctx = context(&snapshot, path, &HeaderMap::new());
            let result = pipeline.evaluate(&mut ctx);
            assert!(
                matches!(result, Err(GatewayError::Unauthenticated(AuthFailure::Missing))),
                "{} was not challenged",
                path
            );
            assert_eq!(ctx.route.as_ref().map(|r| r.id.as_str()), Some("admin"), "{}", path);
            assert_eq!(ctx.path, "/api/admin/users");
        }
    }

    #[test]
    fn path_climbing_above_root_is_bad_request() {
        let (result, states) = run(&pipeline(), &snapshot(), "/api/../../admin", &HeaderMap::new());
        assert!(matches!(result, Err(GatewayError::BadRequest { .. })));
        assert_eq!(
            states,
            vec![PipelineState::Received, PipelineState::Rejected("bad_request")]
        );
    }

    #[tokio::test]
    async fn forwarded_request_ends_completed() {
        let backend = one_shot_backend().await;
        let snapshot = Arc::new(
            GatewaySnapshot::build(config_with_catalog(&format!("http://{}", backend)), None).unwrap(),
        );

        let (response, states) = pipeline()
            .dispatch(snapshot, get("/api/catalog/items"), Some("198.51.100.1:40000".parse().unwrap()))
            .await;
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(
            states,
            vec![
                PipelineState::Received,
                PipelineState::RateLimitChecked,
                PipelineState::Authenticated,
                PipelineState::Authorized,
                PipelineState::Routed,
                PipelineState::Forwarded,
                PipelineState::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn failed_forward_ends_rejected() {
        let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let mut config = config_with_catalog(&format!("http://{}", dead));
        config.retries.enabled = false;
        let snapshot = Arc::new(GatewaySnapshot::build(config, None).unwrap());

        let (response, states) = pipeline()
            .dispatch(snapshot, get("/api/catalog/items"), Some("198.51.100.1:40000".parse().unwrap()))
            .await;
        assert_eq!(response.status().as_u16(), 502);
        assert_eq!(
            &states[states.len() - 3..],
            &[
                PipelineState::Routed,
                PipelineState::Forwarded,
                PipelineState::Rejected("backend_unavailable"),
            ]
        );
        assert!(!states.contains(&PipelineState::Completed));
    }
}
