//! Request forwarding to a selected member.
//!
//! # Responsibilities
//! - Build the upstream request (URI, headers, transform)
//! - Enforce the connect and response-head deadlines
//! - Relay the response body as a stream with an idle deadline
//! - Report outcomes to passive health checking
//!
//! # Design Decisions
//! - Bodies are never buffered in either direction
//! - The in-flight slot on the member is held until the response body ends
//! - A failed attempt is never moved to another member

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, Uri, Version};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tower_http::timeout::TimeoutBody;

use crate::config::{HealthCheckConfig, RetryConfig, TimeoutConfig};
use crate::error::GatewayError;
use crate::health::{observe_outcome, ForwardOutcome};
use crate::http::request::X_REQUEST_ID;
use crate::load_balancer::BackendGuard;
use crate::resilience::backoff::retry_delay;
use crate::resilience::retries::{is_retryable, RetryBudget};
use crate::routing::RouteRule;
use crate::security::headers::{add_forwarded_headers, strip_hop_by_hop};

/// Everything about the inbound request the forwarder needs besides the request itself.
#[derive(Debug, Clone, Copy)]
pub struct ForwardTarget<'a> {
    pub route: &'a RouteRule,
    /// Canonical request path; replaces the path of the inbound URI.
    pub path: &'a str,
    pub peer: Option<SocketAddr>,
    pub request_id: &'a str,
    /// Host as sent by the client, for X-Forwarded-Host.
    pub host: Option<&'a str>,
}

/// Streams requests to members with per-step deadlines.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    timeouts: TimeoutConfig,
    retries: RetryConfig,
    health: HealthCheckConfig,
    budget: Arc<RetryBudget>,
}

impl Forwarder {
    pub fn new(timeouts: &TimeoutConfig, retries: &RetryConfig, health: &HealthCheckConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeouts.connect));
        connector.set_nodelay(true);
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(connector);

        Self {
            client,
            timeouts: timeouts.clone(),
            retries: retries.clone(),
            health: health.clone(),
            budget: Arc::new(RetryBudget::new(retries.budget_ratio, 10)),
        }
    }

    /// Forward `request` to the member held by `member` and relay its response.
    pub async fn forward(
        &self,
        request: Request<Body>,
        target: ForwardTarget<'_>,
        member: BackendGuard,
    ) -> Result<Response<Body>, GatewayError> {
        let (parts, body) = request.into_parts();
        let uri = upstream_uri(&member.authority, target.route, target.path, parts.uri.query())?;
        let headers = upstream_headers(&parts.headers, target);
        let has_body = has_body(&parts.headers);
        let max_attempts = if self.retries.enabled {
            self.retries.max_attempts.max(1)
        } else {
            1
        };

        self.budget.record_request();
        let mut body = Some(body);
        let mut attempt = 1;

        loop {
            let mut builder = Request::builder()
                .method(parts.method.clone())
                .uri(uri.clone())
                .version(Version::HTTP_11);
            if let Some(h) = builder.headers_mut() {
                h.extend(headers.clone());
            }
            let upstream = builder
                .body(body.take().unwrap_or_else(Body::empty))
                .map_err(|e| GatewayError::Internal(format!("building upstream request: {}", e)))?;

            tracing::debug!(
                request_id = %target.request_id,
                route = %target.route.id,
                member = %member.id(),
                uri = %uri,
                attempt,
                "Forwarding request"
            );

            let (outcome, error) =
                match tokio::time::timeout(self.timeouts.response, self.client.request(upstream)).await {
                    Ok(Ok(response)) => {
                        observe_outcome(&member, ForwardOutcome::Response(response.status()), &self.health);
                        return Ok(relay_response(response, member, self.timeouts.stream_idle));
                    }
                    Ok(Err(e)) => {
                        let outcome = if e.is_connect() {
                            ForwardOutcome::ConnectFailed
                        } else {
                            ForwardOutcome::Failed
                        };
                        let message = match std::error::Error::source(&e) {
                            Some(source) => format!("{}: {}", e, source),
                            None => e.to_string(),
                        };
                        (
                            outcome,
                            GatewayError::BackendUnavailable {
                                member: member.id(),
                                message,
                            },
                        )
                    }
                    Err(_) => (
                        ForwardOutcome::TimedOut,
                        GatewayError::BackendTimeout {
                            member: member.id(),
                            timeout_ms: u64::try_from(self.timeouts.response.as_millis()).unwrap_or(u64::MAX),
                        },
                    ),
                };

            observe_outcome(&member, outcome, &self.health);

            if attempt < max_attempts
                && is_retryable(&parts.method, has_body, outcome)
                && self.budget.can_retry()
            {
                let delay = retry_delay(attempt, &self.retries);
                tracing::info!(
                    request_id = %target.request_id,
                    member = %member.id(),
                    attempt,
                    delay = ?delay,
                    "Retrying same member after connect failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            tracing::warn!(
                request_id = %target.request_id,
                member = %member.id(),
                error = %error,
                "Upstream request failed"
            );
            return Err(error);
        }
    }
}

/// `http://<authority><rewritten path>?<query>`.
pub fn upstream_uri(
    authority: &str,
    route: &RouteRule,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, GatewayError> {
    let path = route.transform.rewrite_path(path);
    let path_and_query = match query {
        Some(q) => format!("{}?{}", path, q),
        None => path,
    };
    Uri::builder()
        .scheme("http")
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::Internal(format!("building upstream uri: {}", e)))
}

/// Headers for the upstream request: inbound minus hop-by-hop and Host,
/// plus forwarding headers, the request id and the route's header transform.
pub fn upstream_headers(inbound: &HeaderMap, target: ForwardTarget<'_>) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    add_forwarded_headers(&mut headers, target.peer, target.host);
    if let Ok(id) = HeaderValue::from_str(target.request_id) {
        headers.insert(X_REQUEST_ID, id);
    }
    for (name, value) in target.route.transform.request_headers() {
        headers.insert(name.clone(), value.clone());
    }
    headers
}

fn has_body(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return true;
    }
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .is_some_and(|len| len > 0)
}

/// Stream the member's response back, holding `member` until the body ends.
fn relay_response(
    response: Response<hyper::body::Incoming>,
    member: BackendGuard,
    stream_idle: Duration,
) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let member_id = member.id();
    let stream = Body::new(TimeoutBody::new(stream_idle, body))
        .into_data_stream()
        .map(move |chunk| {
            let _held = &member;
            if let Err(e) = &chunk {
                tracing::warn!(member = %member_id, error = %e, "Response stream aborted");
            }
            chunk
        });

    Response::from_parts(parts, Body::from_stream(stream))
}
