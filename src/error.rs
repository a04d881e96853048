//! Per-request error taxonomy and its HTTP mapping.
//!
//! Every way a request can be turned away by the gateway is a
//! [`GatewayError`] variant. Each variant has a fixed status code and a
//! machine-readable `error` code in the JSON body, so callers never have to
//! parse free text.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthFailure;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("malformed request: {message}")]
    BadRequest { message: String },

    #[error("rate limit of {limit} requests exceeded, retry in {retry_after_secs}s")]
    RateLimited { limit: u32, retry_after_secs: u64 },

    #[error("authentication required: {0}")]
    Unauthenticated(AuthFailure),

    #[error("identity does not satisfy policy '{policy}'")]
    Forbidden { policy: String },

    #[error("no route matches {path}")]
    RouteNotFound { path: String },

    #[error("no healthy member available in cluster '{cluster}'")]
    ClusterUnavailable { cluster: String },

    #[error("backend {member} unavailable: {message}")]
    BackendUnavailable { member: String, message: String },

    #[error("backend {member} did not respond within {timeout_ms}ms")]
    BackendTimeout { member: String, timeout_ms: u64 },

    #[error("invalid configuration: {0}")]
    ConfigurationInvalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::ClusterUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::BackendUnavailable { .. } => StatusCode::BAD_GATEWAY,
            GatewayError::BackendTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ConfigurationInvalid(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable reason, also used as a metrics label.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::BadRequest { .. } => "bad_request",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::RouteNotFound { .. } => "route_not_found",
            GatewayError::ClusterUnavailable { .. } => "cluster_unavailable",
            GatewayError::BackendUnavailable { .. } => "backend_unavailable",
            GatewayError::BackendTimeout { .. } => "backend_timeout",
            GatewayError::ConfigurationInvalid(_) => "configuration_invalid",
            GatewayError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let GatewayError::Unauthenticated(failure) = &self {
            body["reason"] = json!(failure.code());
        }

        let mut response = (status, Json(body)).into_response();
        let headers = response.headers_mut();
        match &self {
            GatewayError::RateLimited {
                retry_after_secs, ..
            } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            GatewayError::Unauthenticated(failure) => {
                let challenge = match failure {
                    AuthFailure::Missing => "Bearer".to_string(),
                    AuthFailure::Token(e) => format!(
                        "Bearer error=\"invalid_token\", error_description=\"{}\"",
                        e
                    ),
                };
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    headers.insert(header::WWW_AUTHENTICATE, value);
                }
            }
            _ => {}
        }
        response
    }
}
