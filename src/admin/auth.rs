use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::{bearer_token, AuthFailure};
use crate::error::GatewayError;
use crate::http::server::AppState;

/// Admin callers present a bearer token that satisfies `admin.policy`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let snapshot = state.snapshot.load_full();
    let now = state.pipeline.clock().now();

    let token = match bearer_token(request.headers()) {
        Ok(Some(token)) => token,
        Ok(None) => return GatewayError::Unauthenticated(AuthFailure::Missing).into_response(),
        Err(e) => return GatewayError::Unauthenticated(AuthFailure::Token(e)).into_response(),
    };
    let identity = match snapshot.validator.validate(token, now) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(reason = e.code(), "Admin request with invalid token");
            return GatewayError::Unauthenticated(AuthFailure::Token(e)).into_response();
        }
    };
    if let Err(e) = snapshot
        .policies
        .authorize(&snapshot.config.admin.policy, &identity)
    {
        tracing::warn!(subject = %identity.subject(), "Admin request denied");
        return e.into_response();
    }

    next.run(request).await
}
