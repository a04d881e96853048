//! The synchronous stages of the gateway pipeline, in execution order.

use std::sync::Arc;

use crate::auth::{bearer_token, AuthFailure};
use crate::error::GatewayError;
use crate::observability::metrics;
use crate::pipeline::{PipelineState, RequestContext, Stage};
use crate::routing::matcher::canonicalize_path;
use crate::security::rate_limit::{QuotaDecision, QuotaTracker};

/// Rewrites the request path into canonical form. Quota rules, route
/// lookup and the forwarded URI all see the rewritten path, so an encoded
/// or dotted spelling cannot select a different route than the member
/// eventually serves.
#[derive(Debug, Default)]
pub struct PathStage;

impl Stage for PathStage {
    fn name(&self) -> &'static str {
        "path"
    }

    fn reaches(&self) -> Option<PipelineState> {
        None
    }

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let canonical =
            canonicalize_path(&ctx.path).map_err(|message| GatewayError::BadRequest { message })?;
        if canonical != ctx.path {
            tracing::debug!(raw = %ctx.path, path = %canonical, "Path canonicalized");
            ctx.path = canonical;
        }
        Ok(())
    }
}

/// Per-client fixed-window quotas. Runs before anything else looks at the
/// request, so a limited client costs no token validation or routing.
#[derive(Debug)]
pub struct QuotaStage {
    tracker: Arc<QuotaTracker>,
}

impl QuotaStage {
    pub fn new(tracker: Arc<QuotaTracker>) -> Self {
        Self { tracker }
    }
}

impl Stage for QuotaStage {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn reaches(&self) -> Option<PipelineState> {
        Some(PipelineState::RateLimitChecked)
    }

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let limits = &ctx.snapshot.rate_limits;
        let client = limits.client_key(&ctx.headers, ctx.peer);
        let rules = limits.applicable_rules(&client, &ctx.method, &ctx.path);

        let decision = self.tracker.check(&client, &rules, ctx.now);
        ctx.client = Some(client);
        match decision {
            QuotaDecision::Allowed(status) => {
                ctx.quota = status;
                Ok(())
            }
            QuotaDecision::Limited {
                rule,
                limit,
                retry_after,
            } => {
                metrics::record_rate_limited(&rule);
                let mut secs = retry_after.as_secs();
                if retry_after.subsec_nanos() > 0 || secs == 0 {
                    secs += 1;
                }
                Err(GatewayError::RateLimited {
                    limit,
                    retry_after_secs: secs,
                })
            }
        }
    }
}

/// Finds the winning route. A miss is recorded, not raised: it surfaces
/// when the request reaches member selection, so authentication outcomes
/// never depend on whether a path happens to exist.
#[derive(Debug, Default)]
pub struct RouteLookupStage;

impl Stage for RouteLookupStage {
    fn name(&self) -> &'static str {
        "route_lookup"
    }

    fn reaches(&self) -> Option<PipelineState> {
        None
    }

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        ctx.route = ctx
            .snapshot
            .routes
            .lookup(ctx.host.as_deref(), &ctx.path)
            .ok();
        Ok(())
    }
}

/// Validates the bearer token when the matched route requires it.
#[derive(Debug, Default)]
pub struct AuthenticationStage;

impl Stage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn reaches(&self) -> Option<PipelineState> {
        Some(PipelineState::Authenticated)
    }

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let required = ctx.route.as_ref().is_some_and(|r| r.requires_authentication());
        if !required {
            return Ok(());
        }

        let token = bearer_token(&ctx.headers)
            .map_err(|e| GatewayError::Unauthenticated(AuthFailure::Token(e)))?
            .ok_or(GatewayError::Unauthenticated(AuthFailure::Missing))?;
        let identity = ctx
            .snapshot
            .validator
            .validate(token, ctx.now)
            .map_err(|e| GatewayError::Unauthenticated(AuthFailure::Token(e)))?;

        tracing::debug!(subject = %identity.subject(), roles = ?identity.roles(), "Caller authenticated");
        ctx.identity = Some(identity);
        Ok(())
    }
}

/// Checks the identity against the route's policy.
#[derive(Debug, Default)]
pub struct AuthorizationStage;

impl Stage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    fn reaches(&self) -> Option<PipelineState> {
        Some(PipelineState::Authorized)
    }

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let Some(policy) = ctx.route.as_ref().and_then(|r| r.policy.as_deref()) else {
            return Ok(());
        };
        match &ctx.identity {
            Some(identity) => ctx.snapshot.policies.authorize(policy, identity),
            // Authentication guarantees an identity whenever a policy is set.
            None => Err(GatewayError::Unauthenticated(AuthFailure::Missing)),
        }
    }
}

/// Resolves the route's cluster to one healthy member.
#[derive(Debug, Default)]
pub struct MemberSelectionStage;

impl Stage for MemberSelectionStage {
    fn name(&self) -> &'static str {
        "member_selection"
    }

    fn reaches(&self) -> Option<PipelineState> {
        Some(PipelineState::Routed)
    }

    fn evaluate(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route.clone().ok_or_else(|| GatewayError::RouteNotFound {
            path: ctx.path.clone(),
        })?;
        let member = ctx.snapshot.clusters.select(&route.cluster)?;
        tracing::debug!(route = %route.id, member = %member.id(), "Member selected");
        ctx.member = Some(member);
        Ok(())
    }
}
