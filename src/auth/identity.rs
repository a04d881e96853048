//! Validated caller identity.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Who is calling, as proven by a validated bearer token.
///
/// Only the token validator constructs this; it is never mutated afterwards
/// and lives no longer than the request that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientIdentity {
    subject: String,
    roles: Vec<String>,
    issuer: String,
    audience: Vec<String>,
    expires_at: DateTime<Utc>,
}

impl ClientIdentity {
    pub(crate) fn new(
        subject: String,
        roles: Vec<String>,
        issuer: String,
        audience: Vec<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject,
            roles,
            issuer,
            audience,
            expires_at,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &[String] {
        &self.audience
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}
