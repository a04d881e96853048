//! Authentication and authorization subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization: Bearer <token>
//!     → token.rs (structure → signature → issuer → audience → expiry)
//!     → identity.rs (immutable ClientIdentity for this request only)
//!     → policy.rs (role set intersection → Allow / Deny)
//! ```
//!
//! # Design Decisions
//! - Validation is a pure function of token, key material and "now"
//! - 401 (no valid identity) and 403 (identity lacks a role) never blur
//! - Unknown policy names deny

pub mod identity;
pub mod policy;
pub mod token;

pub use identity::ClientIdentity;
pub use policy::{AuthorizationPolicy, Decision, PolicySet, AUTHENTICATED_POLICY};
pub use token::{bearer_token, TokenError, TokenValidator};

use thiserror::Error;

/// Why a request that needed an identity has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no bearer credential presented")]
    Missing,
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "missing_credential",
            AuthFailure::Token(e) => e.code(),
        }
    }
}
