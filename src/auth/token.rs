//! Bearer token validation.
//!
//! # Validation order
//! 1. Structure: three base64url segments, JSON header with a known `alg`,
//!    JSON claims carrying `sub` and `exp`. Failing here is `Malformed` and no
//!    cryptography runs.
//! 2. Signature against the configured key; the header `alg` must be the
//!    configured algorithm.
//! 3. Issuer, then audience, then expiry.
//!
//! Expiry has zero leeway: a token is rejected from its `exp` instant on.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::identity::ClientIdentity;
use crate::config::{ConfigError, JwtConfig};

/// Why a bearer token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    SignatureInvalid,
    #[error("token has expired")]
    Expired,
    #[error("token issuer is not trusted")]
    IssuerMismatch,
    #[error("token audience is not accepted")]
    AudienceMismatch,
}

impl TokenError {
    pub fn code(&self) -> &'static str {
        match self {
            TokenError::Malformed => "malformed",
            TokenError::SignatureInvalid => "signature_invalid",
            TokenError::Expired => "expired",
            TokenError::IssuerMismatch => "issuer_mismatch",
            TokenError::AudienceMismatch => "audience_mismatch",
        }
    }
}

/// A claim that may be a single string or an array of strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(
        default,
        alias = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier"
    )]
    sub: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    aud: Option<OneOrMany>,
    #[serde(default)]
    exp: Option<i64>,
    #[serde(
        default,
        alias = "roles",
        alias = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role"
    )]
    role: Option<OneOrMany>,
}

/// Checks bearer tokens against one key, issuer and audience.
pub struct TokenValidator {
    key: DecodingKey,
    algorithm: Algorithm,
    validation: Validation,
    issuer: String,
    audience: String,
}

impl TokenValidator {
    /// Build from configuration, loading key material.
    pub fn new(config: &JwtConfig) -> Result<Self, ConfigError> {
        let algorithm: Algorithm = config
            .algorithm
            .parse()
            .map_err(|_| ConfigError::KeyMaterial(format!("unsupported algorithm '{}'", config.algorithm)))?;

        let key = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = config
                    .secret_key
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ConfigError::KeyMaterial("jwt.secret_key is not set".into()))?;
                DecodingKey::from_secret(secret.as_bytes())
            }
            _ => {
                let path = config
                    .public_key_path
                    .as_deref()
                    .ok_or_else(|| ConfigError::KeyMaterial("jwt.public_key_path is not set".into()))?;
                let pem = std::fs::read(path)?;
                let parsed = match algorithm {
                    Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(&pem),
                    Algorithm::EdDSA => DecodingKey::from_ed_pem(&pem),
                    _ => DecodingKey::from_rsa_pem(&pem),
                };
                parsed.map_err(|e| ConfigError::KeyMaterial(format!("{}: {}", path, e)))?
            }
        };

        Ok(Self::with_key(key, algorithm, &config.issuer, &config.audience))
    }

    /// HS256 validator from a raw secret.
    pub fn from_secret(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256, issuer, audience)
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm, issuer: &str, audience: &str) -> Self {
        // Only the signature is left to jsonwebtoken; claims are checked below
        // against an injected clock.
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            key,
            algorithm,
            validation,
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    /// Validate `token` as of `now`.
    pub fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<ClientIdentity, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
            return Err(TokenError::Malformed);
        }
        let header = jsonwebtoken::decode_header(token).map_err(|_| TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(segments[1])
            .map_err(|_| TokenError::Malformed)?;
        let claims: RawClaims = serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        let subject = claims.sub.ok_or(TokenError::Malformed)?;
        let exp = claims.exp.ok_or(TokenError::Malformed)?;
        let expires_at = DateTime::<Utc>::from_timestamp(exp, 0).ok_or(TokenError::Malformed)?;

        if header.alg != self.algorithm {
            return Err(TokenError::SignatureInvalid);
        }
        jsonwebtoken::decode::<serde::de::IgnoredAny>(token, &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                    TokenError::Malformed
                }
                _ => TokenError::SignatureInvalid,
            },
        )?;

        let issuer = claims.iss.unwrap_or_default();
        if issuer != self.issuer {
            return Err(TokenError::IssuerMismatch);
        }

        let audience = claims.aud.map(OneOrMany::into_vec).unwrap_or_default();
        if !audience.iter().any(|a| *a == self.audience) {
            return Err(TokenError::AudienceMismatch);
        }

        if now >= expires_at {
            return Err(TokenError::Expired);
        }

        let roles = claims.role.map(OneOrMany::into_vec).unwrap_or_default();
        Ok(ClientIdentity::new(subject, roles, issuer, audience, expires_at))
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish_non_exhaustive()
    }
}

/// Pull the bearer token out of the Authorization header.
///
/// `Ok(None)` when no header is present. A header with another scheme or an
/// empty token is `Malformed`.
pub fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, TokenError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value.to_str().map_err(|_| TokenError::Malformed)?.trim();
    let (scheme, token) = value.split_once(' ').ok_or(TokenError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(TokenError::Malformed);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(TokenError::Malformed);
    }
    Ok(Some(token))
}
