//! Signed bearer tokens
//!
//! Session tokens are stateless: validity is signature plus expiry, and there
//! is no server-side revocation list. A token stays usable until `exp` even if
//! its user is disabled in the meantime. Admin API tokens carry a far-future
//! expiry and are additionally checked against the credential store by the
//! gateway.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authn::signing_key::SigningKey;
use crate::authn::{Identity, Role, ADMIN_SUBJECT};

/// Lifetime of admin API tokens
const API_TOKEN_TTL_DAYS: i64 = 365 * 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("token expired")]
    Expired,

    #[error("signing key unavailable: {0}")]
    KeyUnavailable(String),
}

/// What a token grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    /// Short-lived token issued at login
    Session,
    /// Long-lived admin token minted on the host
    Api,
}

/// Token claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub kind: TokenKind,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub.clone(), self.role)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}

/// A freshly signed token with its claims
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: Claims,
}

/// Issues and validates tokens with the daemon's signing key
pub struct TokenService {
    key: SigningKey,
    session_ttl: Duration,
}

impl TokenService {
    pub fn new(key: SigningKey, session_ttl: Duration) -> Self {
        Self { key, session_ttl }
    }

    /// Issue a session token for a logged-in user
    pub fn issue_session(&self, identity: &Identity) -> Result<IssuedToken, TokenError> {
        let now = Utc::now().timestamp();
        self.issue_at(identity, TokenKind::Session, now, now + self.session_ttl.num_seconds())
    }

    /// Issue an admin API token
    pub fn issue_api_token(&self) -> Result<IssuedToken, TokenError> {
        let now = Utc::now().timestamp();
        let identity = Identity::new(ADMIN_SUBJECT, Role::Admin);
        let exp = now + Duration::days(API_TOKEN_TTL_DAYS).num_seconds();
        self.issue_at(&identity, TokenKind::Api, now, exp)
    }

    /// Issue a token with explicit timestamps
    pub fn issue_at(
        &self,
        identity: &Identity,
        kind: TokenKind,
        iat: i64,
        exp: i64,
    ) -> Result<IssuedToken, TokenError> {
        if self.key.expose().is_empty() {
            return Err(TokenError::KeyUnavailable("empty signing key".to_string()));
        }

        let claims = Claims {
            sub: identity.subject.clone(),
            role: identity.role,
            kind,
            jti: uuid::Uuid::new_v4().to_string(),
            iat,
            exp,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.key.expose()),
        )
        .map_err(|e| TokenError::KeyUnavailable(e.to_string()))?;

        Ok(IssuedToken { token, claims })
    }

    /// Validate a token against the current time
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, Utc::now().timestamp())
    }

    /// Validate a token as of `now` (unix seconds).
    ///
    /// The signature is checked before expiry, so a forged token is always
    /// `InvalidSignature` and a genuine stale one is always `Expired`.
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.required_spec_claims = HashSet::from(["exp".to_string(), "sub".to_string()]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.key.expose()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidSignature => TokenError::InvalidSignature,
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Malformed,
        })?;

        if now > data.claims.exp {
            return Err(TokenError::Expired);
        }
        Ok(data.claims)
    }
}
