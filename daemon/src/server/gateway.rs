//! Permission-tiered authentication for every route

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use crate::authn::token::{TokenError, TokenKind, TokenService};
use crate::authn::users::CredentialStore;
use crate::authn::Identity;
use crate::server::error::ApiError;

/// Authorization level a route requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Public,
    User,
    Admin,
}

/// Tier of a request path. Paths not listed here are admin only.
pub fn classify(path: &str) -> Tier {
    match path {
        "/" | "/webhook" | "/user/login" => Tier::Public,
        "/status" | "/logs" | "/user/logout" | "/user/validate" | "/user/passwd" => Tier::User,
        _ => Tier::Admin,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingCredentials,

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("session expired, log in again")]
    ExpiredSession,

    #[error("admin role required")]
    Forbidden,
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::ExpiredSession,
            other => AuthError::InvalidCredentials(other.to_string()),
        }
    }
}

/// Checks bearer tokens against the tier a route requires
pub struct Gateway {
    tokens: Arc<TokenService>,
    users: Arc<CredentialStore>,
}

impl Gateway {
    pub fn new(tokens: Arc<TokenService>, users: Arc<CredentialStore>) -> Self {
        Self { tokens, users }
    }

    /// Identity of the caller, `None` for public routes
    pub async fn authenticate(
        &self,
        headers: &HeaderMap,
        tier: Tier,
    ) -> Result<Option<Identity>, AuthError> {
        if tier == Tier::Public {
            return Ok(None);
        }

        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(AuthError::MissingCredentials)?;
        let token = value
            .to_str()
            .ok()
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::InvalidCredentials("expected a bearer token".to_string()))?;

        let claims = self.tokens.validate(token)?;
        if claims.kind == TokenKind::Api && !self.users.has_api_token(&claims.jti).await {
            return Err(AuthError::InvalidCredentials("unknown API token".to_string()));
        }

        let identity = claims.identity();
        if tier == Tier::Admin && !identity.is_admin() {
            return Err(AuthError::Forbidden);
        }
        Ok(Some(identity))
    }
}

/// Middleware: classify, authenticate, then hand over to the route.
///
/// The identity is placed in the request extensions for handlers.
pub async fn authorize(
    State(gateway): State<Arc<Gateway>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let route = request.uri().path().to_string();
    let tier = classify(&route);

    match gateway.authenticate(request.headers(), tier).await {
        Ok(Some(identity)) => {
            debug!(route = %route, subject = %identity.subject, "authenticated");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(e) => {
            let remote = request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            warn!(route = %route, remote = %remote, ?tier, error = %e, "authentication failed");
            ApiError::from(e).into_response()
        }
    }
}
