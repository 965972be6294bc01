//! Error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::error;

use deployd_api::models::ErrorResponse;

use crate::authn::token::TokenError;
use crate::authn::users::CredentialError;
use crate::deploy::deployer::DeployError;
use crate::server::gateway::AuthError;
use crate::server::webhook::WebhookError;

/// An error returned to the client as `{ "error": kind, "message": text }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// Log the detail, return a generic message
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        error!(error = %detail, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.kind.to_string(),
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let (status, kind) = match &err {
            AuthError::MissingCredentials => (StatusCode::UNAUTHORIZED, "missing_credentials"),
            AuthError::InvalidCredentials(_) => (StatusCode::BAD_REQUEST, "invalid_credentials"),
            AuthError::ExpiredSession => (StatusCode::UNAUTHORIZED, "expired_session"),
            AuthError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::KeyUnavailable(_) => Self::internal(err),
            other => AuthError::from(other).into(),
        }
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        let (status, kind) = match &err {
            DeployError::Busy => (StatusCode::CONFLICT, "deployment_busy"),
            DeployError::NoDeployment => (StatusCode::PRECONDITION_FAILED, "no_deployment"),
            DeployError::InvalidState(_) => (StatusCode::CONFLICT, "invalid_state"),
            DeployError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            DeployError::RemoteMismatch(_) => (StatusCode::BAD_REQUEST, "remote_mismatch"),
            DeployError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "engine_failure"),
            DeployError::Source(_) => (StatusCode::INTERNAL_SERVER_ERROR, "source_failure"),
            DeployError::Storage(_) => return Self::internal(&err),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        let (status, kind) = match &err {
            CredentialError::UserExists(_) => (StatusCode::CONFLICT, "user_exists"),
            CredentialError::UnknownUser(_) => (StatusCode::NOT_FOUND, "unknown_user"),
            CredentialError::InvalidLogin => (StatusCode::UNAUTHORIZED, "invalid_login"),
            CredentialError::Invalid(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            CredentialError::Storage(_) => return Self::internal(&err),
        };
        Self::new(status, kind, err.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        let (status, kind) = match &err {
            WebhookError::InvalidSignature(_) => (StatusCode::UNAUTHORIZED, "invalid_signature"),
            WebhookError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            WebhookError::QueueFull => (StatusCode::CONFLICT, "deployment_busy"),
        };
        Self::new(status, kind, err.to_string())
    }
}
