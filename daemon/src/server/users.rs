//! User management routes

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::info;

use deployd_api::models::{
    AddUserRequest, ChangePasswordRequest, IdentityResponse, LoginRequest, LoginResponse,
    RemoveUserRequest, UserListResponse, UserSummary,
};

use crate::authn::{Identity, Role};
use crate::server::error::ApiError;
use crate::server::state::ServerState;

pub async fn login_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state.users.verify(&request.username, &request.password).await?;
    let issued = state
        .tokens
        .issue_session(&Identity::new(user.username.clone(), user.role))?;

    info!(username = %user.username, "session issued");
    Ok(Json(LoginResponse {
        expires_at: issued.claims.expires_at(),
        token: issued.token,
    }))
}

/// Session tokens are stateless; the client discards its token
pub async fn logout_handler(Extension(identity): Extension<Identity>) -> StatusCode {
    info!(username = %identity.subject, "logged out");
    StatusCode::NO_CONTENT
}

pub async fn validate_handler(Extension(identity): Extension<Identity>) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        admin: identity.is_admin(),
        username: identity.subject,
    })
}

pub async fn passwd_handler(
    State(state): State<Arc<ServerState>>,
    Extension(identity): Extension<Identity>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .users
        .change_password(&identity.subject, &request.old_password, &request.new_password)
        .await?;
    info!(username = %identity.subject, "password changed");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_user_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<AddUserRequest>,
) -> Result<StatusCode, ApiError> {
    let role = if request.admin { Role::Admin } else { Role::User };
    state
        .users
        .add_user(&request.username, &request.password, role)
        .await?;
    Ok(StatusCode::CREATED)
}

pub async fn remove_user_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RemoveUserRequest>,
) -> Result<StatusCode, ApiError> {
    state.users.disable_user(&request.username).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_users_handler(State(state): State<Arc<ServerState>>) -> Json<UserListResponse> {
    let users = state
        .users
        .list()
        .await
        .into_iter()
        .map(|u| UserSummary {
            admin: u.role == Role::Admin,
            username: u.username,
            disabled: u.disabled,
        })
        .collect();
    Json(UserListResponse { users })
}

pub async fn reset_users_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<StatusCode, ApiError> {
    state.users.reset().await?;
    Ok(StatusCode::NO_CONTENT)
}
