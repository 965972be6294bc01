//! Daemon API models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness response for `GET /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error body returned for every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable error kind
    pub error: String,
    pub message: String,
}

/// How the project is turned into running containers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    /// docker-compose file in the repository
    #[default]
    Compose,
    /// Heroku-style buildpack detection
    Buildpack,
    /// Plain Dockerfile
    Dockerfile,
}

impl BuildProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildProfile::Compose => "compose",
            BuildProfile::Buildpack => "buildpack",
            BuildProfile::Dockerfile => "dockerfile",
        }
    }
}

/// Project identity supplied on the first deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub name: String,
    pub remote: String,
    pub branch: String,
    #[serde(default)]
    pub profile: BuildProfile,
    /// Compose file or Dockerfile, relative to the repository root
    #[serde(default)]
    pub build_file: Option<String>,
}

/// Body of `POST /up`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpRequest {
    #[serde(default)]
    pub project: Option<ProjectSpec>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub profile: Option<BuildProfile>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Result of a completed operation when output is not streamed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

/// One container belonging to the deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Engine state, e.g. `running` or `exited`
    pub state: String,
    /// Human readable engine status, e.g. `Up 3 minutes`
    pub status: String,
}

/// Response of `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub daemon_version: String,
    pub project: String,
    pub state: String,
    pub branch: String,
    pub commit: Option<String>,
    pub profile: BuildProfile,
    pub containers: Vec<ContainerSummary>,
    pub uptime_secs: Option<i64>,
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /env`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvRequest {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub remove: bool,
}

/// A deployment environment variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Response of `GET /env`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvResponse {
    pub variables: Vec<EnvVar>,
}

/// Body of `POST /user/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response of `POST /user/login`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Body of `POST /user/adduser`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub admin: bool,
}

/// Body of `POST /user/removeuser`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveUserRequest {
    pub username: String,
}

/// Body of `POST /user/passwd`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

/// Identity attached to an authenticated request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub username: String,
    pub admin: bool,
}

/// A registered user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub username: String,
    pub admin: bool,
    pub disabled: bool,
}

/// Response of `GET /user/listusers`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserListResponse {
    pub users: Vec<UserSummary>,
}

/// Acknowledgement of a webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookResponse {
    /// Whether a redeploy was queued
    pub queued: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}
