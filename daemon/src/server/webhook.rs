//! Push notifications from GitHub and GitLab

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};

use deployd_api::models::WebhookResponse;

use crate::authn::external_key::ExternalKey;
use crate::deploy::deployer::DeployError;
use crate::server::error::ApiError;
use crate::server::state::ServerState;
use crate::utils::constant_time_eq;
use crate::workers::redeploy::RedeployJob;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("redeploy queue is full")]
    QueueFull,
}

/// Who sent the delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    GitHub,
    GitLab,
}

/// A delivery after signature checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub provider: Provider,
    /// Provider event name, e.g. `push` or `Push Hook`
    pub event: String,
}

impl WebhookEvent {
    fn is_push(&self) -> bool {
        match self.provider {
            Provider::GitHub => self.event == "push",
            Provider::GitLab => self.event == "Push Hook",
        }
    }

    fn is_ping(&self) -> bool {
        self.provider == Provider::GitHub && self.event == "ping"
    }
}

#[derive(Debug, Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    checkout_sha: Option<String>,
    #[serde(default)]
    deleted: bool,
    repository: RepositoryPayload,
}

#[derive(Debug, Default, Deserialize)]
struct RepositoryPayload {
    // GitHub
    clone_url: Option<String>,
    ssh_url: Option<String>,
    git_url: Option<String>,
    html_url: Option<String>,
    // GitLab
    git_http_url: Option<String>,
    git_ssh_url: Option<String>,
    homepage: Option<String>,
}

impl RepositoryPayload {
    fn urls(&self) -> Vec<&str> {
        [
            &self.clone_url,
            &self.ssh_url,
            &self.git_url,
            &self.html_url,
            &self.git_http_url,
            &self.git_ssh_url,
            &self.homepage,
        ]
        .into_iter()
        .filter_map(|u| u.as_deref())
        .collect()
    }
}

/// `refs/heads/main` is branch `main`; tags and other refs have no branch
pub fn branch_from_ref(git_ref: &str) -> Option<&str> {
    git_ref.strip_prefix("refs/heads/").filter(|b| !b.is_empty())
}

/// Identify the provider and check the delivery against the webhook key
pub fn verify(
    headers: &HeaderMap,
    body: &[u8],
    key: Option<&ExternalKey>,
) -> Result<WebhookEvent, WebhookError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let (provider, event) = if let Some(event) = header("x-github-event") {
        (Provider::GitHub, event)
    } else if let Some(event) = header("x-gitlab-event") {
        (Provider::GitLab, event)
    } else {
        return Err(WebhookError::InvalidPayload("unknown webhook provider".to_string()));
    };

    let key = key.ok_or_else(|| {
        WebhookError::InvalidSignature("no webhook key configured".to_string())
    })?;

    match provider {
        Provider::GitHub => {
            let signature = header("x-hub-signature-256")
                .and_then(|s| s.strip_prefix("sha256="))
                .ok_or_else(|| WebhookError::InvalidSignature("missing signature".to_string()))?;
            let expected = hex::decode(signature)
                .map_err(|_| WebhookError::InvalidSignature("signature is not hex".to_string()))?;
            let mut mac = HmacSha256::new_from_slice(key.material())
                .map_err(|_| WebhookError::InvalidSignature("unusable webhook key".to_string()))?;
            mac.update(body);
            mac.verify_slice(&expected)
                .map_err(|_| WebhookError::InvalidSignature("signature mismatch".to_string()))?;
        }
        Provider::GitLab => {
            let token = header("x-gitlab-token")
                .ok_or_else(|| WebhookError::InvalidSignature("missing token".to_string()))?;
            if !constant_time_eq(token.as_bytes(), key.material()) {
                return Err(WebhookError::InvalidSignature("token mismatch".to_string()));
            }
        }
    }

    Ok(WebhookEvent {
        provider,
        event: event.to_string(),
    })
}

fn ack(message: impl Into<String>) -> (StatusCode, Json<WebhookResponse>) {
    (
        StatusCode::OK,
        Json(WebhookResponse {
            queued: false,
            message: message.into(),
            job_id: None,
        }),
    )
}

/// `POST /webhook`
pub async fn webhook_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookResponse>), ApiError> {
    let event = verify(&headers, &body, state.webhook_key.as_deref()).map_err(|e| {
        warn!(error = %e, "webhook rejected");
        e
    })?;

    if event.is_ping() {
        return Ok(ack("pong"));
    }
    if !event.is_push() {
        debug!(event = %event.event, "ignoring webhook event");
        return Ok(ack(format!("ignored {} event", event.event)));
    }

    let push: PushPayload = serde_json::from_slice(&body)
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let branch = match branch_from_ref(&push.git_ref) {
        Some(branch) if !push.deleted => branch,
        _ => return Ok(ack(format!("ignored {}", push.git_ref))),
    };

    let tracked = match state.deployer.branch().await {
        Some(tracked) => tracked,
        None => return Ok(ack("no active deployment")),
    };
    if branch != tracked {
        debug!(branch, tracked = %tracked, "push to untracked branch");
        return Ok(ack(format!("branch {} is not tracked", branch)));
    }

    let urls = push.repository.urls();
    if urls.is_empty() {
        return Err(WebhookError::InvalidPayload("repository URL missing".to_string()).into());
    }
    let mut mismatch = None;
    for url in &urls {
        match state.deployer.compare_remotes(url).await {
            Ok(()) => {
                mismatch = None;
                break;
            }
            Err(DeployError::NoDeployment) => return Ok(ack("no active deployment")),
            Err(e) => mismatch = Some(e),
        }
    }
    if let Some(e) = mismatch {
        warn!(branch, error = %e, "webhook for a different repository");
        return Err(e.into());
    }

    let commit = push.after.or(push.checkout_sha);
    let job = RedeployJob::new(branch, commit);
    let job_id = job.id.clone();
    state
        .redeploys
        .submit(job)
        .map_err(|_| ApiError::from(WebhookError::QueueFull))?;

    info!(job = %job_id, branch, "redeploy queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookResponse {
            queued: true,
            message: format!("redeploy of {} queued", branch),
            job_id: Some(job_id),
        }),
    ))
}
