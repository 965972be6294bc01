//! Deployer capability shared by the HTTP handlers and the redeploy worker

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use deployd_api::models::{BuildProfile, ContainerSummary, ProjectSpec, StatusResponse, UpRequest};

use crate::deploy::engine::{ContainerEngine, EngineError, LogOptions, LogStream};
use crate::deploy::fsm::DeploymentState;
use crate::deploy::git::SourceError;
use crate::deploy::sink::OutputSink;
use crate::errors::DaemonError;
use crate::utils::version_info;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("deployment busy: another operation is in progress")]
    Busy,

    #[error("no active deployment")]
    NoDeployment,

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("remote mismatch: {0}")]
    RemoteMismatch(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("storage error: {0}")]
    Storage(#[from] DaemonError),
}

/// Parameters of one deploy
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Project identity, required when nothing is deployed yet
    pub project: Option<ProjectSpec>,
    /// Switch the tracked branch
    pub branch: Option<String>,
    pub profile: Option<BuildProfile>,
    /// Merged over the stored environment
    pub env: BTreeMap<String, String>,
}

impl From<UpRequest> for DeployOptions {
    fn from(req: UpRequest) -> Self {
        Self {
            project: req.project,
            branch: req.branch,
            profile: req.profile,
            env: req.env,
        }
    }
}

/// Result of a successful deploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub project: String,
    pub branch: String,
    pub commit: String,
}

/// Point-in-time view of the deployment, computed per request
#[derive(Debug, Clone)]
pub struct DeploymentStatus {
    pub project: String,
    pub state: DeploymentState,
    pub branch: String,
    pub commit: Option<String>,
    pub profile: BuildProfile,
    pub containers: Vec<ContainerSummary>,
    pub uptime: Option<chrono::Duration>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl From<DeploymentStatus> for StatusResponse {
    fn from(status: DeploymentStatus) -> Self {
        StatusResponse {
            daemon_version: version_info().version,
            project: status.project,
            state: status.state.to_string(),
            branch: status.branch,
            commit: status.commit,
            profile: status.profile,
            containers: status.containers,
            uptime_secs: status.uptime.map(|u| u.num_seconds()),
            deployed_at: status.deployed_at,
            error: status.error,
        }
    }
}

/// Change to the deployment environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvUpdate {
    Set { name: String, value: String },
    Remove { name: String },
}

/// Lifecycle of the single tracked deployment.
///
/// Mutating operations (`deploy`, `down`, `destroy`, `set_env`) are mutually
/// exclusive and fail with [`DeployError::Busy`] instead of waiting. Reads
/// never wait on an operation in flight.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Check out, build and start the project
    async fn deploy(
        &self,
        options: DeployOptions,
        engine: &dyn ContainerEngine,
        sink: OutputSink,
    ) -> Result<DeployOutcome, DeployError>;

    /// Stop the project's containers
    async fn down(&self, engine: &dyn ContainerEngine, sink: OutputSink) -> Result<(), DeployError>;

    /// Remove everything created for the project
    async fn destroy(&self, engine: &dyn ContainerEngine, sink: OutputSink) -> Result<(), DeployError>;

    async fn status(&self, engine: &dyn ContainerEngine) -> Result<DeploymentStatus, DeployError>;

    /// Log stream of a project container; the caller drops it to stop reading
    async fn logs(
        &self,
        options: LogOptions,
        engine: &dyn ContainerEngine,
    ) -> Result<LogStream, DeployError>;

    /// Fail unless `remote` names the tracked repository
    async fn compare_remotes(&self, remote: &str) -> Result<(), DeployError>;

    /// Tracked branch, `None` when nothing is deployed
    async fn branch(&self) -> Option<String>;

    async fn env(&self) -> Result<BTreeMap<String, String>, DeployError>;

    /// Applied on the next deploy
    async fn set_env(&self, update: EnvUpdate) -> Result<(), DeployError>;

    async fn state(&self) -> DeploymentState;
}
