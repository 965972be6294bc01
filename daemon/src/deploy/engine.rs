//! Container engine interface

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use deployd_api::models::{BuildProfile, ContainerSummary};

use crate::deploy::sink::OutputSink;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("container engine unavailable: {0}")]
    Unavailable(String),

    #[error("{op} {target} failed: {message}")]
    Failed {
        op: &'static str,
        target: String,
        message: String,
    },
}

impl EngineError {
    pub fn failed(op: &'static str, target: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Failed {
            op,
            target: target.into(),
            message: message.into(),
        }
    }
}

/// Stream of log lines; dropping it ends the underlying reader
pub type LogStream = BoxStream<'static, Result<String, EngineError>>;

/// Everything the engine needs to build and start a project
#[derive(Debug, Clone)]
pub struct ProjectBuild {
    pub name: String,
    pub profile: BuildProfile,
    /// Checkout of the project sources
    pub workdir: PathBuf,
    /// Compose file or Dockerfile, relative to `workdir`
    pub build_file: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Log query
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Container name or id, the first project container when unset
    pub container: Option<String>,
    /// Keep the stream open for new lines
    pub follow: bool,
    /// Only the last N lines
    pub tail: Option<usize>,
}

/// Operations the deployer needs from a container engine.
///
/// Implementations must be safe to share across tasks; the deployer
/// serializes mutating calls per project.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pull an image
    async fn pull(&self, image: &str, sink: &OutputSink) -> Result<(), EngineError>;

    /// Build project images
    async fn build(&self, project: &ProjectBuild, sink: &OutputSink) -> Result<(), EngineError>;

    /// Start project containers from built images
    async fn start(&self, project: &ProjectBuild, sink: &OutputSink) -> Result<(), EngineError>;

    /// Stop project containers, keeping images and volumes
    async fn stop(&self, project: &str, sink: &OutputSink) -> Result<(), EngineError>;

    /// Remove project containers, images and networks
    async fn remove(&self, project: &str, sink: &OutputSink) -> Result<(), EngineError>;

    /// Containers belonging to the project
    async fn containers(&self, project: &str) -> Result<Vec<ContainerSummary>, EngineError>;

    /// Log lines of one container
    async fn logs(&self, container: &str, options: &LogOptions) -> Result<LogStream, EngineError>;
}
