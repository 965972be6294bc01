//! The engine-backed deployment

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use crate::bootstrap::images::Warmup;
use crate::deploy::deployer::{
    DeployError, DeployOptions, DeployOutcome, Deployer, DeploymentStatus, EnvUpdate,
};
use crate::deploy::engine::{ContainerEngine, LogOptions, LogStream, ProjectBuild};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentState};
use crate::deploy::git::SourceControl;
use crate::deploy::record::{validate_project_name, DeploymentRecord};
use crate::deploy::remote::RemoteIdentity;
use crate::deploy::sink::OutputSink;
use crate::errors::DaemonError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

struct Inner {
    fsm: DeploymentFsm,
    record: Option<DeploymentRecord>,
    started_at: Option<DateTime<Utc>>,
}

/// Consistent copy of the deployment taken under the read lock
struct Snapshot {
    state: DeploymentState,
    error: Option<String>,
    record: Option<DeploymentRecord>,
    started_at: Option<DateTime<Utc>>,
}

/// The single deployment this daemon manages.
///
/// `op_lock` serializes mutating operations for their whole duration.
/// `inner` is only ever held for short, non-blocking updates, so status
/// reads stay responsive while an operation runs.
pub struct Deployment {
    op_lock: Mutex<()>,
    inner: RwLock<Inner>,
    record_file: File,
    checkout: Dir,
    source: Arc<dyn SourceControl>,
    warmup: Warmup,
}

impl Deployment {
    /// Load the persisted record; a recorded project starts out `Stopped`
    pub async fn load(
        record_file: File,
        checkout: Dir,
        source: Arc<dyn SourceControl>,
        warmup: Warmup,
    ) -> Result<Self, DaemonError> {
        let record = record_file.read_json_opt::<DeploymentRecord>().await?;
        let fsm = match &record {
            Some(record) => {
                info!(project = %record.project, branch = %record.branch, "loaded deployment record");
                DeploymentFsm::restore(DeploymentState::Stopped)
            }
            None => DeploymentFsm::new(),
        };

        Ok(Self {
            op_lock: Mutex::new(()),
            inner: RwLock::new(Inner {
                fsm,
                record,
                started_at: None,
            }),
            record_file,
            checkout,
            source,
            warmup,
        })
    }

    /// Promote a loaded deployment to `Running` if its containers are up
    pub async fn recover(&self, engine: &dyn ContainerEngine) {
        let project = match self.snapshot().await.record {
            Some(record) => record.project,
            None => return,
        };

        match engine.containers(&project).await {
            Ok(containers) if containers.iter().any(|c| c.state == "running") => {
                let mut inner = self.inner.write().await;
                inner.fsm = DeploymentFsm::restore(DeploymentState::Running);
                inner.started_at = inner.record.as_ref().and_then(|r| r.deployed_at);
                info!(project = %project, "deployment is running");
            }
            Ok(_) => info!(project = %project, "deployment is stopped"),
            Err(e) => warn!(project = %project, error = %e, "unable to inspect deployment containers"),
        }
    }

    fn begin(&self) -> Result<MutexGuard<'_, ()>, DeployError> {
        self.op_lock.try_lock().map_err(|_| DeployError::Busy)
    }

    async fn snapshot(&self) -> Snapshot {
        let inner = self.inner.read().await;
        Snapshot {
            state: inner.fsm.state(),
            error: inner.fsm.error().map(str::to_string),
            record: inner.record.clone(),
            started_at: inner.started_at,
        }
    }

    async fn transition(&self, event: DeploymentEvent) -> Result<(), DeployError> {
        self.inner
            .write()
            .await
            .fsm
            .process(event)
            .map_err(DeployError::InvalidState)
    }

    async fn save_record(&self, record: &DeploymentRecord) -> Result<(), DeployError> {
        self.record_file.write_json(record).await?;
        self.inner.write().await.record = Some(record.clone());
        Ok(())
    }

    /// Merge deploy options over the stored record
    fn prepare_record(
        existing: Option<DeploymentRecord>,
        options: DeployOptions,
    ) -> Result<DeploymentRecord, DeployError> {
        let mut record = match (existing, &options.project) {
            (None, None) => return Err(DeployError::NoDeployment),
            (None, Some(project)) => {
                validate_project_name(&project.name).map_err(DeployError::InvalidRequest)?;
                if RemoteIdentity::parse(&project.remote).is_none() {
                    return Err(DeployError::InvalidRequest(format!(
                        "unrecognized remote URL {}",
                        project.remote
                    )));
                }
                DeploymentRecord::from_project(project)
            }
            (Some(mut record), Some(project)) => {
                if !RemoteIdentity::same_repository(&record.remote, &project.remote) {
                    return Err(DeployError::RemoteMismatch(format!(
                        "{} is not the tracked repository {}",
                        project.remote, record.remote
                    )));
                }
                if project.name != record.project {
                    return Err(DeployError::InvalidState(format!(
                        "project {} is deployed; reset it before deploying {}",
                        record.project, project.name
                    )));
                }
                record.remote = project.remote.clone();
                record.branch = project.branch.clone();
                record.profile = project.profile;
                record.build_file = project.build_file.clone();
                record
            }
            (Some(record), None) => record,
        };

        if let Some(branch) = options.branch {
            record.branch = branch;
        }
        if record.branch.trim().is_empty() {
            return Err(DeployError::InvalidRequest("branch must not be empty".to_string()));
        }
        if let Some(profile) = options.profile {
            record.profile = profile;
        }
        record.env.extend(options.env);
        Ok(record)
    }

    /// Stop containers; requires `Running` and the operation lock
    async fn stop_running(
        &self,
        project: &str,
        engine: &dyn ContainerEngine,
        sink: &OutputSink,
    ) -> Result<(), DeployError> {
        self.transition(DeploymentEvent::Stop).await?;
        sink.line(format!("stopping {}", project));

        match engine.stop(project, sink).await {
            Ok(()) => {
                let mut inner = self.inner.write().await;
                inner.fsm.process(DeploymentEvent::Stopped).map_err(DeployError::InvalidState)?;
                inner.started_at = None;
                Ok(())
            }
            Err(e) => {
                warn!(project, error = %e, "stop failed");
                self.transition(DeploymentEvent::StopFailed(e.to_string())).await?;
                Err(e.into())
            }
        }
    }

    async fn build_and_start(
        &self,
        record: &DeploymentRecord,
        engine: &dyn ContainerEngine,
        sink: &OutputSink,
    ) -> Result<String, DeployError> {
        let commit = self
            .source
            .sync(&record.remote, &record.branch, self.checkout.path(), sink)
            .await?;

        if !self.warmup.is_done() {
            sink.line("waiting for build tools to finish downloading");
            self.warmup.wait().await;
        }

        let build = ProjectBuild {
            name: record.project.clone(),
            profile: record.profile,
            workdir: self.checkout.path().to_path_buf(),
            build_file: record.build_file.clone(),
            env: record.env.clone(),
        };
        engine.build(&build, sink).await?;
        engine.start(&build, sink).await?;
        Ok(commit)
    }
}

#[async_trait]
impl Deployer for Deployment {
    async fn deploy(
        &self,
        options: DeployOptions,
        engine: &dyn ContainerEngine,
        sink: OutputSink,
    ) -> Result<DeployOutcome, DeployError> {
        let _op = self.begin()?;
        let current = self.snapshot().await;

        match current.state {
            DeploymentState::Uninitialized | DeploymentState::Stopped | DeploymentState::Running => {}
            DeploymentState::Failed => {
                return Err(DeployError::InvalidState(
                    "deployment failed; reset it before deploying again".to_string(),
                ))
            }
            state => {
                return Err(DeployError::InvalidState(format!(
                    "cannot deploy while {}",
                    state
                )))
            }
        }

        let mut record = Self::prepare_record(current.record, options)?;
        // persisted before any transition, so a failed write leaves the state as it was
        self.save_record(&record).await?;

        if current.state == DeploymentState::Running {
            info!(project = %record.project, "redeploying");
            self.stop_running(&record.project, engine, &sink).await?;
        }

        self.transition(DeploymentEvent::Build).await?;
        info!(project = %record.project, branch = %record.branch, "deploying");
        sink.line(format!("deploying {} ({})", record.project, record.branch));

        let result = self.build_and_start(&record, engine, &sink).await;

        match result {
            Ok(commit) => {
                let now = Utc::now();
                record.commit = Some(commit.clone());
                record.deployed_at = Some(now);
                if let Err(e) = self.record_file.write_json(&record).await {
                    warn!(error = %e, "unable to persist deployment record");
                }

                let mut inner = self.inner.write().await;
                inner.record = Some(record.clone());
                inner.started_at = Some(now);
                inner
                    .fsm
                    .process(DeploymentEvent::BuildSucceeded)
                    .map_err(DeployError::InvalidState)?;

                info!(project = %record.project, commit = %commit, "deployment running");
                sink.line(format!("{} is running at {}", record.project, commit));
                Ok(DeployOutcome {
                    project: record.project,
                    branch: record.branch,
                    commit,
                })
            }
            Err(e) => {
                warn!(project = %record.project, error = %e, "deploy failed");
                sink.line(format!("deploy failed: {}", e));
                self.transition(DeploymentEvent::BuildFailed(e.to_string())).await?;
                Err(e)
            }
        }
    }

    async fn down(&self, engine: &dyn ContainerEngine, sink: OutputSink) -> Result<(), DeployError> {
        let _op = self.begin()?;
        let current = self.snapshot().await;

        match (current.state, current.record) {
            (DeploymentState::Uninitialized, _) | (_, None) => Err(DeployError::NoDeployment),
            (DeploymentState::Stopped, Some(record)) => {
                sink.line(format!("{} is already stopped", record.project));
                Ok(())
            }
            (DeploymentState::Running, Some(record)) => {
                self.stop_running(&record.project, engine, &sink).await?;
                info!(project = %record.project, "deployment stopped");
                Ok(())
            }
            (state, Some(_)) => Err(DeployError::InvalidState(format!(
                "cannot stop a deployment that is {}",
                state
            ))),
        }
    }

    async fn destroy(&self, engine: &dyn ContainerEngine, sink: OutputSink) -> Result<(), DeployError> {
        let _op = self.begin()?;
        let current = self.snapshot().await;
        let project = match (current.state, current.record) {
            (DeploymentState::Uninitialized, _) => return Err(DeployError::NoDeployment),
            (_, Some(record)) => record.project,
            (state, None) => {
                // nothing was created for a deployment without a record
                warn!(%state, "clearing deployment without a record");
                self.checkout.delete().await?;
                let mut inner = self.inner.write().await;
                inner.fsm.process(DeploymentEvent::Destroy).map_err(DeployError::InvalidState)?;
                inner.fsm.process(DeploymentEvent::Destroyed).map_err(DeployError::InvalidState)?;
                inner.started_at = None;
                sink.line("deployment cleared");
                return Ok(());
            }
        };

        self.transition(DeploymentEvent::Destroy).await?;
        sink.line(format!("removing {}", project));

        let result = match engine.remove(&project, &sink).await {
            Ok(()) => self
                .checkout
                .delete()
                .await
                .and(self.record_file.delete().await)
                .map_err(DeployError::from),
            Err(e) => Err(e.into()),
        };

        let mut inner = self.inner.write().await;
        match result {
            Ok(()) => {
                inner.fsm.process(DeploymentEvent::Destroyed).map_err(DeployError::InvalidState)?;
                inner.record = None;
                inner.started_at = None;
                info!(project = %project, "deployment removed");
                Ok(())
            }
            Err(e) => {
                warn!(project = %project, error = %e, "destroy failed");
                inner
                    .fsm
                    .process(DeploymentEvent::DestroyFailed(e.to_string()))
                    .map_err(DeployError::InvalidState)?;
                Err(e)
            }
        }
    }

    async fn status(&self, engine: &dyn ContainerEngine) -> Result<DeploymentStatus, DeployError> {
        let current = self.snapshot().await;
        let record = match current.record {
            Some(record) if current.state != DeploymentState::Uninitialized => record,
            _ => return Err(DeployError::NoDeployment),
        };

        let containers = engine.containers(&record.project).await?;
        let uptime = match current.state {
            DeploymentState::Running => current.started_at.map(|t| Utc::now() - t),
            _ => None,
        };

        Ok(DeploymentStatus {
            project: record.project,
            state: current.state,
            branch: record.branch,
            commit: record.commit,
            profile: record.profile,
            containers,
            uptime,
            deployed_at: record.deployed_at,
            error: current.error,
        })
    }

    async fn logs(
        &self,
        options: LogOptions,
        engine: &dyn ContainerEngine,
    ) -> Result<LogStream, DeployError> {
        let current = self.snapshot().await;
        let record = match (current.state, current.record) {
            (DeploymentState::Uninitialized, _) | (_, None) => return Err(DeployError::NoDeployment),
            (DeploymentState::Running | DeploymentState::Stopping, Some(record)) => record,
            (state, Some(_)) => {
                return Err(DeployError::InvalidState(format!(
                    "no logs while the deployment is {}",
                    state
                )))
            }
        };

        let containers = engine.containers(&record.project).await?;
        let container = match &options.container {
            Some(wanted) => containers
                .iter()
                .find(|c| &c.name == wanted || c.id.starts_with(wanted.as_str()))
                .ok_or_else(|| {
                    DeployError::InvalidRequest(format!(
                        "{} is not a container of {}",
                        wanted, record.project
                    ))
                })?,
            None => containers
                .iter()
                .find(|c| c.state == "running")
                .or_else(|| containers.first())
                .ok_or_else(|| {
                    DeployError::InvalidState(format!("{} has no containers", record.project))
                })?,
        };

        Ok(engine.logs(&container.name, &options).await?)
    }

    async fn compare_remotes(&self, remote: &str) -> Result<(), DeployError> {
        let tracked = match self.snapshot().await.record {
            Some(record) => record.remote,
            None => return Err(DeployError::NoDeployment),
        };
        if RemoteIdentity::same_repository(&tracked, remote) {
            Ok(())
        } else {
            Err(DeployError::RemoteMismatch(format!(
                "{} is not the tracked repository {}",
                remote, tracked
            )))
        }
    }

    async fn branch(&self) -> Option<String> {
        self.inner.read().await.record.as_ref().map(|r| r.branch.clone())
    }

    async fn env(&self) -> Result<BTreeMap<String, String>, DeployError> {
        self.inner
            .read()
            .await
            .record
            .as_ref()
            .map(|r| r.env.clone())
            .ok_or(DeployError::NoDeployment)
    }

    async fn set_env(&self, update: EnvUpdate) -> Result<(), DeployError> {
        let _op = self.begin()?;
        let mut record = self.snapshot().await.record.ok_or(DeployError::NoDeployment)?;

        match update {
            EnvUpdate::Set { name, value } => {
                if name.is_empty() || name.contains('=') || name.chars().any(char::is_whitespace) {
                    return Err(DeployError::InvalidRequest(format!(
                        "invalid variable name {:?}",
                        name
                    )));
                }
                record.env.insert(name, value);
            }
            EnvUpdate::Remove { name } => {
                record.env.remove(&name);
            }
        }
        self.save_record(&record).await
    }

    async fn state(&self) -> DeploymentState {
        self.inner.read().await.fsm.state()
    }
}
