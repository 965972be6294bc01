//! In-memory doubles for the deployer, container engine and git

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{Notify, Semaphore};

use deployd_api::models::{BuildProfile, ContainerSummary};

use crate::deploy::deployer::{
    DeployError, DeployOptions, DeployOutcome, Deployer, DeploymentStatus, EnvUpdate,
};
use crate::deploy::engine::{ContainerEngine, EngineError, LogOptions, LogStream, ProjectBuild};
use crate::deploy::fsm::DeploymentState;
use crate::deploy::git::{SourceControl, SourceError};
use crate::deploy::remote::RemoteIdentity;
use crate::deploy::sink::OutputSink;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Container engine that keeps containers in memory
#[derive(Default)]
pub struct FakeEngine {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    containers: Mutex<BTreeMap<String, Vec<ContainerSummary>>>,
    log_lines: Mutex<Vec<String>>,
    build_gate: Option<Arc<Semaphore>>,
    build_started: Notify,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine whose builds wait for a permit on the returned gate
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let engine = Self {
            build_gate: Some(gate.clone()),
            ..Self::default()
        };
        (engine, gate)
    }

    /// Make an operation fail: `pull`, `pull:<image>`, `build`, `start`,
    /// `stop`, `remove` or `containers`
    pub fn fail(&self, op: &str) {
        lock(&self.failing).insert(op.to_string());
    }

    pub fn recover(&self, op: &str) {
        lock(&self.failing).remove(op);
    }

    pub fn set_log_lines(&self, lines: &[&str]) {
        *lock(&self.log_lines) = lines.iter().map(|l| l.to_string()).collect();
    }

    /// Pretend a project container is already running
    pub fn add_running(&self, project: &str) {
        lock(&self.containers).insert(project.to_string(), vec![container(project, "running")]);
    }

    /// Every call as `<op> <target>`
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{} ", op);
        lock(&self.calls).iter().filter(|c| c.starts_with(&prefix)).count()
    }

    /// Resolves once a build has started
    pub async fn build_started(&self) {
        self.build_started.notified().await
    }

    fn record(&self, op: &'static str, target: &str) -> Result<(), EngineError> {
        lock(&self.calls).push(format!("{} {}", op, target));
        let failing = lock(&self.failing);
        if failing.contains(op) || failing.contains(&format!("{}:{}", op, target)) {
            return Err(EngineError::failed(op, target, "simulated failure"));
        }
        Ok(())
    }

    fn set_state(&self, project: &str, state: &str) {
        if let Some(list) = lock(&self.containers).get_mut(project) {
            for c in list.iter_mut() {
                c.state = state.to_string();
                c.status = state.to_string();
            }
        }
    }
}

fn container(project: &str, state: &str) -> ContainerSummary {
    ContainerSummary {
        id: format!("{:0>12}", project.len()),
        name: format!("{}_app_1", project),
        image: format!("{}_app", project),
        state: state.to_string(),
        status: state.to_string(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn pull(&self, image: &str, sink: &OutputSink) -> Result<(), EngineError> {
        self.record("pull", image)?;
        sink.line(format!("pulled {}", image));
        Ok(())
    }

    async fn build(&self, project: &ProjectBuild, sink: &OutputSink) -> Result<(), EngineError> {
        self.build_started.notify_one();
        if let Some(gate) = &self.build_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.record("build", &project.name)?;
        sink.line(format!("built {}", project.name));
        Ok(())
    }

    async fn start(&self, project: &ProjectBuild, sink: &OutputSink) -> Result<(), EngineError> {
        self.record("start", &project.name)?;
        lock(&self.containers).insert(project.name.clone(), vec![container(&project.name, "running")]);
        sink.line(format!("started {}", project.name));
        Ok(())
    }

    async fn stop(&self, project: &str, sink: &OutputSink) -> Result<(), EngineError> {
        self.record("stop", project)?;
        self.set_state(project, "exited");
        sink.line(format!("stopped {}", project));
        Ok(())
    }

    async fn remove(&self, project: &str, sink: &OutputSink) -> Result<(), EngineError> {
        self.record("remove", project)?;
        lock(&self.containers).remove(project);
        sink.line(format!("removed {}", project));
        Ok(())
    }

    async fn containers(&self, project: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        self.record("containers", project)?;
        Ok(lock(&self.containers).get(project).cloned().unwrap_or_default())
    }

    async fn logs(&self, container: &str, options: &LogOptions) -> Result<LogStream, EngineError> {
        self.record("logs", container)?;
        let mut lines = lock(&self.log_lines).clone();
        if let Some(tail) = options.tail {
            let skip = lines.len().saturating_sub(tail);
            lines.drain(..skip);
        }
        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }
}

/// Git double returning a fixed commit
pub struct FakeSource {
    commit: Mutex<String>,
    fail: AtomicBool,
    syncs: Mutex<Vec<(String, String)>>,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            commit: Mutex::new("0123456789abcdef0123456789abcdef01234567".to_string()),
            fail: AtomicBool::new(false),
            syncs: Mutex::new(Vec::new()),
        }
    }
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_commit(&self, commit: &str) {
        *lock(&self.commit) = commit.to_string();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every sync as `(remote, branch)`
    pub fn syncs(&self) -> Vec<(String, String)> {
        lock(&self.syncs).clone()
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn sync(
        &self,
        remote: &str,
        branch: &str,
        _dir: &Path,
        sink: &OutputSink,
    ) -> Result<String, SourceError> {
        lock(&self.syncs).push((remote.to_string(), branch.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(SourceError::Failed {
                op: "fetch",
                message: "simulated failure".to_string(),
            });
        }
        let commit = lock(&self.commit).clone();
        sink.line(format!("checked out {} at {}", branch, commit));
        Ok(commit)
    }
}

struct FakeState {
    state: DeploymentState,
    project: String,
    remote: Option<String>,
    branch: Option<String>,
    env: BTreeMap<String, String>,
    last_options: Option<DeployOptions>,
}

/// Deployer that records calls without touching an engine
pub struct FakeDeployer {
    inner: Mutex<FakeState>,
    busy: AtomicBool,
    deploys: AtomicUsize,
    deployed: Notify,
}

impl Default for FakeDeployer {
    fn default() -> Self {
        Self {
            inner: Mutex::new(FakeState {
                state: DeploymentState::Uninitialized,
                project: String::new(),
                remote: None,
                branch: None,
                env: BTreeMap::new(),
                last_options: None,
            }),
            busy: AtomicBool::new(false),
            deploys: AtomicUsize::new(0),
            deployed: Notify::new(),
        }
    }
}

impl FakeDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A running deployment of `remote` tracking `branch`
    pub fn running(project: &str, remote: &str, branch: &str) -> Self {
        let fake = Self::default();
        {
            let mut inner = lock(&fake.inner);
            inner.state = DeploymentState::Running;
            inner.project = project.to_string();
            inner.remote = Some(remote.to_string());
            inner.branch = Some(branch.to_string());
        }
        fake
    }

    /// Make mutating calls fail with `Busy`
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    pub fn deploy_count(&self) -> usize {
        self.deploys.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<DeployOptions> {
        lock(&self.inner).last_options.clone()
    }

    /// Resolves after the next deploy call
    pub async fn deployed(&self) {
        self.deployed.notified().await
    }

    fn check_busy(&self) -> Result<(), DeployError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(DeployError::Busy);
        }
        Ok(())
    }
}

#[async_trait]
impl Deployer for FakeDeployer {
    async fn deploy(
        &self,
        options: DeployOptions,
        _engine: &dyn ContainerEngine,
        sink: OutputSink,
    ) -> Result<DeployOutcome, DeployError> {
        self.check_busy()?;
        let outcome = {
            let mut inner = lock(&self.inner);
            if let Some(project) = &options.project {
                inner.project = project.name.clone();
                inner.remote = Some(project.remote.clone());
                inner.branch = Some(project.branch.clone());
            }
            if let Some(branch) = &options.branch {
                inner.branch = Some(branch.clone());
            }
            let branch = inner.branch.clone().ok_or(DeployError::NoDeployment)?;
            inner.state = DeploymentState::Running;
            inner.last_options = Some(options);
            DeployOutcome {
                project: inner.project.clone(),
                branch,
                commit: "fakecommit".to_string(),
            }
        };

        sink.line(format!("deployed {}", outcome.branch));
        self.deploys.fetch_add(1, Ordering::SeqCst);
        self.deployed.notify_one();
        Ok(outcome)
    }

    async fn down(&self, _engine: &dyn ContainerEngine, sink: OutputSink) -> Result<(), DeployError> {
        self.check_busy()?;
        let mut inner = lock(&self.inner);
        match inner.state {
            DeploymentState::Uninitialized => Err(DeployError::NoDeployment),
            DeploymentState::Running | DeploymentState::Stopped => {
                inner.state = DeploymentState::Stopped;
                sink.line("stopped");
                Ok(())
            }
            state => Err(DeployError::InvalidState(format!("cannot stop while {}", state))),
        }
    }

    async fn destroy(&self, _engine: &dyn ContainerEngine, sink: OutputSink) -> Result<(), DeployError> {
        self.check_busy()?;
        let mut inner = lock(&self.inner);
        if inner.state == DeploymentState::Uninitialized {
            return Err(DeployError::NoDeployment);
        }
        inner.state = DeploymentState::Uninitialized;
        inner.remote = None;
        inner.branch = None;
        inner.env.clear();
        sink.line("removed");
        Ok(())
    }

    async fn status(&self, _engine: &dyn ContainerEngine) -> Result<DeploymentStatus, DeployError> {
        let inner = lock(&self.inner);
        let branch = match (&inner.state, &inner.branch) {
            (DeploymentState::Uninitialized, _) | (_, None) => return Err(DeployError::NoDeployment),
            (_, Some(branch)) => branch.clone(),
        };
        Ok(DeploymentStatus {
            project: inner.project.clone(),
            state: inner.state,
            branch,
            commit: Some("fakecommit".to_string()),
            profile: BuildProfile::default(),
            containers: Vec::new(),
            uptime: None,
            deployed_at: None,
            error: None,
        })
    }

    async fn logs(
        &self,
        _options: LogOptions,
        _engine: &dyn ContainerEngine,
    ) -> Result<LogStream, DeployError> {
        match lock(&self.inner).state {
            DeploymentState::Uninitialized => Err(DeployError::NoDeployment),
            DeploymentState::Running | DeploymentState::Stopping => {
                let lines = vec![Ok("fake log line".to_string())];
                Ok(futures::stream::iter(lines).boxed())
            }
            state => Err(DeployError::InvalidState(format!("no logs while {}", state))),
        }
    }

    async fn compare_remotes(&self, remote: &str) -> Result<(), DeployError> {
        let tracked = lock(&self.inner).remote.clone().ok_or(DeployError::NoDeployment)?;
        if RemoteIdentity::same_repository(&tracked, remote) {
            Ok(())
        } else {
            Err(DeployError::RemoteMismatch(format!("{} != {}", remote, tracked)))
        }
    }

    async fn branch(&self) -> Option<String> {
        lock(&self.inner).branch.clone()
    }

    async fn env(&self) -> Result<BTreeMap<String, String>, DeployError> {
        let inner = lock(&self.inner);
        if inner.state == DeploymentState::Uninitialized {
            return Err(DeployError::NoDeployment);
        }
        Ok(inner.env.clone())
    }

    async fn set_env(&self, update: EnvUpdate) -> Result<(), DeployError> {
        self.check_busy()?;
        let mut inner = lock(&self.inner);
        if inner.state == DeploymentState::Uninitialized {
            return Err(DeployError::NoDeployment);
        }
        match update {
            EnvUpdate::Set { name, value } => {
                inner.env.insert(name, value);
            }
            EnvUpdate::Remove { name } => {
                inner.env.remove(&name);
            }
        }
        Ok(())
    }

    async fn state(&self) -> DeploymentState {
        lock(&self.inner).state
    }
}
