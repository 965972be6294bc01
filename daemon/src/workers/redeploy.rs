//! Webhook-triggered redeploys

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::deploy::deployer::{DeployOptions, Deployer};
use crate::deploy::engine::ContainerEngine;
use crate::deploy::sink::{OutputReceiver, OutputSink};
use crate::filesys::file::File;
use crate::utils::generate_uuid;

/// Redeploy worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Deploy output is appended here
    pub log_file: File,
}

/// A queued redeploy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeployJob {
    pub id: String,
    pub branch: String,
    pub commit: Option<String>,
}

impl RedeployJob {
    pub fn new(branch: impl Into<String>, commit: Option<String>) -> Self {
        Self {
            id: generate_uuid(),
            branch: branch.into(),
            commit,
        }
    }
}

/// Sending half of the redeploy queue
#[derive(Debug, Clone)]
pub struct RedeployQueue {
    tx: mpsc::Sender<RedeployJob>,
}

impl RedeployQueue {
    /// Bounded queue; submissions fail once `capacity` jobs are waiting
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RedeployJob>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Enqueue without waiting; the job is handed back when the queue is
    /// full or the worker has stopped
    pub fn submit(&self, job: RedeployJob) -> Result<(), RedeployJob> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
        })
    }
}

/// Run the redeploy worker until shutdown or until every queue sender is gone
pub async fn run(
    options: &Options,
    deployer: Arc<dyn Deployer>,
    engine: Arc<dyn ContainerEngine>,
    mut jobs: mpsc::Receiver<RedeployJob>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Redeploy worker starting...");

    loop {
        let job = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Redeploy worker shutting down...");
                return;
            }
            job = jobs.recv() => match job {
                Some(job) => job,
                None => {
                    debug!("redeploy queue closed");
                    return;
                }
            },
        };

        execute(options, job, deployer.as_ref(), engine.as_ref()).await;
    }
}

async fn execute(options: &Options, job: RedeployJob, deployer: &dyn Deployer, engine: &dyn ContainerEngine) {
    info!(job = %job.id, branch = %job.branch, commit = ?job.commit, "redeploy started");

    let (sink, rx) = OutputSink::channel();
    let writer = spawn_log_writer(options.log_file.clone(), job.id.clone(), rx);
    sink.line(format!("redeploying {} ({})", job.branch, job.commit.as_deref().unwrap_or("latest")));

    let deploy_options = DeployOptions {
        branch: Some(job.branch.clone()),
        ..Default::default()
    };
    let result = deployer.deploy(deploy_options, engine, sink.clone()).await;

    match &result {
        Ok(outcome) => {
            sink.line(format!("redeploy finished at {}", outcome.commit));
            info!(job = %job.id, commit = %outcome.commit, "redeploy finished");
        }
        Err(e) => {
            sink.line(format!("redeploy failed: {}", e));
            error!(job = %job.id, error = %e, "redeploy failed");
        }
    }

    drop(sink);
    if let Err(e) = writer.await {
        warn!(job = %job.id, error = %e, "deploy log writer failed");
    }
}

/// Append timestamped output lines to the deploy log
fn spawn_log_writer(file: File, job_id: String, mut rx: OutputReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(parent) = file.path().parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "unable to create deploy log directory");
            }
        }
        let mut out = match OpenOptions::new().create(true).append(true).open(file.path()).await {
            Ok(out) => Some(out),
            Err(e) => {
                warn!(path = %file.path().display(), error = %e, "unable to open deploy log");
                None
            }
        };

        // drain even when the log cannot be written so the deploy never stalls
        while let Some(line) = rx.recv().await {
            if let Some(f) = out.as_mut() {
                let entry = format!("{} [{}] {}\n", Utc::now().to_rfc3339(), job_id, line);
                if let Err(e) = f.write_all(entry.as_bytes()).await {
                    warn!(error = %e, "deploy log write failed");
                    out = None;
                }
            }
        }
        if let Some(mut f) = out {
            let _ = f.flush().await;
        }
    })
}
