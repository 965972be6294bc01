//! Git checkout of the tracked repository

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use crate::deploy::sink::OutputSink;

#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("git unavailable: {0}")]
    Unavailable(String),

    #[error("git {op} failed: {message}")]
    Failed { op: &'static str, message: String },
}

/// Keeps a working copy of a remote branch
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Bring `dir` to the head of `branch` on `remote`, returning the commit
    async fn sync(
        &self,
        remote: &str,
        branch: &str,
        dir: &Path,
        sink: &OutputSink,
    ) -> Result<String, SourceError>;
}

/// Drives the `git` binary
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    deploy_key: Option<PathBuf>,
}

impl GitCli {
    pub fn new(deploy_key: Option<PathBuf>) -> Self {
        Self { deploy_key }
    }

    fn command(&self, dir: Option<&Path>) -> Command {
        let mut cmd = Command::new("git");
        if let Some(dir) = dir {
            cmd.current_dir(dir);
        }
        if let Some(key) = &self.deploy_key {
            cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    key.display()
                ),
            );
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run git, forwarding its progress output to the sink
    async fn run(
        &self,
        op: &'static str,
        dir: Option<&Path>,
        args: &[&str],
        sink: &OutputSink,
    ) -> Result<(), SourceError> {
        debug!(?args, "git");
        let mut child = self
            .command(dir)
            .args(args)
            .spawn()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // git writes progress to stderr
        let (_, last) = tokio::join!(sink.copy_lines(stdout), sink.copy_lines(stderr));
        let status = child.wait().await.map_err(|e| SourceError::Failed {
            op,
            message: e.to_string(),
        })?;

        if !status.success() {
            return Err(SourceError::Failed {
                op,
                message: last.unwrap_or_else(|| format!("exited with {}", status)),
            });
        }
        Ok(())
    }

    async fn head(&self, dir: &Path) -> Result<String, SourceError> {
        let output = self
            .command(Some(dir))
            .args(["rev-parse", "HEAD"])
            .output()
            .await
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        if !output.status.success() {
            return Err(SourceError::Failed {
                op: "rev-parse",
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn sync(
        &self,
        remote: &str,
        branch: &str,
        dir: &Path,
        sink: &OutputSink,
    ) -> Result<String, SourceError> {
        if dir.join(".git").exists() {
            info!(branch, dir = %dir.display(), "updating checkout");
            self.run("remote", Some(dir), &["remote", "set-url", "origin", remote], sink)
                .await?;
            self.run("fetch", Some(dir), &["fetch", "--prune", "origin", branch], sink)
                .await?;
            let target = format!("origin/{}", branch);
            self.run("checkout", Some(dir), &["checkout", "-B", branch, &target], sink)
                .await?;
            self.run("reset", Some(dir), &["reset", "--hard", &target], sink)
                .await?;
        } else {
            info!(branch, dir = %dir.display(), "cloning repository");
            if let Some(parent) = dir.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| SourceError::Failed {
                        op: "clone",
                        message: e.to_string(),
                    })?;
            }
            let target = dir.to_string_lossy();
            self.run(
                "clone",
                None,
                &["clone", "--progress", "--branch", branch, remote, &target],
                sink,
            )
            .await?;
        }

        let commit = self.head(dir).await?;
        sink.line(format!("checked out {} at {}", branch, commit));
        Ok(commit)
    }
}
