//! Container engine backed by the docker CLI

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use deployd_api::models::{BuildProfile, ContainerSummary};

use crate::deploy::engine::{ContainerEngine, EngineError, LogOptions, LogStream, ProjectBuild};
use crate::deploy::sink::OutputSink;
use crate::storage::settings::BuildToolSettings;

const DOCKER_SOCKET: &str = "/var/run/docker.sock";
const DEFAULT_COMPOSE_FILE: &str = "docker-compose.yml";
const DEFAULT_DOCKERFILE: &str = "Dockerfile";
const PROJECT_LABEL: &str = "deployd.project";
const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const PS_FORMAT: &str = "{{.ID}}\t{{.Names}}\t{{.Image}}\t{{.State}}\t{{.Status}}";

/// Drives the `docker` binary
#[derive(Debug, Clone)]
pub struct DockerCli {
    docker_bin: String,
    build_tools: BuildToolSettings,
}

impl DockerCli {
    pub fn new(docker_bin: impl Into<String>, build_tools: BuildToolSettings) -> Self {
        Self {
            docker_bin: docker_bin.into(),
            build_tools,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.docker_bin);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn(&self, args: &[String]) -> Result<Child, EngineError> {
        debug!(args = ?args, "docker");
        self.command(args).spawn().map_err(|e| {
            EngineError::Unavailable(format!("unable to run {}: {}", self.docker_bin, e))
        })
    }

    /// Run to completion, forwarding stdout and stderr to the sink
    async fn run(
        &self,
        op: &'static str,
        target: &str,
        args: Vec<String>,
        sink: &OutputSink,
    ) -> Result<(), EngineError> {
        let mut child = self.spawn(&args)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, last_err) = tokio::join!(sink.copy_lines(stdout), sink.copy_lines(stderr));
        let status = child
            .wait()
            .await
            .map_err(|e| EngineError::failed(op, target, e.to_string()))?;

        if !status.success() {
            let message = last_err.unwrap_or_else(|| format!("exited with {}", status));
            return Err(EngineError::failed(op, target, message));
        }
        Ok(())
    }

    /// Run to completion and capture stdout
    async fn output(&self, op: &'static str, target: &str, args: Vec<String>) -> Result<String, EngineError> {
        let child = self.spawn(&args)?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EngineError::failed(op, target, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::failed(op, target, stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Ids of everything a listing finds for the project, one query per
    /// project label since docker ANDs label filters
    async fn project_ids(&self, op: &'static str, project: &str, listing: &[&str]) -> Result<Vec<String>, EngineError> {
        let mut found = Vec::new();
        for filter in project_filters(project) {
            let mut args = strings(listing);
            args.extend(["--filter".to_string(), filter]);
            for id in self.ids(op, project, args).await? {
                if !found.contains(&id) {
                    found.push(id);
                }
            }
        }
        Ok(found)
    }

    /// Ids printed one per line by a `-q` listing
    async fn ids(&self, op: &'static str, target: &str, args: Vec<String>) -> Result<Vec<String>, EngineError> {
        let out = self.output(op, target, args).await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn compose_args(&self, project: &ProjectBuild, action: &[&str]) -> Vec<String> {
        let file = project.build_file.as_deref().unwrap_or(DEFAULT_COMPOSE_FILE);
        let mut args = strings(&["run", "--rm"]);
        args.extend(volume(Path::new(DOCKER_SOCKET), DOCKER_SOCKET));
        args.extend(volume(&project.workdir, "/build"));
        args.extend(strings(&["-w", "/build"]));
        args.extend(env_flags(project));
        args.push(self.build_tools.compose_image.clone());
        args.extend(strings(&["-p", &project.name, "-f", file]));
        args.extend(strings(action));
        args
    }

    fn run_args(&self, project: &ProjectBuild) -> Vec<String> {
        let mut args = strings(&[
            "run",
            "-d",
            "--name",
            &project.name,
            "--network",
            "host",
            "--restart",
            "unless-stopped",
            "--label",
            &project_label(&project.name),
        ]);
        args.extend(env_flags(project));
        args.push(image_tag(&project.name));
        if project.profile == BuildProfile::Buildpack {
            args.extend(strings(&["/start", "web"]));
        }
        args
    }
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn pull(&self, image: &str, sink: &OutputSink) -> Result<(), EngineError> {
        info!(image, "pulling image");
        self.run("pull", image, strings(&["pull", image]), sink).await
    }

    async fn build(&self, project: &ProjectBuild, sink: &OutputSink) -> Result<(), EngineError> {
        info!(project = %project.name, profile = project.profile.as_str(), "building project");
        match project.profile {
            BuildProfile::Compose => {
                let args = self.compose_args(project, &["build"]);
                self.run("build", &project.name, args, sink).await
            }
            BuildProfile::Buildpack => {
                let builder = format!("{}-build", project.name);
                // leftover from an interrupted build
                let _ = self
                    .output("build", &builder, strings(&["rm", "-f", &builder]))
                    .await;

                let mut args = strings(&["run", "--name", &builder, "--label", &project_label(&project.name)]);
                args.extend(volume(&project.workdir, "/tmp/app"));
                args.extend(env_flags(project));
                args.extend(strings(&[&self.build_tools.buildpack_image, "/build"]));
                self.run("build", &project.name, args, sink).await?;

                let tag = image_tag(&project.name);
                let commit = self
                    .run("commit", &builder, strings(&["commit", &builder, &tag]), sink)
                    .await;
                let _ = self
                    .output("build", &builder, strings(&["rm", "-f", &builder]))
                    .await;
                commit
            }
            BuildProfile::Dockerfile => {
                let file = project.build_file.as_deref().unwrap_or(DEFAULT_DOCKERFILE);
                let dockerfile = project.workdir.join(file);
                let args = strings(&[
                    "build",
                    "-t",
                    &image_tag(&project.name),
                    "-f",
                    &dockerfile.to_string_lossy(),
                    &project.workdir.to_string_lossy(),
                ]);
                self.run("build", &project.name, args, sink).await
            }
        }
    }

    async fn start(&self, project: &ProjectBuild, sink: &OutputSink) -> Result<(), EngineError> {
        info!(project = %project.name, "starting project");
        match project.profile {
            BuildProfile::Compose => {
                let args = self.compose_args(project, &["up", "-d"]);
                self.run("start", &project.name, args, sink).await
            }
            BuildProfile::Buildpack | BuildProfile::Dockerfile => {
                // replace the container from the previous deploy
                let _ = self
                    .output("start", &project.name, strings(&["rm", "-f", &project.name]))
                    .await;
                self.run("start", &project.name, self.run_args(project), sink).await
            }
        }
    }

    async fn stop(&self, project: &str, sink: &OutputSink) -> Result<(), EngineError> {
        let running = self
            .project_ids("stop", project, &["ps", "-q"])
            .await?;
        if running.is_empty() {
            sink.line(format!("no running containers for {}", project));
            return Ok(());
        }

        info!(project, count = running.len(), "stopping containers");
        let mut args = strings(&["stop"]);
        args.extend(running);
        self.run("stop", project, args, sink).await
    }

    async fn remove(&self, project: &str, sink: &OutputSink) -> Result<(), EngineError> {
        info!(project, "removing containers, images and networks");

        let containers = self
            .project_ids("remove", project, &["ps", "-aq"])
            .await?;
        if !containers.is_empty() {
            let mut args = strings(&["rm", "-f", "-v"]);
            args.extend(containers);
            self.run("remove", project, args, sink).await?;
        }

        let mut images = Vec::new();
        for reference in [format!("{}_*", project), format!("deployd/{}", project)] {
            let filter = format!("reference={}", reference);
            images.extend(
                self.ids("remove", project, strings(&["images", "-q", "--filter", &filter]))
                    .await?,
            );
        }
        images.sort();
        images.dedup();
        if !images.is_empty() {
            let mut args = strings(&["rmi", "-f"]);
            args.extend(images);
            self.run("remove", project, args, sink).await?;
        }

        let networks = self
            .project_ids("remove", project, &["network", "ls", "-q"])
            .await?;
        if !networks.is_empty() {
            let mut args = strings(&["network", "rm"]);
            args.extend(networks);
            self.run("remove", project, args, sink).await?;
        }
        Ok(())
    }

    async fn containers(&self, project: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut found: Vec<ContainerSummary> = Vec::new();
        for filter in project_filters(project) {
            let out = self
                .output(
                    "status",
                    project,
                    strings(&["ps", "-a", "--filter", &filter, "--format", PS_FORMAT]),
                )
                .await?;
            for container in out.lines().filter_map(parse_container_line) {
                if !found.iter().any(|c| c.id == container.id) {
                    found.push(container);
                }
            }
        }
        Ok(found)
    }

    async fn logs(&self, container: &str, options: &LogOptions) -> Result<LogStream, EngineError> {
        let mut args = strings(&["logs"]);
        if options.follow {
            args.push("--follow".to_string());
        }
        if let Some(tail) = options.tail {
            args.extend(strings(&["--tail", &tail.to_string()]));
        }
        args.push(container.to_string());

        let mut child = self.spawn(&args)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::failed("logs", container, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::failed("logs", container, "stderr not captured"))?;

        // stdout's stream owns the child; the process is killed once it is dropped
        let out = line_stream(stdout, Some(child), container.to_string());
        let err = line_stream(stderr, None, container.to_string());
        Ok(futures::stream::select(out, err).boxed())
    }
}

fn line_stream<R>(
    reader: R,
    child: Option<Child>,
    container: String,
) -> futures::stream::BoxStream<'static, Result<String, EngineError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let lines = BufReader::new(reader).lines();
    futures::stream::unfold(
        (Some(lines), child, container),
        |(lines, child, container)| async move {
            let mut lines = lines?;
            match lines.next_line().await {
                Ok(Some(line)) => Some((Ok(line), (Some(lines), child, container))),
                Ok(None) => None,
                Err(e) => {
                    let err = EngineError::failed("logs", container.clone(), e.to_string());
                    Some((Err(err), (None, child, container)))
                }
            }
        },
    )
    .boxed()
}

fn parse_container_line(line: &str) -> Option<ContainerSummary> {
    let mut fields = line.split('\t');
    Some(ContainerSummary {
        id: fields.next()?.trim().to_string(),
        name: fields.next()?.to_string(),
        image: fields.next()?.to_string(),
        state: fields.next()?.to_string(),
        status: fields.next()?.to_string(),
    })
    .filter(|c| !c.id.is_empty())
}

fn project_label(project: &str) -> String {
    format!("{}={}", PROJECT_LABEL, project)
}

/// Exact-match filters for containers and networks of a project. Compose
/// labels its own resources; everything else is started with `--label`.
fn project_filters(project: &str) -> [String; 2] {
    [
        format!("label={}={}", COMPOSE_PROJECT_LABEL, project),
        format!("label={}", project_label(project)),
    ]
}

fn image_tag(project: &str) -> String {
    format!("deployd/{}:latest", project)
}

fn volume(host: &Path, container: &str) -> Vec<String> {
    vec!["-v".to_string(), format!("{}:{}", host.display(), container)]
}

fn env_flags(project: &ProjectBuild) -> Vec<String> {
    project
        .env
        .iter()
        .flat_map(|(k, v)| ["-e".to_string(), format!("{}={}", k, v)])
        .collect()
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
