//! Application state management

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::authn::external_key::{load_external_key, ExternalKey};
use crate::authn::signing_key::SigningKey;
use crate::authn::token::TokenService;
use crate::authn::users::CredentialStore;
use crate::bootstrap::{self, BootstrapOptions};
use crate::deploy::deployer::Deployer;
use crate::deploy::deployment::Deployment;
use crate::deploy::docker::DockerCli;
use crate::deploy::engine::ContainerEngine;
use crate::deploy::git::GitCli;
use crate::errors::DaemonError;
use crate::workers::redeploy::{RedeployJob, RedeployQueue};

/// Main application state
pub struct AppState {
    pub tokens: Arc<TokenService>,

    pub users: Arc<CredentialStore>,

    /// Shared container engine client
    pub engine: Arc<dyn ContainerEngine>,

    /// The single tracked deployment
    pub deployer: Arc<dyn Deployer>,

    /// `None` when no key is configured or it failed to load
    pub webhook_key: Option<Arc<ExternalKey>>,

    pub redeploys: RedeployQueue,
}

impl AppState {
    /// Run the bootstrap sequence and load persisted state.
    ///
    /// Returns the receiving end of the redeploy queue and a handle that
    /// resolves once image pre-warming has been reported.
    pub async fn init(
        options: &AppOptions,
    ) -> Result<(Self, mpsc::Receiver<RedeployJob>, JoinHandle<()>), DaemonError> {
        info!("Initializing application state...");
        options.storage.layout.setup().await?;

        let engine: Arc<dyn ContainerEngine> = Arc::new(DockerCli::new(
            options.docker_bin.clone(),
            options.build_tools.clone(),
        ));

        // TLS failure is fatal; image pulls continue in the background
        let boot = bootstrap::run(
            &BootstrapOptions {
                cert: options.server.tls.clone(),
                host: options.server.host.clone(),
                port: options.server.port,
                images: options.build_tools.images(),
            },
            engine.clone(),
        )
        .await?;
        info!(certificate = ?boot.certificate, "TLS material ready");

        let report_handle = tokio::spawn(async move {
            match boot.prewarm.await {
                Ok(report) => {
                    let failed = report.failed().count();
                    if failed > 0 {
                        warn!(failed, total = report.results.len(), "some build tool images could not be pulled");
                    } else {
                        info!(total = report.results.len(), "build tool images ready");
                    }
                }
                Err(e) => warn!(error = %e, "image pre-warming aborted"),
            }
        });

        let key = SigningKey::load_or_generate(&options.storage.signing_key_file).await?;
        let tokens = Arc::new(TokenService::new(key, options.session_ttl));
        let users = Arc::new(CredentialStore::open(options.storage.users_file.clone()).await?);

        let webhook_key = match &options.webhook_key {
            Some(source) => match load_external_key(source).await {
                Ok(key) => {
                    info!(source = %source, kind = ?key.kind(), "webhook key loaded");
                    Some(Arc::new(key))
                }
                Err(e) => {
                    warn!(error = %e, "webhook key unavailable, webhooks will be rejected");
                    None
                }
            },
            None => None,
        };

        let source = Arc::new(GitCli::new(options.deploy_key.clone()));
        let deployment = Deployment::load(
            options.storage.deployment_file.clone(),
            options.storage.project_dir.clone(),
            source,
            boot.warmup,
        )
        .await?;
        deployment.recover(engine.as_ref()).await;

        let (redeploys, jobs) = RedeployQueue::new(options.redeploy_queue_capacity);

        let state = Self {
            tokens,
            users,
            engine,
            deployer: Arc::new(deployment),
            webhook_key,
            redeploys,
        };
        Ok((state, jobs, report_handle))
    }
}
