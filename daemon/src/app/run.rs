//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, LifecycleOptions};
use crate::app::state::AppState;
use crate::authn::signing_key::SigningKey;
use crate::authn::token::TokenService;
use crate::authn::users::CredentialStore;
use crate::errors::DaemonError;
use crate::server::serve::serve;
use crate::server::state::ServerState;
use crate::workers::redeploy::{self, RedeployJob};

/// Run the deployment daemon
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), DaemonError> {
    info!("Initializing deployd...");

    // Create shutdown channel
    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, shutdown_tx.clone(), &mut shutdown_manager).await {
        error!("Failed to start daemon: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Mint an admin API token and register it with the credential store
pub async fn mint_api_token(options: &AppOptions) -> Result<String, DaemonError> {
    options.storage.layout.setup().await?;
    let key = SigningKey::load_or_generate(&options.storage.signing_key_file).await?;
    let tokens = TokenService::new(key, options.session_ttl);
    let users = CredentialStore::open(options.storage.users_file.clone()).await?;

    let issued = tokens.issue_api_token()?;
    users
        .register_api_token(&issued.claims.jti)
        .await
        .map_err(|e| DaemonError::StorageError(e.to_string()))?;
    Ok(issued.token)
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), DaemonError> {
    let (app_state, jobs, prewarm_handle) = AppState::init(options).await?;
    shutdown_manager.with_prewarm_handle(prewarm_handle)?;
    let app_state = Arc::new(app_state);

    init_redeploy_worker(
        options.redeploy_worker.clone(),
        app_state.clone(),
        jobs,
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    init_server(options, app_state, shutdown_manager, shutdown_tx.subscribe()).await
}

fn init_redeploy_worker(
    options: redeploy::Options,
    app_state: Arc<AppState>,
    jobs: mpsc::Receiver<RedeployJob>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    info!("Initializing redeploy worker...");

    let deployer = app_state.deployer.clone();
    let engine = app_state.engine.clone();

    let handle = tokio::spawn(async move {
        redeploy::run(
            &options,
            deployer,
            engine,
            jobs,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_redeploy_worker_handle(handle)
}

async fn init_server(
    options: &AppOptions,
    app_state: Arc<AppState>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    info!("Initializing HTTPS server...");

    let server_state = ServerState::new(
        app_state.deployer.clone(),
        app_state.engine.clone(),
        app_state.tokens.clone(),
        app_state.users.clone(),
        app_state.webhook_key.clone(),
        app_state.redeploys.clone(),
    );

    let server_handle = serve(&options.server, Arc::new(server_state), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    shutdown_manager.with_server_handle(server_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    server_handle: Option<JoinHandle<Result<(), DaemonError>>>,
    redeploy_worker_handle: Option<JoinHandle<()>>,
    prewarm_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            server_handle: None,
            redeploy_worker_handle: None,
            prewarm_handle: None,
        }
    }

    fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), DaemonError>>,
    ) -> Result<(), DaemonError> {
        if self.server_handle.is_some() {
            return Err(DaemonError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    fn with_redeploy_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DaemonError> {
        if self.redeploy_worker_handle.is_some() {
            return Err(DaemonError::ShutdownError("redeploy_handle already set".to_string()));
        }
        self.redeploy_worker_handle = Some(handle);
        Ok(())
    }

    fn with_prewarm_handle(&mut self, handle: JoinHandle<()>) -> Result<(), DaemonError> {
        if self.prewarm_handle.is_some() {
            return Err(DaemonError::ShutdownError("prewarm_handle already set".to_string()));
        }
        self.prewarm_handle = Some(handle);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), DaemonError> {
        let _ = self.shutdown_tx.send(());

        match tokio::time::timeout(
            self.lifecycle_options.max_shutdown_delay,
            self.shutdown_impl(),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                error!(
                    "Shutdown timed out after {:?}, forcing shutdown...",
                    self.lifecycle_options.max_shutdown_delay
                );
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), DaemonError> {
        info!("Shutting down deployd...");

        // 1. Server, so no new redeploys are queued
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| DaemonError::ShutdownError(e.to_string()))??;
        }

        // 2. Redeploy worker; a redeploy in flight runs to completion
        if let Some(handle) = self.redeploy_worker_handle.take() {
            handle.await.map_err(|e| DaemonError::ShutdownError(e.to_string()))?;
        }

        // 3. Image pre-warming
        if let Some(handle) = self.prewarm_handle.take() {
            handle.abort();
        }

        info!("Shutdown complete");
        Ok(())
    }
}
