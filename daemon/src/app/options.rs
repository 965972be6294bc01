//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::authn::external_key::KeySource;
use crate::bootstrap::certs::CertPaths;
use crate::errors::DaemonError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{BuildToolSettings, Settings};
use crate::workers::redeploy;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Server configuration
    pub server: ServerOptions,

    /// Session token lifetime
    pub session_ttl: chrono::Duration,

    /// Where to load the webhook verification key from
    pub webhook_key: Option<KeySource>,

    /// SSH key handed to git
    pub deploy_key: Option<PathBuf>,

    /// Container engine binary
    pub docker_bin: String,

    /// Images pre-pulled at startup
    pub build_tools: BuildToolSettings,

    /// Redeploy worker options
    pub redeploy_worker: redeploy::Options,

    /// Webhook redeploys that may wait behind the running one
    pub redeploy_queue_capacity: usize,
}

impl AppOptions {
    /// Resolve every runtime value from the settings file
    pub fn from_settings(settings: &Settings) -> Result<Self, DaemonError> {
        let session_ttl = session_ttl(settings.session_ttl_minutes)?;
        let layout = StorageLayout::new(settings.base_dir.clone());
        let ssl_dir = settings
            .ssl_dir
            .clone()
            .map(Dir::new)
            .unwrap_or_else(|| layout.ssl_dir());
        let tls = CertPaths {
            cert: ssl_dir.file("daemon.cert"),
            key: ssl_dir.file("daemon.key"),
        };

        let storage = StorageOptions {
            users_file: settings
                .users_db
                .clone()
                .map(File::new)
                .unwrap_or_else(|| layout.users_file()),
            deployment_file: settings
                .deployment_db
                .clone()
                .map(File::new)
                .unwrap_or_else(|| layout.deployment_file()),
            project_dir: settings
                .project_dir
                .clone()
                .map(Dir::new)
                .unwrap_or_else(|| layout.project_dir()),
            signing_key_file: layout.signing_key_file(),
            layout: layout.clone(),
        };

        Ok(Self {
            lifecycle: LifecycleOptions::default(),
            server: ServerOptions {
                host: settings.host.clone(),
                port: settings.port,
                tls,
            },
            session_ttl,
            webhook_key: settings.webhook_key.as_deref().map(KeySource::parse),
            deploy_key: settings.deploy_key.clone(),
            docker_bin: settings.docker_bin.clone(),
            build_tools: settings.build_tools.clone(),
            redeploy_worker: redeploy::Options {
                log_file: layout.logs_dir().file("deploy.log"),
            },
            redeploy_queue_capacity: 4,
            storage,
        })
    }
}

/// Sessions must outlive the login that issued them
fn session_ttl(minutes: i64) -> Result<chrono::Duration, DaemonError> {
    if minutes <= 0 {
        return Err(DaemonError::ConfigError(format!(
            "session_ttl_minutes must be positive, got {}",
            minutes
        )));
    }
    chrono::Duration::try_minutes(minutes).ok_or_else(|| {
        DaemonError::ConfigError(format!("session_ttl_minutes is too large: {}", minutes))
    })
}

/// Lifecycle options for the daemon
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    pub users_file: File,

    pub deployment_file: File,

    pub signing_key_file: File,

    /// Checkout of the tracked repository
    pub project_dir: Dir,
}

/// HTTPS server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Certificate served to clients
    pub tls: CertPaths,
}
