//! Settings file management

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::logs::LogLevel;
use crate::storage::layout::DEFAULT_BASE_DIR;

/// Daemon settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit stdout logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Host name or address the daemon is reachable at; bound into the certificate
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to serve HTTPS on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base directory for daemon state
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Directory holding `daemon.cert` and `daemon.key`
    #[serde(default)]
    pub ssl_dir: Option<PathBuf>,

    /// User credential database path
    #[serde(default)]
    pub users_db: Option<PathBuf>,

    /// Deployment metadata database path
    #[serde(default)]
    pub deployment_db: Option<PathBuf>,

    /// Where the tracked repository is checked out
    #[serde(default)]
    pub project_dir: Option<PathBuf>,

    /// File path or https URL of the key used to verify webhooks
    #[serde(default)]
    pub webhook_key: Option<String>,

    /// SSH private key used for git operations
    #[serde(default)]
    pub deploy_key: Option<PathBuf>,

    /// Session token lifetime
    #[serde(default = "default_session_ttl")]
    pub session_ttl_minutes: i64,

    /// Container engine binary
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Images pre-pulled at startup and used by the builders
    #[serde(default)]
    pub build_tools: BuildToolSettings,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4303
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BASE_DIR)
}

fn default_session_ttl() -> i64 {
    120
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            host: default_host(),
            port: default_port(),
            base_dir: default_base_dir(),
            ssl_dir: None,
            users_db: None,
            deployment_db: None,
            project_dir: None,
            webhook_key: None,
            deploy_key: None,
            session_ttl_minutes: default_session_ttl(),
            docker_bin: default_docker_bin(),
            build_tools: BuildToolSettings::default(),
        }
    }
}

/// Build tool images
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildToolSettings {
    #[serde(default = "default_compose_image")]
    pub compose_image: String,

    #[serde(default = "default_buildpack_image")]
    pub buildpack_image: String,
}

fn default_compose_image() -> String {
    "docker/compose:1.29.2".to_string()
}

fn default_buildpack_image() -> String {
    "gliderlabs/herokuish:v0.5.43".to_string()
}

impl Default for BuildToolSettings {
    fn default() -> Self {
        Self {
            compose_image: default_compose_image(),
            buildpack_image: default_buildpack_image(),
        }
    }
}

impl BuildToolSettings {
    /// Every image the builders need
    pub fn images(&self) -> Vec<String> {
        vec![self.compose_image.clone(), self.buildpack_image.clone()]
    }
}
