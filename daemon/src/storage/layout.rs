//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::DaemonError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Default base directory for all daemon state
pub const DEFAULT_BASE_DIR: &str = "/var/lib/deployd";

/// Storage layout for the daemon
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Directory holding the TLS certificate and key
    pub fn ssl_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("ssl"))
    }

    /// Directory holding the credential and deployment databases
    pub fn data_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("data"))
    }

    /// User credential database
    pub fn users_file(&self) -> File {
        self.data_dir().file("users.json")
    }

    /// Deployment metadata database
    pub fn deployment_file(&self) -> File {
        self.data_dir().file("deployment.json")
    }

    /// Token signing key
    pub fn signing_key_file(&self) -> File {
        self.data_dir().file("signing.key")
    }

    /// Checkout of the tracked repository
    pub fn project_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("project"))
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), DaemonError> {
        self.ssl_dir().create().await?;
        self.data_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR)
    }
}
