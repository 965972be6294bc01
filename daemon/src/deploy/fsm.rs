//! Finite state machine for the tracked deployment

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// No project deployed
    Uninitialized,

    /// Checking out and building
    Building,

    /// Containers started
    Running,

    /// Containers being stopped
    Stopping,

    /// Containers stopped, images and volumes kept
    Stopped,

    /// Containers, images and networks being removed
    Destroying,

    /// Build, stop or destroy failed
    Failed,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Uninitialized => "uninitialized",
            DeploymentState::Building => "building",
            DeploymentState::Running => "running",
            DeploymentState::Stopping => "stopping",
            DeploymentState::Stopped => "stopped",
            DeploymentState::Destroying => "destroying",
            DeploymentState::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Start a build
    Build,

    /// Build finished and containers started
    BuildSucceeded,

    /// Build or start failed
    BuildFailed(String),

    /// Start stopping containers
    Stop,

    /// Containers stopped
    Stopped,

    /// Stop failed
    StopFailed(String),

    /// Start tearing everything down
    Destroy,

    /// Teardown finished
    Destroyed,

    /// Teardown failed
    DestroyFailed(String),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM with nothing deployed
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Uninitialized,
            error: None,
        }
    }

    /// Resume at a state observed at boot
    pub fn restore(state: DeploymentState) -> Self {
        Self { state, error: None }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Error that moved the deployment to `Failed`
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.state != DeploymentState::Uninitialized
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (DeploymentState::Uninitialized, DeploymentEvent::Build)
            | (DeploymentState::Stopped, DeploymentEvent::Build) => {
                self.error = None;
                DeploymentState::Building
            }

            (DeploymentState::Building, DeploymentEvent::BuildSucceeded) => DeploymentState::Running,
            (DeploymentState::Building, DeploymentEvent::BuildFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            (DeploymentState::Running, DeploymentEvent::Stop) => DeploymentState::Stopping,
            (DeploymentState::Stopping, DeploymentEvent::Stopped) => DeploymentState::Stopped,
            (DeploymentState::Stopping, DeploymentEvent::StopFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            (DeploymentState::Uninitialized, DeploymentEvent::Destroy)
            | (DeploymentState::Destroying, DeploymentEvent::Destroy) => {
                return Err(format!(
                    "Invalid transition: {:?} -> {:?}",
                    self.state, event
                ));
            }
            (_, DeploymentEvent::Destroy) => DeploymentState::Destroying,
            (DeploymentState::Destroying, DeploymentEvent::Destroyed) => {
                self.error = None;
                DeploymentState::Uninitialized
            }
            (DeploymentState::Destroying, DeploymentEvent::DestroyFailed(err)) => {
                self.error = Some(err.clone());
                DeploymentState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
