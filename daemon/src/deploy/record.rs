//! Persisted deployment metadata

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use deployd_api::models::{BuildProfile, ProjectSpec};

/// What is deployed and how; survives daemon restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub project: String,
    pub remote: String,
    pub branch: String,
    #[serde(default)]
    pub profile: BuildProfile,
    #[serde(default)]
    pub build_file: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn from_project(project: &ProjectSpec) -> Self {
        Self {
            project: project.name.clone(),
            remote: project.remote.clone(),
            branch: project.branch.clone(),
            profile: project.profile,
            build_file: project.build_file.clone(),
            env: BTreeMap::new(),
            commit: None,
            deployed_at: None,
        }
    }
}

/// Project names become container and image name prefixes
pub fn validate_project_name(name: &str) -> Result<(), String> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    let starts_alnum = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);
    if !valid_chars || !starts_alnum {
        return Err(format!(
            "invalid project name {:?}: use lowercase letters, digits, '-' and '_'",
            name
        ));
    }
    Ok(())
}
