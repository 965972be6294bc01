//! Credential store: user records and admin API token registrations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::authn::password::{hash_password, verify_password};
use crate::authn::Role;
use crate::errors::DaemonError;
use crate::filesys::file::File;

/// Shortest accepted password
const MIN_PASSWORD_LEN: usize = 5;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("user {0} already exists")]
    UserExists(String),

    #[error("user {0} not found")]
    UnknownUser(String),

    #[error("invalid username or password")]
    InvalidLogin,

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] DaemonError),
}

/// A stored user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    #[serde(default)]
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApiTokenRecord {
    id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialDb {
    #[serde(default)]
    users: Vec<UserRecord>,
    #[serde(default)]
    api_tokens: Vec<ApiTokenRecord>,
}

/// JSON-file backed credential database
pub struct CredentialStore {
    file: File,
    db: RwLock<CredentialDb>,
}

impl CredentialStore {
    /// Open the store, starting empty if the file does not exist yet
    pub async fn open(file: File) -> Result<Self, DaemonError> {
        let db = file.read_json_opt::<CredentialDb>().await?.unwrap_or_default();
        info!(
            path = %file.path().display(),
            users = db.users.len(),
            "credential store loaded"
        );
        Ok(Self {
            file,
            db: RwLock::new(db),
        })
    }

    /// Register a new user
    pub async fn add_user(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> Result<(), CredentialError> {
        validate_username(username)?;
        validate_password(password)?;

        let mut db = self.db.write().await;
        if db.users.iter().any(|u| u.username == username) {
            return Err(CredentialError::UserExists(username.to_string()));
        }

        let mut next = db.clone();
        next.users.push(UserRecord {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            role,
            disabled: false,
            created_at: Utc::now(),
        });
        self.file.write_json(&next).await?;
        *db = next;

        info!(username, ?role, "user added");
        Ok(())
    }

    /// Check a username/password pair
    pub async fn verify(&self, username: &str, password: &str) -> Result<UserRecord, CredentialError> {
        let db = self.db.read().await;
        let user = db
            .users
            .iter()
            .find(|u| u.username == username && !u.disabled)
            .ok_or(CredentialError::InvalidLogin)?;
        if !verify_password(password, &user.password_hash)? {
            return Err(CredentialError::InvalidLogin);
        }
        Ok(user.clone())
    }

    /// Replace a user's password after checking the old one
    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), CredentialError> {
        validate_password(new_password)?;

        let mut db = self.db.write().await;
        let index = db
            .users
            .iter()
            .position(|u| u.username == username && !u.disabled)
            .ok_or(CredentialError::InvalidLogin)?;
        if !verify_password(old_password, &db.users[index].password_hash)? {
            return Err(CredentialError::InvalidLogin);
        }

        let mut next = db.clone();
        next.users[index].password_hash = hash_password(new_password)?;
        self.file.write_json(&next).await?;
        *db = next;
        Ok(())
    }

    /// Soft-delete a user; their record stays but can no longer log in
    pub async fn disable_user(&self, username: &str) -> Result<(), CredentialError> {
        let mut db = self.db.write().await;
        let index = db
            .users
            .iter()
            .position(|u| u.username == username)
            .ok_or_else(|| CredentialError::UnknownUser(username.to_string()))?;

        let mut next = db.clone();
        next.users[index].disabled = true;
        self.file.write_json(&next).await?;
        *db = next;

        info!(username, "user disabled");
        Ok(())
    }

    /// Drop every user record. API token registrations are kept.
    pub async fn reset(&self) -> Result<(), CredentialError> {
        let mut db = self.db.write().await;
        let mut next = db.clone();
        next.users.clear();
        self.file.write_json(&next).await?;
        *db = next;

        info!("all users removed");
        Ok(())
    }

    pub async fn list(&self) -> Vec<UserRecord> {
        self.db.read().await.users.clone()
    }

    /// Record a minted admin API token by its id
    pub async fn register_api_token(&self, id: &str) -> Result<(), CredentialError> {
        let mut db = self.db.write().await;
        let mut next = db.clone();
        next.api_tokens.push(ApiTokenRecord {
            id: id.to_string(),
            created_at: Utc::now(),
        });
        self.file.write_json(&next).await?;
        *db = next;
        Ok(())
    }

    pub async fn has_api_token(&self, id: &str) -> bool {
        self.db.read().await.api_tokens.iter().any(|t| t.id == id)
    }
}

fn validate_username(username: &str) -> Result<(), CredentialError> {
    if username.is_empty() || username.chars().any(char::is_whitespace) {
        return Err(CredentialError::Invalid(
            "username must be non-empty and contain no whitespace".to_string(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), CredentialError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(CredentialError::Invalid(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
