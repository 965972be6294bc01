//! Authentication: credentials, session tokens and third-party keys

pub mod external_key;
pub mod password;
pub mod signing_key;
pub mod token;
pub mod users;

use serde::{Deserialize, Serialize};

/// Subject used for admin API tokens
pub const ADMIN_SUBJECT: &str = "admin";

/// Role attached to a user and carried in its tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// The authenticated caller of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
    pub role: Role,
}

impl Identity {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self {
            subject: subject.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
