//! Password hashing

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::errors::DaemonError;

/// Hash a password into a PHC string with a fresh random salt
pub fn hash_password(plain: &str) -> Result<String, DaemonError> {
    let salt = SaltString::generate(&mut argon2::password_hash::rand_core::OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| DaemonError::Internal(format!("password hash failed: {e}")))?
        .to_string();
    Ok(hash)
}

/// Check a password against a stored PHC string
pub fn verify_password(plain: &str, hash: &str) -> Result<bool, DaemonError> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| DaemonError::StorageError(format!("invalid password hash: {e}")))?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}
