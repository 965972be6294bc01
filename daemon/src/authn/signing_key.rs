//! Token signing key lifecycle

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretSlice};
use tracing::info;

use crate::errors::DaemonError;
use crate::filesys::file::File;

const KEY_LEN: usize = 32;

/// Symmetric key used to sign session and API tokens
pub struct SigningKey(SecretSlice<u8>);

impl SigningKey {
    /// Generate a fresh random key
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.into())
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes.into())
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }

    /// Load the persisted key, generating and persisting one on first boot
    pub async fn load_or_generate(file: &File) -> Result<Self, DaemonError> {
        if file.exists().await {
            let encoded = file.read_string().await?;
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| DaemonError::StorageError(format!("corrupt signing key: {e}")))?;
            if bytes.len() < KEY_LEN {
                return Err(DaemonError::StorageError(format!(
                    "signing key at {} is too short",
                    file.path().display()
                )));
            }
            return Ok(Self::from_bytes(bytes));
        }

        info!(path = %file.path().display(), "generating token signing key");
        let key = Self::generate();
        file.write_bytes(STANDARD.encode(key.expose()).as_bytes())
            .await?;
        file.set_permissions_600().await?;
        Ok(key)
    }
}
