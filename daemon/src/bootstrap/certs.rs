//! Self-signed TLS material for the daemon listener

use anyhow::Context;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use tracing::info;

use crate::bootstrap::BootstrapError;
use crate::filesys::file::File;

/// Certificate and key locations
#[derive(Debug, Clone)]
pub struct CertPaths {
    pub cert: File,
    pub key: File,
}

/// Whether the pair was already present
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStatus {
    Existing,
    Generated,
}

/// Make sure a certificate/key pair exists, generating one bound to
/// `host:port` when either file is missing
pub async fn ensure_certificate(
    paths: &CertPaths,
    host: &str,
    port: u16,
) -> Result<CertStatus, BootstrapError> {
    if paths.cert.exists().await && paths.key.exists().await {
        info!(cert = %paths.cert.path().display(), "using existing TLS certificate");
        return Ok(CertStatus::Existing);
    }

    let (cert_pem, key_pem) = generate_self_signed(host, port)
        .map_err(|e| BootstrapError::Certificate(format!("{:#}", e)))?;

    let write_err = |file: &File, e: crate::errors::DaemonError| BootstrapError::Write {
        path: file.path().display().to_string(),
        reason: e.to_string(),
    };
    paths
        .key
        .write_atomic(key_pem.as_bytes())
        .await
        .map_err(|e| write_err(&paths.key, e))?;
    paths
        .key
        .set_permissions_600()
        .await
        .map_err(|e| write_err(&paths.key, e))?;
    paths
        .cert
        .write_atomic(cert_pem.as_bytes())
        .await
        .map_err(|e| write_err(&paths.cert, e))?;

    info!(
        cert = %paths.cert.path().display(),
        identity = %format!("{}:{}", host, port),
        "generated self-signed TLS certificate"
    );
    Ok(CertStatus::Generated)
}

/// PEM encoded certificate and private key
fn generate_self_signed(host: &str, port: u16) -> anyhow::Result<(String, String)> {
    let mut params =
        CertificateParams::new(vec![host.to_string()]).context("invalid subject alternative name")?;
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, format!("{}:{}", host, port));
    name.push(DnType::OrganizationName, "deployd");
    params.distinguished_name = name;

    let key_pair = KeyPair::generate().context("key generation failed")?;
    let cert = params.self_signed(&key_pair).context("self-signing failed")?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}
