//! Startup sequence: TLS material and build-tool images

pub mod certs;
pub mod images;

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use crate::deploy::engine::ContainerEngine;

use self::certs::{ensure_certificate, CertPaths, CertStatus};
use self::images::{prewarm, Warmup, WarmupReport};

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("certificate generation failed: {0}")]
    Certificate(String),

    #[error("unable to write {path}: {reason}")]
    Write { path: String, reason: String },
}

#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    pub cert: CertPaths,
    pub host: String,
    pub port: u16,
    /// Images the builders need
    pub images: Vec<String>,
}

/// What startup produced
pub struct Bootstrap {
    pub certificate: CertStatus,
    /// Flips once every image pull has finished
    pub warmup: Warmup,
    pub prewarm: JoinHandle<WarmupReport>,
}

/// Start image pulls, then provision TLS material.
///
/// Only a certificate failure is an error; pulls keep running in the
/// background and report through the returned handle.
pub async fn run(
    options: &BootstrapOptions,
    engine: Arc<dyn ContainerEngine>,
) -> Result<Bootstrap, BootstrapError> {
    info!(images = ?options.images, "pre-warming build tool images");
    let (warmup, prewarm) = prewarm(engine, options.images.clone());

    let certificate = match ensure_certificate(&options.cert, &options.host, options.port).await {
        Ok(status) => status,
        Err(e) => {
            prewarm.abort();
            return Err(e);
        }
    };

    Ok(Bootstrap {
        certificate,
        warmup,
        prewarm,
    })
}
