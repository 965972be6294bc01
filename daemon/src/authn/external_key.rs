//! Keys issued by third parties, used to verify webhook deliveries

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretSlice};
use thiserror::Error;
use tracing::debug;

/// Shortest accepted shared secret
const MIN_SECRET_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum ExternalKeyError {
    #[error("unable to read key from {origin}: {reason}")]
    Unreadable { origin: String, reason: String },

    #[error("no recognizable key in {0}")]
    Unrecognized(String),
}

/// Where to load a key from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    File(PathBuf),
    Url(url::Url),
}

impl KeySource {
    /// `http(s)://` strings are URLs, anything else is a path
    pub fn parse(raw: &str) -> Self {
        match url::Url::parse(raw) {
            Ok(url) if url.scheme() == "https" || url.scheme() == "http" => KeySource::Url(url),
            _ => KeySource::File(PathBuf::from(raw)),
        }
    }
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::File(path) => write!(f, "{}", path.display()),
            KeySource::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Shape of a loaded key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyKind {
    /// PEM block; material is the decoded DER body
    Pem { label: String },
    /// Single-line shared secret; material is its bytes
    SharedSecret,
}

/// A third-party key
pub struct ExternalKey {
    kind: KeyKind,
    material: SecretSlice<u8>,
}

impl fmt::Debug for ExternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalKey")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ExternalKey {
    /// Recognize a key in text content
    pub fn parse(content: &str) -> Option<Self> {
        if content.contains("-----BEGIN ") {
            return parse_pem(content);
        }

        let secret = content.trim();
        let single_line = !secret.contains('\n');
        let printable = secret.chars().all(|c| c.is_ascii_graphic());
        if single_line && printable && secret.len() >= MIN_SECRET_LEN {
            return Some(Self {
                kind: KeyKind::SharedSecret,
                material: secret.as_bytes().to_vec().into(),
            });
        }
        None
    }

    pub fn kind(&self) -> &KeyKind {
        &self.kind
    }

    /// Bytes used as the HMAC key or compared against provider tokens
    pub fn material(&self) -> &[u8] {
        self.material.expose_secret()
    }
}

fn parse_pem(content: &str) -> Option<ExternalKey> {
    let mut lines = content.lines().map(str::trim);
    let label = lines
        .by_ref()
        .find_map(|l| l.strip_prefix("-----BEGIN ")?.strip_suffix("-----"))?
        .to_string();
    let end = format!("-----END {}-----", label);

    let mut body = String::new();
    let mut terminated = false;
    for line in lines {
        if line == end {
            terminated = true;
            break;
        }
        // encapsulated headers such as Proc-Type
        if line.contains(':') {
            continue;
        }
        body.push_str(line);
    }
    if !terminated || body.is_empty() {
        return None;
    }

    let der = STANDARD.decode(body).ok()?;
    Some(ExternalKey {
        kind: KeyKind::Pem { label },
        material: der.into(),
    })
}

/// Fetch and parse a key from its source
pub async fn load_external_key(source: &KeySource) -> Result<ExternalKey, ExternalKeyError> {
    let unreadable = |reason: String| ExternalKeyError::Unreadable {
        origin: source.to_string(),
        reason,
    };

    let content = match source {
        KeySource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?,
        KeySource::Url(url) => {
            debug!(%url, "fetching external key");
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .map_err(|e| unreadable(e.to_string()))?;
            let response = client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| unreadable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(unreadable(format!("HTTP {}", response.status())));
            }
            response.text().await.map_err(|e| unreadable(e.to_string()))?
        }
    };

    ExternalKey::parse(&content).ok_or_else(|| ExternalKeyError::Unrecognized(source.to_string()))
}
