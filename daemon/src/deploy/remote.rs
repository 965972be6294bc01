//! Git remote identity

use std::fmt;

/// Host and path a remote URL points at, independent of transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteIdentity {
    pub host: String,
    pub path: String,
}

impl fmt::Display for RemoteIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.path)
    }
}

impl RemoteIdentity {
    /// Parse an scp-style (`git@host:org/repo.git`) or URL-style
    /// (`https://`, `ssh://`, `git://`) remote
    pub fn parse(remote: &str) -> Option<Self> {
        let remote = remote.trim();
        if remote.is_empty() {
            return None;
        }

        let (host, path) = if remote.contains("://") {
            let url = url::Url::parse(remote).ok()?;
            (url.host_str()?.to_string(), url.path().to_string())
        } else {
            // scp-like: [user@]host:path
            let (authority, path) = remote.split_once(':')?;
            if authority.contains('/') {
                return None;
            }
            let host = authority.rsplit('@').next()?;
            (host.to_string(), path.to_string())
        };

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path).trim_end_matches('/');
        if host.is_empty() || path.is_empty() {
            return None;
        }

        Some(Self {
            host: host.to_lowercase(),
            path: path.to_lowercase(),
        })
    }

    /// Whether two remote URLs refer to the same repository
    pub fn same_repository(a: &str, b: &str) -> bool {
        match (Self::parse(a), Self::parse(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
