//! Namespace parsing
//!
//! A discovery uri has the form `endpoint[,endpoint...][/path]`. The
//! endpoints address the backend; the optional path scopes the member keys,
//! and the configured discovery sub-path is always appended to it.

use crate::error::DiscoveryError;

/// Backend endpoints plus the key prefix member entries live under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    endpoints: Vec<String>,
    path: String,
}

impl Namespace {
    pub fn parse(uri: &str, discovery_path: &str) -> Result<Self, DiscoveryError> {
        let invalid = |reason| DiscoveryError::InvalidUri {
            uri: uri.to_string(),
            reason,
        };

        let (hosts, scope) = match uri.split_once('/') {
            Some((hosts, scope)) => (hosts, scope.trim_end_matches('/')),
            None => (uri, ""),
        };

        if hosts.is_empty() {
            return Err(invalid("no endpoints"));
        }
        let endpoints: Vec<String> = hosts.split(',').map(str::to_string).collect();
        if endpoints.iter().any(String::is_empty) {
            return Err(invalid("empty endpoint"));
        }

        let discovery_path = discovery_path.trim_matches('/');
        let path = if scope.is_empty() {
            discovery_path.to_string()
        } else {
            format!("{scope}/{discovery_path}")
        };

        Ok(Self { endpoints, path })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Key under which the member at `addr` is registered.
    pub fn key_for(&self, addr: &str) -> String {
        format!("{}/{}", self.path, addr)
    }
}
