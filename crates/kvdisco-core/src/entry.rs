//! Member Entries
//!
//! A member is published as a `host:port` value under the namespace. The
//! watch loop rebuilds a full [`Entries`] snapshot from every listing it
//! receives; values that do not decode are dropped from that snapshot.

use crate::KvPair;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntryError {
    #[error("missing port in address {0:?}")]
    MissingPort(String),
    #[error("missing host in address {0:?}")]
    MissingHost(String),
    #[error("too many colons in address {0:?}")]
    TooManyColons(String),
    #[error("missing ']' in address {0:?}")]
    UnclosedBracket(String),
    #[error("address is not valid UTF-8")]
    InvalidUtf8,
}

/// A decoded cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    pub host: String,
    pub port: String,
}

impl Entry {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Split a `host:port` address. Bracketed IPv6 hosts (`[::1]:2375`) are
    /// accepted and stored without the brackets.
    pub fn parse(addr: &str) -> Result<Self, EntryError> {
        let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| EntryError::UnclosedBracket(addr.to_string()))?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| EntryError::MissingPort(addr.to_string()))?;
            (host, port)
        } else {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| EntryError::MissingPort(addr.to_string()))?;
            if host.contains(':') {
                return Err(EntryError::TooManyColons(addr.to_string()));
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(EntryError::MissingHost(addr.to_string()));
        }
        if port.is_empty() || port.contains(':') {
            return Err(EntryError::MissingPort(addr.to_string()));
        }

        Ok(Self::new(host, port))
    }

    /// Decode a raw backend value.
    pub fn from_bytes(value: &[u8]) -> Result<Self, EntryError> {
        let addr = std::str::from_utf8(value).map_err(|_| EntryError::InvalidUtf8)?;
        Self::parse(addr)
    }
}

impl FromStr for Entry {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A complete membership snapshot, ordered by key path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entries(Vec<Entry>);

impl Entries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a backend listing into a snapshot.
    ///
    /// Pairs are ordered by ascending key before decoding. A value that is
    /// not a valid `host:port` is skipped; the rest of the listing is kept.
    pub fn from_kv_pairs(pairs: &[KvPair]) -> Self {
        let mut sorted: Vec<&KvPair> = pairs.iter().collect();
        sorted.sort_by(|a, b| a.key.cmp(&b.key));

        let entries = sorted
            .into_iter()
            .filter_map(|pair| match Entry::from_bytes(&pair.value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(key = %pair.key, error = %e, "Skipping undecodable member entry");
                    None
                }
            })
            .collect();

        Self(entries)
    }

    /// Build a snapshot from plain addresses. Empty strings are ignored.
    pub fn from_addrs<I, A>(addrs: I) -> Result<Self, EntryError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        addrs
            .into_iter()
            .filter(|addr| !addr.as_ref().is_empty())
            .map(|addr| Entry::parse(addr.as_ref()))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry> {
        self.0.iter()
    }

    pub fn contains(&self, entry: &Entry) -> bool {
        self.0.contains(entry)
    }

    /// Compare against a newer snapshot.
    ///
    /// Returns `(added, removed)`: members present only in `next`, and
    /// members present only in `self`.
    pub fn diff(&self, next: &Entries) -> (Entries, Entries) {
        let added = next
            .iter()
            .filter(|entry| !self.contains(entry))
            .cloned()
            .collect();
        let removed = self
            .iter()
            .filter(|entry| !next.contains(entry))
            .cloned()
            .collect();
        (Self(added), Self(removed))
    }
}

impl From<Vec<Entry>> for Entries {
    fn from(entries: Vec<Entry>) -> Self {
        Self(entries)
    }
}

impl FromIterator<Entry> for Entries {
    fn from_iter<T: IntoIterator<Item = Entry>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Entries {
    type Item = Entry;
    type IntoIter = std::vec::IntoIter<Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Entries {
    type Item = &'a Entry;
    type IntoIter = std::slice::Iter<'a, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
