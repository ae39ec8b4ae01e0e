use bytes::Bytes;

/// One key from a backend subtree listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    /// Full key path of the member entry
    pub key: String,
    /// Raw value, a UTF-8 `host:port` for well-formed members
    pub value: Bytes,
}

impl KvPair {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
