//! Core shared types for kvdisco
//!
//! Membership entries decoded from the key-value namespace, and the raw
//! key/value pairs backends hand back from a subtree listing.

mod entry;
mod kv;

pub use entry::{Entries, Entry, EntryError};
pub use kv::KvPair;
