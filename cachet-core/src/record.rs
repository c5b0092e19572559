//! Entity record and key traits.
//!
//! Types implementing these traits can be cached, batch-fetched, and used
//! as members of query result structures.

use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Serialize};

/// Ordered, encodable entity identifier.
///
/// Keys must be totally ordered (the batch reconciliation diff walks ids in
/// ascending order) and must round-trip through their string encoding, which
/// is what gets embedded in cache keys, query result structures, and reverse
/// hash fields.
///
/// A blanket implementation covers any `Display + FromStr` type with the
/// required ordering bounds, so `u64`, `String`, and `uuid::Uuid` all work
/// out of the box.
pub trait EntityKey: Clone + Eq + Ord + Hash + Send + Sync + 'static {
    /// Encode the key for embedding in cache structures.
    fn encode(&self) -> String;

    /// Decode a key previously produced by [`encode`](Self::encode).
    ///
    /// Returns `None` when the raw value is not a valid encoding; callers
    /// surface that as a corrupt-cache error rather than guessing.
    fn decode(raw: &str) -> Option<Self>;
}

impl<K> EntityKey for K
where
    K: Clone + Eq + Ord + Hash + Display + FromStr + Send + Sync + 'static,
{
    fn encode(&self) -> String {
        self.to_string()
    }

    fn decode(raw: &str) -> Option<Self> {
        raw.parse().ok()
    }
}

/// Marker trait for records served through the cache managers.
///
/// # Implementation Requirements
///
/// - `key()` must return the unique identifier for this instance
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned`
///   because the cache holds serialized snapshots, not live references
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait EntityRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The identifier type for this record.
    type Key: EntityKey;

    /// Get the unique identifier for this record.
    fn key(&self) -> Self::Key;
}
