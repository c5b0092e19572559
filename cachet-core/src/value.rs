//! Void sentinel and cached value encoding.
//!
//! The sentinel marks "confirmed absent" for entity keys and acts as the
//! placeholder member of empty query result sets, distinguishing "already
//! queried, empty" from "never queried". Decoding goes through
//! [`CacheValue`] before any JSON parsing, so a legitimate payload can
//! never be mistaken for the sentinel.

use serde::{de::DeserializeOwned, Serialize};

use crate::record::EntityKey;

/// Reserved marker meaning "confirmed absent".
///
/// Contains a control character, so it can never collide with a
/// JSON-serialized record (JSON escapes control characters) nor with any
/// id encoding produced by a `Display` implementation worth using.
pub const VOID_SENTINEL: &str = "\u{1}__void__";

/// Typed decode result for a cached slot: either the void sentinel or a
/// present value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue<T> {
    /// Confirmed absent (the slot holds the void sentinel).
    Absent,
    /// A present, decoded value.
    Present(T),
}

impl<T> CacheValue<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, CacheValue::Absent)
    }

    /// Collapse into an `Option`, mapping `Absent` to `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheValue::Absent => None,
            CacheValue::Present(value) => Some(value),
        }
    }
}

/// Serialize a record for cache storage.
pub fn encode_record<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(record)
}

/// Decode a raw cached slot into a record, sentinel-aware.
pub fn decode_record<T: DeserializeOwned>(raw: &str) -> Result<CacheValue<T>, serde_json::Error> {
    if raw == VOID_SENTINEL {
        return Ok(CacheValue::Absent);
    }
    Ok(CacheValue::Present(serde_json::from_str(raw)?))
}

/// Decode a raw cached slot into an entity id, sentinel-aware.
///
/// Returns `None` when the slot holds neither the sentinel nor a valid id
/// encoding; callers surface that as corrupt cache state.
pub fn decode_id<K: EntityKey>(raw: &str) -> Option<CacheValue<K>> {
    if raw == VOID_SENTINEL {
        return Some(CacheValue::Absent);
    }
    K::decode(raw).map(CacheValue::Present)
}
