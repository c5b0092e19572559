//! Backing cache store and secondary store contracts.

use async_trait::async_trait;
use cachet_core::{CachetResult, EntityRecord};
use std::time::Duration;

use crate::atomic::AtomicWrite;

/// Backing cache store contract ("primary store").
///
/// A key-value store with scalar, hash, and set primitives plus an atomic
/// multi-key write. A Redis-compatible store with server-side atomic
/// scripting satisfies this; any store offering multi-key transactions with
/// equivalent guarantees is interchangeable.
///
/// TTLs are millisecond-precision. Implementations must be thread-safe and
/// support concurrent access; the only mutation discipline callers follow
/// is "use [`run_atomic`](Self::run_atomic) for any change spanning more
/// than one logical key".
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a scalar value.
    async fn get(&self, key: &str) -> CachetResult<Option<String>>;

    /// Batch-get scalar values, one slot per requested key.
    async fn m_get(&self, keys: &[String]) -> CachetResult<Vec<Option<String>>>;

    /// Set a scalar value with an optional TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CachetResult<()>;

    /// Set a scalar value only if the key is absent. Returns whether the
    /// write happened.
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CachetResult<bool>;

    /// Delete a key of any shape.
    async fn delete(&self, key: &str) -> CachetResult<()>;

    /// Get one field of a hash.
    async fn hash_get(&self, key: &str, field: &str) -> CachetResult<Option<String>>;

    /// Set one field of a hash.
    async fn hash_set(&self, key: &str, field: &str, value: &str) -> CachetResult<()>;

    /// Delete one field of a hash.
    async fn hash_delete(&self, key: &str, field: &str) -> CachetResult<()>;

    /// Add members to a set.
    async fn set_add(&self, key: &str, members: &[String]) -> CachetResult<()>;

    /// Remove members from a set.
    async fn set_remove(&self, key: &str, members: &[String]) -> CachetResult<()>;

    /// All members of a set; empty for a missing key.
    async fn set_members(&self, key: &str) -> CachetResult<Vec<String>>;

    /// Cardinality of a set; zero for a missing key.
    async fn set_len(&self, key: &str) -> CachetResult<u64>;

    /// Execute a batch of primitive operations indivisibly.
    ///
    /// All-or-nothing: a failure leaves no partial effect, and no other
    /// client observes an intermediate state. An empty batch is a no-op.
    async fn run_atomic(&self, write: AtomicWrite) -> CachetResult<()>;
}

/// Authoritative data source consulted on cache miss ("secondary store").
#[async_trait]
pub trait SecondaryStore<T: EntityRecord>: Send + Sync {
    /// Fetch one record by id.
    async fn get_by_id(&self, id: &T::Key) -> CachetResult<Option<T>>;

    /// Fetch records by id, in any order; missing ids are omitted.
    async fn get_by_ids(&self, ids: &[T::Key]) -> CachetResult<Vec<T>>;

    /// Fetch records by id, ordered ascending by id.
    ///
    /// The result must be a strictly ascending, duplicate-free subsequence
    /// of the requested ids - no duplicates, no foreign ids. The batch
    /// reconciliation diff depends on this contract and surfaces violations
    /// as [`StoreError::ContractViolation`](cachet_core::StoreError).
    async fn get_by_ids_ordered(&self, ids: &[T::Key]) -> CachetResult<Vec<T>>;
}
