//! Query-result cache managers.
//!
//! These cache the *identity* of a query's result - one id, or a set of
//! ids - never the entities themselves. Entities resolve through the
//! entity cache manager. Each manager maintains a reverse hash from entity
//! id to the query key that last cached it, which is what lets mutations
//! invalidate query results without re-running the query.
//!
//! The reverse hash stores one query key per entity id. An entity cached
//! under two parameter keys of the same query family keeps only the most
//! recently recorded association.

use std::sync::Arc;

use async_trait::async_trait;
use cachet_core::{
    decode_id, CacheError, CacheMode, CacheValue, CachetResult, EntityKey, EntityRecord,
    SearchOptions, VOID_SENTINEL,
};
use cachet_store::{AtomicOp, AtomicWrite, CacheStore};

use crate::entity::EntityCache;

/// A single-result query family ("find one by field X").
///
/// One implementation corresponds to one logical query family; its
/// reverse hash key must be unique among the managers registered on a
/// coordinator.
#[async_trait]
pub trait SingleQuery<T: EntityRecord>: Send + Sync {
    type Params: Send + Sync;

    /// Run the underlying query, resolving params to at most one id.
    async fn find_id(&self, params: &Self::Params) -> CachetResult<Option<T::Key>>;

    /// Deterministic cache key for a parameter set.
    fn cache_key(&self, params: &Self::Params) -> String;

    /// The query key implied by a record's current field values - the
    /// association an updated record belongs to.
    fn key_for_record(&self, record: &T) -> String;

    /// Hash structure mapping entity id to its current query key.
    fn reverse_hash_key(&self) -> &str;
}

/// A multiple-result query family ("find all by field X").
#[async_trait]
pub trait MultiQuery<T: EntityRecord>: Send + Sync {
    type Params: Send + Sync;

    /// Run the underlying query, resolving params to a list of ids.
    async fn find_ids(&self, params: &Self::Params) -> CachetResult<Vec<T::Key>>;

    fn cache_key(&self, params: &Self::Params) -> String;

    fn key_for_record(&self, record: &T) -> String;

    fn reverse_hash_key(&self) -> &str;
}

/// What the coordinated protocol needs to know about a registered query
/// manager: where its reverse hash lives, whether results are sets, and
/// which key a record's current field values imply.
pub trait QueryCoherence<T: EntityRecord>: Send + Sync {
    fn reverse_hash_key(&self) -> &str;
    fn is_multiple(&self) -> bool;
    fn key_for_record(&self, record: &T) -> String;
}

/// Cache manager for a single-result query.
///
/// The cached value at a query key is either the void sentinel ("queried,
/// no result"), or one encoded id.
pub struct SingleQueryCache<T, Q, C>
where
    T: EntityRecord,
    Q: SingleQuery<T>,
    C: CacheStore,
{
    query: Q,
    entities: Arc<EntityCache<T, C>>,
}

impl<T, Q, C> SingleQueryCache<T, Q, C>
where
    T: EntityRecord,
    Q: SingleQuery<T>,
    C: CacheStore,
{
    pub fn new(query: Q, entities: Arc<EntityCache<T, C>>) -> Self {
        Self { query, entities }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    fn store(&self) -> &Arc<C> {
        self.entities.store()
    }

    /// Resolve the query through the cache, running it only on miss.
    pub async fn get(&self, params: &Q::Params, opts: &SearchOptions) -> CachetResult<Option<T>> {
        let key = self.query.cache_key(params);
        if let Some(raw) = self.store().get(&key).await? {
            return match decode_id::<T::Key>(&raw) {
                Some(CacheValue::Absent) => Ok(None),
                Some(CacheValue::Present(id)) => self.entities.get(&id, opts).await,
                None => Err(CacheError::Corrupt {
                    key,
                    reason: "expected an encoded id or the void sentinel".to_string(),
                }
                .into()),
            };
        }

        match self.query.find_id(params).await? {
            None => {
                // Memoize the empty result so repeat misses hit cache.
                self.populate_empty(&key, opts).await;
                Ok(None)
            }
            Some(id) => {
                self.populate_hit(&key, &id, opts).await;
                self.entities.get(&id, opts).await
            }
        }
    }

    /// The entity changed and no longer matches its cached association;
    /// drop it from the cached result. Pure cache maintenance - the query
    /// function is not re-run, and queries the entity might newly match
    /// are only discovered on the next cache-missed `get`.
    pub async fn sync_update(&self, record: &T) -> CachetResult<()> {
        self.evict(std::slice::from_ref(record)).await
    }

    /// The entity was deleted; drop it from the cached result.
    pub async fn sync_delete(&self, record: &T) -> CachetResult<()> {
        self.evict(std::slice::from_ref(record)).await
    }

    pub async fn m_sync_update(&self, records: &[T]) -> CachetResult<()> {
        self.evict(records).await
    }

    pub async fn m_sync_delete(&self, records: &[T]) -> CachetResult<()> {
        self.evict(records).await
    }

    async fn evict(&self, records: &[T]) -> CachetResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut write = AtomicWrite::new();
        for record in records {
            write.push(AtomicOp::QueryEvict {
                reverse_key: self.query.reverse_hash_key().to_string(),
                member: record.key().encode(),
                multiple: false,
                placeholder: VOID_SENTINEL.to_string(),
            });
        }
        self.store().run_atomic(write).await
    }

    async fn populate_empty(&self, key: &str, opts: &SearchOptions) {
        let outcome = match opts.mode {
            CacheMode::CacheAndOverwrite => self.store().set(key, VOID_SENTINEL, opts.ttl).await,
            CacheMode::CacheIfNotExist => self
                .store()
                .set_if_absent(key, VOID_SENTINEL, opts.ttl)
                .await
                .map(|_| ()),
            CacheMode::NoCache => Ok(()),
        };
        if let Err(err) = outcome {
            tracing::warn!(key, error = %err, "query empty-result memoization failed");
        }
    }

    async fn populate_hit(&self, key: &str, id: &T::Key, opts: &SearchOptions) {
        if opts.mode == CacheMode::NoCache {
            return;
        }
        let member = id.encode();
        let mut write = AtomicWrite::new();
        match opts.mode {
            CacheMode::CacheAndOverwrite => write.push(AtomicOp::Set {
                key: key.to_string(),
                value: member.clone(),
                ttl: opts.ttl,
            }),
            CacheMode::CacheIfNotExist => write.push(AtomicOp::SetIfAbsent {
                key: key.to_string(),
                value: member.clone(),
                ttl: opts.ttl,
            }),
            CacheMode::NoCache => unreachable!(),
        }
        write.push(AtomicOp::HashSet {
            key: self.query.reverse_hash_key().to_string(),
            field: member,
            value: key.to_string(),
        });
        if let Err(err) = self.store().run_atomic(write).await {
            tracing::warn!(key, error = %err, "query result cache populate failed");
        }
    }
}

impl<T, Q, C> QueryCoherence<T> for SingleQueryCache<T, Q, C>
where
    T: EntityRecord,
    Q: SingleQuery<T>,
    C: CacheStore,
{
    fn reverse_hash_key(&self) -> &str {
        self.query.reverse_hash_key()
    }

    fn is_multiple(&self) -> bool {
        false
    }

    fn key_for_record(&self, record: &T) -> String {
        self.query.key_for_record(record)
    }
}

/// Cache manager for a multiple-result query.
///
/// The cached structure at a query key is a set of encoded ids. An empty
/// result is never left uncached: the void sentinel is inserted as a
/// placeholder member, so "already queried, empty" is distinguishable
/// from "never queried".
pub struct MultiQueryCache<T, Q, C>
where
    T: EntityRecord,
    Q: MultiQuery<T>,
    C: CacheStore,
{
    query: Q,
    entities: Arc<EntityCache<T, C>>,
}

impl<T, Q, C> MultiQueryCache<T, Q, C>
where
    T: EntityRecord,
    Q: MultiQuery<T>,
    C: CacheStore,
{
    pub fn new(query: Q, entities: Arc<EntityCache<T, C>>) -> Self {
        Self { query, entities }
    }

    pub fn query(&self) -> &Q {
        &self.query
    }

    fn store(&self) -> &Arc<C> {
        self.entities.store()
    }

    /// Resolve the query through the cache, running it only on miss.
    /// Result order is unspecified (set semantics).
    pub async fn get(&self, params: &Q::Params, opts: &SearchOptions) -> CachetResult<Vec<T>> {
        let key = self.query.cache_key(params);
        let members = self.store().set_members(&key).await?;

        if !members.is_empty() {
            let mut ids = Vec::with_capacity(members.len());
            for member in &members {
                match decode_id::<T::Key>(member) {
                    Some(CacheValue::Absent) => {}
                    Some(CacheValue::Present(id)) => ids.push(id),
                    None => {
                        return Err(CacheError::Corrupt {
                            key,
                            reason: "set member is not an encoded id".to_string(),
                        }
                        .into())
                    }
                }
            }
            if ids.is_empty() {
                // Placeholder-only set: cached-empty result.
                return Ok(Vec::new());
            }
            return self.entities.m_get(&ids, opts).await;
        }

        let ids = self.query.find_ids(params).await?;
        if ids.is_empty() {
            self.populate_empty(&key, opts).await;
            return Ok(Vec::new());
        }
        self.populate_hit(&key, &ids, opts).await;
        self.entities.m_get(&ids, opts).await
    }

    /// See [`SingleQueryCache::sync_update`]: set-removal variant.
    pub async fn sync_update(&self, record: &T) -> CachetResult<()> {
        self.evict(std::slice::from_ref(record)).await
    }

    pub async fn sync_delete(&self, record: &T) -> CachetResult<()> {
        self.evict(std::slice::from_ref(record)).await
    }

    pub async fn m_sync_update(&self, records: &[T]) -> CachetResult<()> {
        self.evict(records).await
    }

    pub async fn m_sync_delete(&self, records: &[T]) -> CachetResult<()> {
        self.evict(records).await
    }

    async fn evict(&self, records: &[T]) -> CachetResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut write = AtomicWrite::new();
        for record in records {
            write.push(AtomicOp::QueryEvict {
                reverse_key: self.query.reverse_hash_key().to_string(),
                member: record.key().encode(),
                multiple: true,
                placeholder: VOID_SENTINEL.to_string(),
            });
        }
        self.store().run_atomic(write).await
    }

    async fn populate_empty(&self, key: &str, opts: &SearchOptions) {
        if opts.mode == CacheMode::NoCache {
            return;
        }
        let mut write = AtomicWrite::new();
        write.push(AtomicOp::SetAdd {
            key: key.to_string(),
            member: VOID_SENTINEL.to_string(),
        });
        if let Some(ttl) = opts.ttl {
            write.push(AtomicOp::Expire {
                key: key.to_string(),
                ttl,
            });
        }
        if let Err(err) = self.store().run_atomic(write).await {
            tracing::warn!(key, error = %err, "query empty-result memoization failed");
        }
    }

    async fn populate_hit(&self, key: &str, ids: &[T::Key], opts: &SearchOptions) {
        if opts.mode == CacheMode::NoCache {
            return;
        }
        let mut write = AtomicWrite::new();
        if opts.mode == CacheMode::CacheAndOverwrite {
            // Replace whatever was cached; if-not-exist merges instead.
            write.push(AtomicOp::Delete {
                key: key.to_string(),
            });
        }
        for id in ids {
            let member = id.encode();
            write.push(AtomicOp::SetAdd {
                key: key.to_string(),
                member: member.clone(),
            });
            write.push(AtomicOp::HashSet {
                key: self.query.reverse_hash_key().to_string(),
                field: member,
                value: key.to_string(),
            });
        }
        if let Some(ttl) = opts.ttl {
            write.push(AtomicOp::Expire {
                key: key.to_string(),
                ttl,
            });
        }
        if let Err(err) = self.store().run_atomic(write).await {
            tracing::warn!(key, error = %err, "query result cache populate failed");
        }
    }
}

impl<T, Q, C> QueryCoherence<T> for MultiQueryCache<T, Q, C>
where
    T: EntityRecord,
    Q: MultiQuery<T>,
    C: CacheStore,
{
    fn reverse_hash_key(&self) -> &str {
        self.query.reverse_hash_key()
    }

    fn is_multiple(&self) -> bool {
        true
    }

    fn key_for_record(&self, record: &T) -> String {
        self.query.key_for_record(record)
    }
}
