//! Cache-aside entity manager.
//!
//! Serves entities by id or id-batch: cache first, secondary store on
//! miss, with negative-result memoization so repeated misses never reach
//! the secondary store. Populate-on-miss writes are best-effort - the
//! value is already known and returnable, so a failed write is logged and
//! swallowed. Explicit writes (`put`, `m_put`) and the coordinated
//! protocol propagate failures.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use cachet_core::{
    decode_record, encode_record, CacheError, CacheMode, CachetResult, EntityRecord, Model,
    SearchOptions, WriteOptions, VOID_SENTINEL,
};
use cachet_store::{AtomicOp, AtomicWrite, CacheStore, SecondaryStore};

use crate::reconcile::sorted_absent_diff;

/// Configuration for the entity cache manager.
#[derive(Debug, Clone, Default)]
pub struct EntityCacheConfig {
    /// Cache confirmed absences by default. Per-call
    /// [`SearchOptions::negative_cache`] can force this on for a single
    /// read but never off.
    pub negative_cache: bool,
    /// Degrade reads to the secondary store when the cache is unreachable
    /// instead of failing the call. Off by default: cache errors surface.
    pub fail_open: bool,
}

impl EntityCacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_negative_cache(mut self, enabled: bool) -> Self {
        self.negative_cache = enabled;
        self
    }

    pub fn with_fail_open(mut self, enabled: bool) -> Self {
        self.fail_open = enabled;
        self
    }
}

/// Cache-aside manager for single entities and batches.
///
/// # Type Parameters
///
/// - `T`: the entity record type
/// - `C`: the backing cache store
pub struct EntityCache<T, C>
where
    T: EntityRecord,
    C: CacheStore,
{
    model: Model,
    store: Arc<C>,
    secondary: Option<Arc<dyn SecondaryStore<T>>>,
    config: EntityCacheConfig,
}

impl<T, C> EntityCache<T, C>
where
    T: EntityRecord,
    C: CacheStore,
{
    /// Create a manager with no secondary store: reads never leave the
    /// cache and misses resolve to `None`.
    pub fn new(model: Model, store: Arc<C>, config: EntityCacheConfig) -> Self {
        Self {
            model,
            store,
            secondary: None,
            config,
        }
    }

    /// Attach the authoritative secondary store consulted on cache miss.
    pub fn with_secondary(mut self, secondary: Arc<dyn SecondaryStore<T>>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &EntityCacheConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<C> {
        &self.store
    }

    fn negative_applies(&self, opts: &SearchOptions) -> bool {
        opts.negative_cache || self.config.negative_cache
    }

    /// Sentinel-aware decode of a cached slot; undecodable payloads surface
    /// as corrupt cache state, never as data.
    fn decode_cached(&self, key: &str, raw: &str) -> CachetResult<Option<T>> {
        match decode_record::<T>(raw) {
            Ok(value) => Ok(value.into_option()),
            Err(e) => Err(CacheError::Corrupt {
                key: key.to_string(),
                reason: format!(
                    "record keyed by '{}' failed to deserialize: {e}",
                    self.model.id_field()
                ),
            }
            .into()),
        }
    }

    /// Get an entity by id, cache-aside.
    pub async fn get(&self, id: &T::Key, opts: &SearchOptions) -> CachetResult<Option<T>> {
        let key = self.model.cache_key(id);
        let (cached, cache_usable) = match self.store.get(&key).await {
            Ok(slot) => (slot, true),
            Err(err) if self.config.fail_open => {
                tracing::warn!(key = %key, error = %err, "cache read failed, degrading to secondary store");
                (None, false)
            }
            Err(err) => return Err(err),
        };

        if let Some(raw) = cached {
            return self.decode_cached(&key, &raw);
        }

        let Some(secondary) = self.secondary.as_ref() else {
            return Ok(None);
        };

        match secondary.get_by_id(id).await? {
            Some(record) => {
                if cache_usable {
                    self.populate_one(&key, &record, opts.mode, opts.ttl).await;
                }
                Ok(Some(record))
            }
            None => {
                // Negative write only under the overwrite mode; the other
                // modes perform no negative write.
                if cache_usable
                    && self.negative_applies(opts)
                    && opts.mode == CacheMode::CacheAndOverwrite
                {
                    if let Err(err) = self.store.set(&key, VOID_SENTINEL, opts.ttl).await {
                        tracing::warn!(key = %key, error = %err, "negative cache write failed");
                    }
                }
                Ok(None)
            }
        }
    }

    /// Get a batch of entities. Ids are deduplicated with set semantics;
    /// input order is not preserved in the output.
    pub async fn m_get(&self, ids: &[T::Key], opts: &SearchOptions) -> CachetResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let unique: BTreeSet<T::Key> = ids.iter().cloned().collect();
        let sorted: Vec<T::Key> = unique.into_iter().collect();
        let keys: Vec<String> = sorted.iter().map(|id| self.model.cache_key(id)).collect();

        let (slots, cache_usable) = match self.store.m_get(&keys).await {
            Ok(slots) => (slots, true),
            Err(err) if self.config.fail_open => {
                tracing::warn!(error = %err, "batch cache read failed, degrading to secondary store");
                (vec![None; keys.len()], false)
            }
            Err(err) => return Err(err),
        };

        let mut found = Vec::with_capacity(sorted.len());
        let mut missing: Vec<T::Key> = Vec::new();
        for (idx, slot) in slots.iter().enumerate() {
            match slot {
                // Sentinel slots are confirmed absent: dropped from the
                // output and from further lookup.
                Some(raw) => {
                    if let Some(record) = self.decode_cached(&keys[idx], raw)? {
                        found.push(record);
                    }
                }
                None => missing.push(sorted[idx].clone()),
            }
        }

        if missing.is_empty() {
            return Ok(found);
        }
        let Some(secondary) = self.secondary.as_ref() else {
            return Ok(found);
        };

        if self.negative_applies(opts) {
            let fetched = secondary.get_by_ids_ordered(&missing).await?;
            let fetched_ids: Vec<T::Key> = fetched.iter().map(|r| r.key()).collect();
            // `missing` is ascending (BTreeSet order). The diff doubles as
            // the ordered-fetch contract check.
            let absent = sorted_absent_diff(&missing, &fetched_ids)?;
            if cache_usable {
                self.populate_batch(&fetched, &absent, opts.mode, opts.ttl)
                    .await;
            }
            found.extend(fetched);
        } else {
            let fetched = secondary.get_by_ids(&missing).await?;
            if cache_usable {
                self.populate_batch(&fetched, &[], opts.mode, opts.ttl).await;
            }
            found.extend(fetched);
        }
        Ok(found)
    }

    /// Write one entity snapshot through to the cache.
    pub async fn put(&self, record: &T, opts: &WriteOptions) -> CachetResult<()> {
        self.m_put(std::slice::from_ref(record), opts).await
    }

    /// Write a batch of entity snapshots as one atomic multi-key write, so
    /// no partially-visible batch is observable.
    pub async fn m_put(&self, records: &[T], opts: &WriteOptions) -> CachetResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut write = AtomicWrite::new();
        self.write_ops(records, &[], opts.mode, opts.ttl, &mut write)?;
        if write.is_empty() {
            return Ok(());
        }
        self.store.run_atomic(write).await
    }

    /// Append the cache-write ops for `records` (and sentinel writes for
    /// `absent` ids) to an atomic batch, honoring the write mode.
    pub(crate) fn write_ops(
        &self,
        records: &[T],
        absent: &[T::Key],
        mode: CacheMode,
        ttl: Option<Duration>,
        write: &mut AtomicWrite,
    ) -> CachetResult<()> {
        match mode {
            CacheMode::NoCache => Ok(()),
            CacheMode::CacheAndOverwrite => {
                for record in records {
                    let key = self.model.cache_key(&record.key());
                    let value = encode_record(record).map_err(|e| CacheError::Encode {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                    write.push(AtomicOp::Set { key, value, ttl });
                }
                for id in absent {
                    write.push(AtomicOp::Set {
                        key: self.model.cache_key(id),
                        value: VOID_SENTINEL.to_string(),
                        ttl,
                    });
                }
                Ok(())
            }
            CacheMode::CacheIfNotExist => {
                // No negative writes in this mode.
                for record in records {
                    let key = self.model.cache_key(&record.key());
                    let value = encode_record(record).map_err(|e| CacheError::Encode {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                    write.push(AtomicOp::SetIfAbsent { key, value, ttl });
                }
                Ok(())
            }
        }
    }

    /// Entity-key eviction op for the coordinated delete protocol: sentinel
    /// under the negative-cache policy, plain delete otherwise.
    pub(crate) fn evict_op(&self, id: &T::Key) -> AtomicOp {
        let key = self.model.cache_key(id);
        if self.config.negative_cache {
            AtomicOp::Set {
                key,
                value: VOID_SENTINEL.to_string(),
                ttl: None,
            }
        } else {
            AtomicOp::Delete { key }
        }
    }

    async fn populate_one(&self, key: &str, record: &T, mode: CacheMode, ttl: Option<Duration>) {
        let value = match encode_record(record) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode record for cache");
                return;
            }
        };
        let outcome = match mode {
            CacheMode::CacheAndOverwrite => self.store.set(key, &value, ttl).await,
            CacheMode::CacheIfNotExist => self
                .store
                .set_if_absent(key, &value, ttl)
                .await
                .map(|_| ()),
            CacheMode::NoCache => Ok(()),
        };
        if let Err(err) = outcome {
            tracing::warn!(key, error = %err, "best-effort cache populate failed");
        }
    }

    async fn populate_batch(
        &self,
        records: &[T],
        absent: &[T::Key],
        mode: CacheMode,
        ttl: Option<Duration>,
    ) {
        let mut write = AtomicWrite::new();
        if let Err(err) = self.write_ops(records, absent, mode, ttl, &mut write) {
            tracing::warn!(error = %err, "failed to encode batch for cache");
            return;
        }
        if write.is_empty() {
            return;
        }
        if let Err(err) = self.store.run_atomic(write).await {
            tracing::warn!(error = %err, "best-effort batch cache populate failed");
        }
    }
}
