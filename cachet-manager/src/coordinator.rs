//! Coordinated model manager.
//!
//! Owns an entity cache manager plus a registered list of query cache
//! managers and exposes mutations that keep the entity cache and every
//! registered query's cache consistent in one atomic operation against
//! the backing store. The protocol is generic over M registered queries
//! and N affected entities; no intermediate state (entity updated but
//! query stale, or vice versa) is ever externally observable.

use std::sync::Arc;

use cachet_core::{CachetResult, EntityKey, EntityRecord, WriteOptions, VOID_SENTINEL};
use cachet_store::{AtomicOp, AtomicWrite, CacheStore};

use crate::entity::EntityCache;
use crate::query::QueryCoherence;

/// Composes one [`EntityCache`] with zero or more query cache managers.
pub struct ModelCoordinator<T, C>
where
    T: EntityRecord,
    C: CacheStore,
{
    entities: Arc<EntityCache<T, C>>,
    queries: Vec<Arc<dyn QueryCoherence<T>>>,
}

impl<T, C> ModelCoordinator<T, C>
where
    T: EntityRecord,
    C: CacheStore,
{
    pub fn new(entities: Arc<EntityCache<T, C>>) -> Self {
        Self {
            entities,
            queries: Vec::new(),
        }
    }

    /// Register a query manager. Registration order is stable for the
    /// lifetime of the coordinator.
    pub fn add_query(&mut self, query: Arc<dyn QueryCoherence<T>>) {
        self.queries.push(query);
    }

    pub fn query_count(&self) -> usize {
        self.queries.len()
    }

    pub fn entities(&self) -> &Arc<EntityCache<T, C>> {
        &self.entities
    }

    /// Update one entity atomically across the entity cache and every
    /// registered query cache.
    pub async fn update(&self, record: &T, opts: &WriteOptions) -> CachetResult<()> {
        self.m_update(std::slice::from_ref(record), opts).await
    }

    /// Update a batch of entities in one atomic operation.
    ///
    /// Per query and entity: the old association found through the reverse
    /// hash is evicted, then the id is written into the association the
    /// entity's current field values imply. The entity records themselves
    /// are written last, under the entity manager's write policy. Query
    /// maintenance runs even under `NoCache` - coherence of already-cached
    /// structures is not optional - while the record write is suppressed.
    pub async fn m_update(&self, records: &[T], opts: &WriteOptions) -> CachetResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut write = AtomicWrite::new();
        for query in &self.queries {
            for record in records {
                let member = record.key().encode();
                let reverse_key = query.reverse_hash_key().to_string();
                write.push(AtomicOp::QueryEvict {
                    reverse_key: reverse_key.clone(),
                    member: member.clone(),
                    multiple: query.is_multiple(),
                    placeholder: VOID_SENTINEL.to_string(),
                });
                write.push(AtomicOp::QueryAssign {
                    reverse_key,
                    member,
                    result_key: query.key_for_record(record),
                    multiple: query.is_multiple(),
                    placeholder: VOID_SENTINEL.to_string(),
                });
            }
        }
        self.entities
            .write_ops(records, &[], opts.mode, opts.ttl, &mut write)?;
        if write.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            records = records.len(),
            queries = self.queries.len(),
            ops = write.len(),
            "applying coordinated update"
        );
        self.entities.store().run_atomic(write).await
    }

    /// Delete one entity atomically across the entity cache and every
    /// registered query cache.
    pub async fn delete(&self, id: &T::Key) -> CachetResult<()> {
        self.m_delete(std::slice::from_ref(id)).await
    }

    /// Delete a batch of entities in one atomic operation: each id is
    /// evicted from whatever query association it held, and the entity key
    /// is deleted or sentineled per the manager's negative-cache policy.
    pub async fn m_delete(&self, ids: &[T::Key]) -> CachetResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut write = AtomicWrite::new();
        for query in &self.queries {
            for id in ids {
                write.push(AtomicOp::QueryEvict {
                    reverse_key: query.reverse_hash_key().to_string(),
                    member: id.encode(),
                    multiple: query.is_multiple(),
                    placeholder: VOID_SENTINEL.to_string(),
                });
            }
        }
        for id in ids {
            write.push(self.entities.evict_op(id));
        }
        tracing::debug!(
            ids = ids.len(),
            queries = self.queries.len(),
            ops = write.len(),
            "applying coordinated delete"
        );
        self.entities.store().run_atomic(write).await
    }
}
