//! Cachet Manager - Cache-Coherence Engine
//!
//! The managers that keep a fast key-value cache coherent with an
//! authoritative secondary store:
//!
//! - [`EntityCache`]: cache-aside reads for single entities and batches,
//!   with negative-result memoization and sorted-diff reconciliation.
//! - [`SingleQueryCache`] / [`MultiQueryCache`]: caching of query result
//!   *identities* (ids, not entities) with a reverse index from entity id
//!   to the query key it currently belongs to.
//! - [`ModelCoordinator`]: atomic update/delete fan-out that keeps the
//!   entity cache and every registered query cache consistent in one
//!   indivisible operation against the backing store.

pub mod coordinator;
pub mod entity;
pub mod query;
pub mod reconcile;

pub use coordinator::ModelCoordinator;
pub use entity::{EntityCache, EntityCacheConfig};
pub use query::{MultiQuery, MultiQueryCache, QueryCoherence, SingleQuery, SingleQueryCache};
pub use reconcile::sorted_absent_diff;
