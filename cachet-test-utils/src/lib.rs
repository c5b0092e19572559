//! Cachet Test Utilities
//!
//! Centralized test infrastructure for the Cachet workspace:
//! - A call-counted in-memory secondary store
//! - Entity fixtures
//! - A backing store that always fails, for degradation tests
//! - Tracing init for tests

// Re-export core types for convenience
pub use cachet_core::{
    CacheError, CacheMode, CachetError, CachetResult, ConfigError, EntityKey, EntityRecord,
    KeyGen, Model, SearchOptions, StoreError, WriteOptions, VOID_SENTINEL,
};
pub use cachet_store::{AtomicWrite, CacheStore, MemoryStore, SecondaryStore};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Once, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// MOCK SECONDARY STORE
// ============================================================================

/// In-memory authoritative store with per-method call counters, so tests
/// can assert exactly how often the cache fell through to it.
pub struct MemoryRecords<T: EntityRecord> {
    records: RwLock<BTreeMap<T::Key, T>>,
    get_by_id_calls: AtomicU64,
    get_by_ids_calls: AtomicU64,
    get_by_ids_ordered_calls: AtomicU64,
}

impl<T: EntityRecord> MemoryRecords<T> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            get_by_id_calls: AtomicU64::new(0),
            get_by_ids_calls: AtomicU64::new(0),
            get_by_ids_ordered_calls: AtomicU64::new(0),
        }
    }

    pub fn insert(&self, record: T) {
        self.records
            .write()
            .unwrap()
            .insert(record.key(), record);
    }

    pub fn remove(&self, id: &T::Key) {
        self.records.write().unwrap().remove(id);
    }

    pub fn record(&self, id: &T::Key) -> Option<T> {
        self.records.read().unwrap().get(id).cloned()
    }

    /// All records matching a predicate, ascending by key.
    pub fn scan(&self, pred: impl Fn(&T) -> bool) -> Vec<T> {
        self.records
            .read()
            .unwrap()
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_by_id_calls(&self) -> u64 {
        self.get_by_id_calls.load(Ordering::SeqCst)
    }

    pub fn get_by_ids_calls(&self) -> u64 {
        self.get_by_ids_calls.load(Ordering::SeqCst)
    }

    pub fn get_by_ids_ordered_calls(&self) -> u64 {
        self.get_by_ids_ordered_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> u64 {
        self.get_by_id_calls() + self.get_by_ids_calls() + self.get_by_ids_ordered_calls()
    }
}

#[async_trait]
impl<T: EntityRecord> SecondaryStore<T> for MemoryRecords<T> {
    async fn get_by_id(&self, id: &T::Key) -> CachetResult<Option<T>> {
        self.get_by_id_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    async fn get_by_ids(&self, ids: &[T::Key]) -> CachetResult<Vec<T>> {
        self.get_by_ids_calls.fetch_add(1, Ordering::SeqCst);
        let records = self.records.read().unwrap();
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn get_by_ids_ordered(&self, ids: &[T::Key]) -> CachetResult<Vec<T>> {
        self.get_by_ids_ordered_calls.fetch_add(1, Ordering::SeqCst);
        let unique: BTreeMap<&T::Key, ()> = ids.iter().map(|id| (id, ())).collect();
        let records = self.records.read().unwrap();
        Ok(unique
            .keys()
            .filter_map(|id| records.get(id).cloned())
            .collect())
    }
}

// ============================================================================
// BROKEN BACKING STORE
// ============================================================================

/// A backing store whose every operation fails, for exercising fail-open
/// degradation and error surfacing.
#[derive(Debug, Default)]
pub struct BrokenStore;

impl BrokenStore {
    pub fn new() -> Self {
        Self
    }

    fn unavailable() -> CachetError {
        CacheError::Backend {
            reason: "store unavailable".to_string(),
        }
        .into()
    }
}

#[async_trait]
impl CacheStore for BrokenStore {
    async fn get(&self, _key: &str) -> CachetResult<Option<String>> {
        Err(Self::unavailable())
    }

    async fn m_get(&self, _keys: &[String]) -> CachetResult<Vec<Option<String>>> {
        Err(Self::unavailable())
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> CachetResult<()> {
        Err(Self::unavailable())
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> CachetResult<bool> {
        Err(Self::unavailable())
    }

    async fn delete(&self, _key: &str) -> CachetResult<()> {
        Err(Self::unavailable())
    }

    async fn hash_get(&self, _key: &str, _field: &str) -> CachetResult<Option<String>> {
        Err(Self::unavailable())
    }

    async fn hash_set(&self, _key: &str, _field: &str, _value: &str) -> CachetResult<()> {
        Err(Self::unavailable())
    }

    async fn hash_delete(&self, _key: &str, _field: &str) -> CachetResult<()> {
        Err(Self::unavailable())
    }

    async fn set_add(&self, _key: &str, _members: &[String]) -> CachetResult<()> {
        Err(Self::unavailable())
    }

    async fn set_remove(&self, _key: &str, _members: &[String]) -> CachetResult<()> {
        Err(Self::unavailable())
    }

    async fn set_members(&self, _key: &str) -> CachetResult<Vec<String>> {
        Err(Self::unavailable())
    }

    async fn set_len(&self, _key: &str) -> CachetResult<u64> {
        Err(Self::unavailable())
    }

    async fn run_atomic(&self, _write: AtomicWrite) -> CachetResult<()> {
        Err(Self::unavailable())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Numeric-keyed fixture record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: u64,
    pub email: String,
    pub plan: String,
    pub created_at: DateTime<Utc>,
}

impl EntityRecord for Account {
    type Key = u64;

    fn key(&self) -> u64 {
        self.account_id
    }
}

/// Build an account with a deterministic timestamp.
pub fn account(account_id: u64, email: &str, plan: &str) -> Account {
    Account {
        account_id,
        email: email.to_string(),
        plan: plan.to_string(),
        created_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

/// Model for [`Account`] cache keys: `acct:{id}`.
pub fn account_model() -> Model {
    Model::new("account_id", KeyGen::prefixed("acct:")).unwrap()
}

/// Uuid-keyed fixture record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub account_id: u64,
    pub started_at: DateTime<Utc>,
}

impl EntityRecord for Session {
    type Key = Uuid;

    fn key(&self) -> Uuid {
        self.session_id
    }
}

pub fn session(account_id: u64) -> Session {
    Session {
        session_id: Uuid::now_v7(),
        account_id,
        started_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
    }
}

/// Model for [`Session`] cache keys: `sess:{uuid}`.
pub fn session_model() -> Model {
    Model::new("session_id", KeyGen::prefixed("sess:")).unwrap()
}

// ============================================================================
// TRACING
// ============================================================================

static INIT: Once = Once::new();

/// Install a fmt subscriber honoring `RUST_LOG`, at most once per process.
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}
