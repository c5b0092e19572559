//! Shared query fixtures for the manager integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use cachet_manager::{EntityCache, EntityCacheConfig, MultiQuery, SingleQuery};
use cachet_store::MemoryStore;
use cachet_test_utils::{account, account_model, Account, CachetResult, MemoryRecords};

/// "Find one account by email", run against the mock secondary store,
/// counting invocations of the wrapped query function.
pub struct EmailQuery {
    source: Arc<MemoryRecords<Account>>,
    runs: AtomicU64,
}

impl EmailQuery {
    pub fn new(source: Arc<MemoryRecords<Account>>) -> Self {
        Self {
            source,
            runs: AtomicU64::new(0),
        }
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SingleQuery<Account> for EmailQuery {
    type Params = String;

    async fn find_id(&self, email: &String) -> CachetResult<Option<u64>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .source
            .scan(|a| a.email == *email)
            .first()
            .map(|a| a.account_id))
    }

    fn cache_key(&self, email: &String) -> String {
        format!("q:acct:by_email:{email}")
    }

    fn key_for_record(&self, record: &Account) -> String {
        self.cache_key(&record.email)
    }

    fn reverse_hash_key(&self) -> &str {
        "rev:acct:by_email"
    }
}

/// "Find all accounts on a plan", multiple-result variant.
pub struct PlanQuery {
    source: Arc<MemoryRecords<Account>>,
    runs: AtomicU64,
}

impl PlanQuery {
    pub fn new(source: Arc<MemoryRecords<Account>>) -> Self {
        Self {
            source,
            runs: AtomicU64::new(0),
        }
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MultiQuery<Account> for PlanQuery {
    type Params = String;

    async fn find_ids(&self, plan: &String) -> CachetResult<Vec<u64>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .source
            .scan(|a| a.plan == *plan)
            .iter()
            .map(|a| a.account_id)
            .collect())
    }

    fn cache_key(&self, plan: &String) -> String {
        format!("q:acct:by_plan:{plan}")
    }

    fn key_for_record(&self, record: &Account) -> String {
        self.cache_key(&record.plan)
    }

    fn reverse_hash_key(&self) -> &str {
        "rev:acct:by_plan"
    }
}

/// A seeded secondary store, backing store, and entity cache.
pub struct Harness {
    pub records: Arc<MemoryRecords<Account>>,
    pub store: Arc<MemoryStore>,
    pub entities: Arc<EntityCache<Account, MemoryStore>>,
}

pub fn harness(negative_cache: bool) -> Harness {
    let records = Arc::new(MemoryRecords::new());
    let store = Arc::new(MemoryStore::new());
    let entities = Arc::new(
        EntityCache::new(
            account_model(),
            store.clone(),
            EntityCacheConfig::new().with_negative_cache(negative_cache),
        )
        .with_secondary(records.clone()),
    );
    Harness {
        records,
        store,
        entities,
    }
}

/// Seed `ids` as accounts on `plan` with derived emails.
pub fn seed_plan(records: &MemoryRecords<Account>, plan: &str, ids: &[u64]) {
    for id in ids {
        records.insert(account(*id, &format!("u{id}@example.com"), plan));
    }
}
