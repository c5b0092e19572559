//! Coordinated model manager: atomic update/delete fan-out across the
//! entity cache and every registered query cache.

mod common;

use std::sync::Arc;

use cachet_manager::{
    EntityCache, EntityCacheConfig, ModelCoordinator, MultiQueryCache, SingleQueryCache,
};
use cachet_store::CacheStore;
use cachet_test_utils::{
    account, account_model, init_tracing, Account, BrokenStore, CacheMode, SearchOptions,
    WriteOptions, VOID_SENTINEL,
};
use common::{harness, seed_plan, EmailQuery, PlanQuery};

struct Coordinated {
    h: common::Harness,
    by_email: Arc<SingleQueryCache<Account, EmailQuery, cachet_store::MemoryStore>>,
    by_plan: Arc<MultiQueryCache<Account, PlanQuery, cachet_store::MemoryStore>>,
    coordinator: ModelCoordinator<Account, cachet_store::MemoryStore>,
}

fn coordinated(negative_cache: bool) -> Coordinated {
    let h = harness(negative_cache);
    let by_email = Arc::new(SingleQueryCache::new(
        EmailQuery::new(h.records.clone()),
        h.entities.clone(),
    ));
    let by_plan = Arc::new(MultiQueryCache::new(
        PlanQuery::new(h.records.clone()),
        h.entities.clone(),
    ));
    let mut coordinator = ModelCoordinator::new(h.entities.clone());
    coordinator.add_query(by_email.clone());
    coordinator.add_query(by_plan.clone());
    Coordinated {
        h,
        by_email,
        by_plan,
        coordinator,
    }
}

#[tokio::test]
async fn test_update_moves_entity_between_cached_result_sets() {
    init_tracing();
    let c = coordinated(false);
    seed_plan(&c.h.records, "pro", &[1, 2]);
    seed_plan(&c.h.records, "free", &[3]);
    let opts = SearchOptions::new();

    // Cache both result sets.
    assert_eq!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().len(), 2);
    assert_eq!(c.by_plan.get(&"free".to_string(), &opts).await.unwrap().len(), 1);

    // Account 1 moves from pro to free; the authority updates both stores
    // through the coordinator.
    let moved = account(1, "u1@example.com", "free");
    c.h.records.insert(moved.clone());
    c.coordinator.update(&moved, &WriteOptions::new()).await.unwrap();

    // Old set excludes it, new set includes it, no query re-ran.
    let pro: Vec<u64> = c
        .by_plan
        .get(&"pro".to_string(), &opts)
        .await
        .unwrap()
        .iter()
        .map(|a| a.account_id)
        .collect();
    assert_eq!(pro, vec![2]);

    let mut free: Vec<u64> = c
        .by_plan
        .get(&"free".to_string(), &opts)
        .await
        .unwrap()
        .iter()
        .map(|a| a.account_id)
        .collect();
    free.sort_unstable();
    assert_eq!(free, vec![1, 3]);
    assert_eq!(c.by_plan.query().runs(), 2);

    // The reverse index tracks the new association.
    assert_eq!(
        c.h.store.hash_get("rev:acct:by_plan", "1").await.unwrap(),
        Some("q:acct:by_plan:free".to_string())
    );

    // And the entity record itself was refreshed.
    assert_eq!(
        c.h.entities.get(&1, &opts).await.unwrap(),
        Some(moved)
    );
}

#[tokio::test]
async fn test_update_rewrites_single_result_association() {
    let c = coordinated(false);
    c.h.records.insert(account(1, "old@example.com", "pro"));
    let opts = SearchOptions::new();

    assert!(c
        .by_email
        .get(&"old@example.com".to_string(), &opts)
        .await
        .unwrap()
        .is_some());

    let renamed = account(1, "new@example.com", "pro");
    c.h.records.insert(renamed.clone());
    c.coordinator.update(&renamed, &WriteOptions::new()).await.unwrap();

    // Old key now holds the void convention; the new key was written
    // directly, so neither lookup re-runs the query.
    assert_eq!(
        c.by_email.get(&"old@example.com".to_string(), &opts).await.unwrap(),
        None
    );
    assert_eq!(
        c.by_email.get(&"new@example.com".to_string(), &opts).await.unwrap(),
        Some(renamed)
    );
    assert_eq!(c.by_email.query().runs(), 1);
}

#[tokio::test]
async fn test_update_does_not_fabricate_uncached_result_sets() {
    let c = coordinated(false);
    seed_plan(&c.h.records, "pro", &[1, 2]);
    let opts = SearchOptions::new();

    assert_eq!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().len(), 2);

    // "enterprise" was never queried; the update must not seed a partial
    // set for it.
    let upgraded = account(1, "u1@example.com", "enterprise");
    c.h.records.insert(upgraded.clone());
    c.coordinator.update(&upgraded, &WriteOptions::new()).await.unwrap();

    assert_eq!(
        c.h.store
            .set_members("q:acct:by_plan:enterprise")
            .await
            .unwrap()
            .len(),
        0
    );

    // The next get is a genuine miss that runs the query and sees the
    // full, correct membership.
    let enterprise: Vec<u64> = c
        .by_plan
        .get(&"enterprise".to_string(), &opts)
        .await
        .unwrap()
        .iter()
        .map(|a| a.account_id)
        .collect();
    assert_eq!(enterprise, vec![1]);
    assert_eq!(c.by_plan.query().runs(), 2);
}

#[tokio::test]
async fn test_update_is_idempotent() {
    let c = coordinated(false);
    seed_plan(&c.h.records, "pro", &[1]);
    let opts = SearchOptions::new();

    assert_eq!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().len(), 1);

    let same = account(1, "u1@example.com", "pro");
    c.coordinator.update(&same, &WriteOptions::new()).await.unwrap();
    c.coordinator.update(&same, &WriteOptions::new()).await.unwrap();

    let pro: Vec<u64> = c
        .by_plan
        .get(&"pro".to_string(), &opts)
        .await
        .unwrap()
        .iter()
        .map(|a| a.account_id)
        .collect();
    assert_eq!(pro, vec![1]);
    assert_eq!(
        c.h.store.hash_get("rev:acct:by_plan", "1").await.unwrap(),
        Some("q:acct:by_plan:pro".to_string())
    );
    assert_eq!(c.h.entities.get(&1, &opts).await.unwrap(), Some(same));
}

#[tokio::test]
async fn test_delete_evicts_everywhere_under_negative_policy() {
    let c = coordinated(true);
    seed_plan(&c.h.records, "solo", &[9]);
    let opts = SearchOptions::new();

    assert_eq!(c.by_plan.get(&"solo".to_string(), &opts).await.unwrap().len(), 1);
    assert!(c
        .by_email
        .get(&"u9@example.com".to_string(), &opts)
        .await
        .unwrap()
        .is_some());

    c.h.records.remove(&9);
    c.coordinator.delete(&9).await.unwrap();

    // Entity key is sentineled, so the read is a confirmed absence that
    // never reaches the secondary store.
    assert_eq!(
        c.h.store.get("acct:9").await.unwrap(),
        Some(VOID_SENTINEL.to_string())
    );
    let calls = c.h.records.total_calls();
    assert_eq!(c.h.entities.get(&9, &opts).await.unwrap(), None);
    assert_eq!(c.h.records.total_calls(), calls);

    // Both query structures dropped the member without re-running.
    assert!(c.by_plan.get(&"solo".to_string(), &opts).await.unwrap().is_empty());
    assert_eq!(
        c.by_email.get(&"u9@example.com".to_string(), &opts).await.unwrap(),
        None
    );
    assert_eq!(c.by_plan.query().runs(), 1);
    assert_eq!(c.by_email.query().runs(), 1);
}

#[tokio::test]
async fn test_delete_without_negative_policy_removes_entity_key() {
    let c = coordinated(false);
    seed_plan(&c.h.records, "solo", &[9]);
    let opts = SearchOptions::new();

    assert!(c.h.entities.get(&9, &opts).await.unwrap().is_some());

    c.h.records.remove(&9);
    c.coordinator.delete(&9).await.unwrap();

    assert_eq!(c.h.store.get("acct:9").await.unwrap(), None);
}

#[tokio::test]
async fn test_m_update_batch_spans_queries_and_entities() {
    let c = coordinated(false);
    seed_plan(&c.h.records, "pro", &[1, 2, 3]);
    let opts = SearchOptions::new();

    assert_eq!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().len(), 3);

    // Two of three move to free in one atomic batch.
    let batch = vec![
        account(1, "u1@example.com", "free"),
        account(2, "u2@example.com", "free"),
    ];
    for record in &batch {
        c.h.records.insert(record.clone());
    }
    c.coordinator.m_update(&batch, &WriteOptions::new()).await.unwrap();

    let pro: Vec<u64> = c
        .by_plan
        .get(&"pro".to_string(), &opts)
        .await
        .unwrap()
        .iter()
        .map(|a| a.account_id)
        .collect();
    assert_eq!(pro, vec![3]);
    assert_eq!(c.h.entities.get(&1, &opts).await.unwrap(), Some(batch[0].clone()));
    assert_eq!(c.h.entities.get(&2, &opts).await.unwrap(), Some(batch[1].clone()));
}

#[tokio::test]
async fn test_m_delete_drains_batches() {
    let c = coordinated(false);
    seed_plan(&c.h.records, "pro", &[1, 2]);
    let opts = SearchOptions::new();

    assert_eq!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().len(), 2);

    c.h.records.remove(&1);
    c.h.records.remove(&2);
    c.coordinator.m_delete(&[1, 2]).await.unwrap();

    assert!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().is_empty());
    assert_eq!(c.by_plan.query().runs(), 1);
}

#[tokio::test]
async fn test_no_cache_mode_maintains_queries_but_skips_record_write() {
    let c = coordinated(false);
    seed_plan(&c.h.records, "pro", &[1]);
    let opts = SearchOptions::new();

    assert_eq!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().len(), 1);

    let moved = account(1, "u1@example.com", "free");
    c.h.records.insert(moved.clone());
    c.coordinator
        .update(&moved, &WriteOptions::new().with_mode(CacheMode::NoCache))
        .await
        .unwrap();

    // Query structures stayed coherent...
    assert!(c.by_plan.get(&"pro".to_string(), &opts).await.unwrap().is_empty());
    // ...but the record write was suppressed: the cached snapshot is still
    // the stale pre-update one populated by the earlier read.
    assert_eq!(
        c.h.entities.get(&1, &opts).await.unwrap(),
        Some(account(1, "u1@example.com", "pro"))
    );
}

#[tokio::test]
async fn test_empty_batches_resolve_without_store_contact() {
    // A coordinator over a store that fails every call: empty inputs must
    // still resolve immediately.
    let store = Arc::new(BrokenStore::new());
    let entities = Arc::new(EntityCache::<Account, BrokenStore>::new(
        account_model(),
        store,
        EntityCacheConfig::new(),
    ));
    let coordinator = ModelCoordinator::new(entities);

    coordinator.m_update(&[], &WriteOptions::new()).await.unwrap();
    coordinator.m_delete(&[]).await.unwrap();
}

#[tokio::test]
async fn test_atomic_failure_propagates() {
    let store = Arc::new(BrokenStore::new());
    let entities = Arc::new(EntityCache::<Account, BrokenStore>::new(
        account_model(),
        store,
        EntityCacheConfig::new(),
    ));
    let coordinator = ModelCoordinator::new(entities);

    let record = account(1, "u1@example.com", "pro");
    assert!(coordinator.update(&record, &WriteOptions::new()).await.is_err());
    assert!(coordinator.m_delete(&[1]).await.is_err());
}

#[tokio::test]
async fn test_registration_order_is_stable() {
    let c = coordinated(false);
    assert_eq!(c.coordinator.query_count(), 2);
}
