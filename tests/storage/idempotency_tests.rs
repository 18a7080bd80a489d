//! IdempotencyStore and ProcessedSignalLedger contract tests.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use callsignal::interfaces::{IdempotencyStore, ProcessedSignalLedger};
use callsignal::model::{CanonicalTenantId, IdempotencyRecord, InsertOutcome, ProcessedStatus};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

fn record(tenant: CanonicalTenantId, key: &str) -> IdempotencyRecord {
    IdempotencyRecord {
        tenant,
        key: key.to_string(),
        created_at: now(),
        expires_at: now() + Duration::days(90),
    }
}

// =============================================================================
// IdempotencyStore
// =============================================================================

pub async fn test_insert_then_duplicate<S: IdempotencyStore>(store: &S) {
    let tenant = CanonicalTenantId(Uuid::new_v4());

    let first = store.try_insert(&record(tenant, "k1")).await.unwrap();
    let second = store.try_insert(&record(tenant, "k1")).await.unwrap();

    assert_eq!(first, InsertOutcome::Inserted);
    assert_eq!(second, InsertOutcome::Duplicate, "second insert must not error");
    assert!(store.exists(tenant, "k1").await.unwrap());
}

pub async fn test_keys_are_tenant_scoped<S: IdempotencyStore>(store: &S) {
    let a = CanonicalTenantId(Uuid::new_v4());
    let b = CanonicalTenantId(Uuid::new_v4());

    store.try_insert(&record(a, "shared")).await.unwrap();
    let other = store.try_insert(&record(b, "shared")).await.unwrap();

    assert_eq!(other, InsertOutcome::Inserted);
}

pub async fn test_delete_allows_reinsert<S: IdempotencyStore>(store: &S) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    store.try_insert(&record(tenant, "k2")).await.unwrap();

    assert!(store.delete(tenant, "k2").await.unwrap());
    assert!(!store.delete(tenant, "k2").await.unwrap());
    assert!(!store.exists(tenant, "k2").await.unwrap());
    assert_eq!(
        store.try_insert(&record(tenant, "k2")).await.unwrap(),
        InsertOutcome::Inserted
    );
}

// =============================================================================
// ProcessedSignalLedger
// =============================================================================

pub async fn test_ledger_claim_once<L: ProcessedSignalLedger>(ledger: &L) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    let dedup_id = format!("call:{}:e1", tenant);

    let first = ledger.try_claim(&dedup_id, tenant, now()).await.unwrap();
    let second = ledger.try_claim(&dedup_id, tenant, now()).await.unwrap();

    assert_eq!(first, InsertOutcome::Inserted);
    assert_eq!(second, InsertOutcome::Duplicate);
    assert_eq!(
        ledger.status(&dedup_id).await.unwrap(),
        Some(ProcessedStatus::Processing)
    );
}

pub async fn test_ledger_release_only_processing<L: ProcessedSignalLedger>(ledger: &L) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    let open = format!("call:{}:open", tenant);
    let done = format!("call:{}:done", tenant);

    ledger.try_claim(&open, tenant, now()).await.unwrap();
    ledger.try_claim(&done, tenant, now()).await.unwrap();
    ledger
        .mark(&done, ProcessedStatus::Processed, now())
        .await
        .unwrap();

    assert!(ledger.release(&open).await.unwrap());
    assert!(!ledger.release(&done).await.unwrap(), "finished rows stay");
    assert_eq!(ledger.status(&open).await.unwrap(), None);
    assert_eq!(
        ledger.try_claim(&open, tenant, now()).await.unwrap(),
        InsertOutcome::Inserted
    );
}

#[macro_export]
macro_rules! run_idempotency_store_tests {
    ($store:expr) => {
        use $crate::storage::idempotency_tests::*;

        test_insert_then_duplicate($store).await;
        println!("  test_insert_then_duplicate: PASSED");

        test_keys_are_tenant_scoped($store).await;
        println!("  test_keys_are_tenant_scoped: PASSED");

        test_delete_allows_reinsert($store).await;
        println!("  test_delete_allows_reinsert: PASSED");
    };
}

#[macro_export]
macro_rules! run_ledger_tests {
    ($ledger:expr) => {
        use $crate::storage::idempotency_tests::*;

        test_ledger_claim_once($ledger).await;
        println!("  test_ledger_claim_once: PASSED");

        test_ledger_release_only_processing($ledger).await;
        println!("  test_ledger_release_only_processing: PASSED");
    };
}
