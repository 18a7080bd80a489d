//! ConversionQueue contract tests.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use callsignal::interfaces::{ConversionQueue, StoreError, LEASE_EXPIRED};
use callsignal::model::{CanonicalTenantId, ClickIds, ErrorCategory, NewQueueRow, QueueStatus};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

fn new_row(site_id: CanonicalTenantId, provider: &str, sale_id: &str) -> NewQueueRow {
    NewQueueRow {
        site_id,
        provider: provider.to_string(),
        call_id: Some(Uuid::new_v4()),
        sale_id: sale_id.to_string(),
        session_id: Some("sess-1".to_string()),
        click_ids: ClickIds {
            gclid: Some("gclid-1".to_string()),
            ..Default::default()
        },
        value_cents: 7500,
        currency: "EUR".to_string(),
        conversion_time: now(),
    }
}

pub async fn test_enqueue_and_get<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());

    let row = queue.enqueue(new_row(site, "google_ads", "S-1"), now()).await.unwrap();
    let fetched = queue.get(row.id).await.unwrap().expect("row should exist");

    assert_eq!(fetched.status, QueueStatus::Queued);
    assert_eq!(fetched.attempt_count, 0);
    assert_eq!(fetched.value_cents, 7500);
    assert_eq!(fetched.click_ids.gclid.as_deref(), Some("gclid-1"));
}

pub async fn test_claim_succeeds_once<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());
    let row = queue.enqueue(new_row(site, "google_ads", "S-2"), now()).await.unwrap();

    let first = queue.claim(row.id, now()).await.unwrap();
    let second = queue.claim(row.id, now()).await.unwrap();

    let claimed = first.expect("first claim wins");
    assert_eq!(claimed.status, QueueStatus::Processing);
    assert_eq!(claimed.attempt_count, 1);
    assert!(second.is_none(), "second claim must lose");
}

pub async fn test_transitions_require_processing<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());
    let row = queue.enqueue(new_row(site, "google_ads", "S-3"), now()).await.unwrap();

    let err = queue.complete(row.id, now()).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::InvalidTransition {
            actual: QueueStatus::Queued,
            ..
        }
    ));

    queue.claim(row.id, now()).await.unwrap();
    queue.complete(row.id, now()).await.unwrap();
    assert_eq!(
        queue.get(row.id).await.unwrap().unwrap().status,
        QueueStatus::Completed
    );
    assert!(queue.complete(row.id, now()).await.is_err());
}

pub async fn test_retry_waits_until_due<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());
    let provider = format!("test_{}", Uuid::new_v4().simple());
    let row = queue.enqueue(new_row(site, &provider, "S-4"), now()).await.unwrap();
    let next = now() + Duration::minutes(5);

    queue.claim(row.id, now()).await.unwrap();
    queue
        .retry(row.id, "RATE_LIMITED", ErrorCategory::RateLimit, "slow down", next, now())
        .await
        .unwrap();

    assert!(queue.list_due(&provider, now(), 10).await.unwrap().is_empty());
    assert!(queue.claim(row.id, now()).await.unwrap().is_none());

    let due = queue.list_due(&provider, next, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].status, QueueStatus::Retry);
    assert_eq!(due[0].provider_error_code.as_deref(), Some("RATE_LIMITED"));

    let reclaimed = queue.claim(row.id, next).await.unwrap().unwrap();
    assert_eq!(reclaimed.attempt_count, 2);
}

pub async fn test_fail_is_terminal<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());
    let provider = format!("test_{}", Uuid::new_v4().simple());
    let row = queue.enqueue(new_row(site, &provider, "S-5"), now()).await.unwrap();

    queue.claim(row.id, now()).await.unwrap();
    queue
        .fail(row.id, "INVALID_CLICK_ID", ErrorCategory::Validation, "bad gclid", now())
        .await
        .unwrap();

    let failed = queue.get(row.id).await.unwrap().unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.provider_error_category, Some(ErrorCategory::Validation));
    assert!(queue
        .list_due(&provider, now() + Duration::days(1), 10)
        .await
        .unwrap()
        .is_empty());
}

pub async fn test_claim_batch_is_provider_scoped<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());
    let ours = format!("test_{}", Uuid::new_v4().simple());
    let theirs = format!("test_{}", Uuid::new_v4().simple());
    queue.enqueue(new_row(site, &ours, "S-6"), now()).await.unwrap();
    queue.enqueue(new_row(site, &ours, "S-7"), now()).await.unwrap();
    queue.enqueue(new_row(site, &theirs, "S-8"), now()).await.unwrap();

    let claimed = queue.claim_batch(&ours, now(), 10).await.unwrap();

    assert_eq!(claimed.len(), 2);
    assert!(claimed.iter().all(|row| row.provider == ours));
    assert!(queue.claim_batch(&ours, now(), 10).await.unwrap().is_empty());
    assert_eq!(queue.list_due(&theirs, now(), 10).await.unwrap().len(), 1);
}

pub async fn test_release_stale_processing<Q: ConversionQueue>(queue: &Q) {
    let site = CanonicalTenantId(Uuid::new_v4());
    let provider = format!("test_{}", Uuid::new_v4().simple());
    let stuck = queue.enqueue(new_row(site, &provider, "S-9"), now()).await.unwrap();
    let fresh = queue.enqueue(new_row(site, &provider, "S-10"), now()).await.unwrap();
    let later = now() + Duration::minutes(20);

    queue.claim(stuck.id, now()).await.unwrap();
    queue.claim(fresh.id, later).await.unwrap();

    let stale_before = later - Duration::minutes(15);
    let released = queue.release_stale(&provider, stale_before, later).await.unwrap();
    assert_eq!(released, 1);

    let stuck = queue.get(stuck.id).await.unwrap().unwrap();
    assert_eq!(stuck.status, QueueStatus::Retry);
    assert_eq!(stuck.last_error.as_deref(), Some(LEASE_EXPIRED));
    assert_eq!(stuck.next_retry_at, Some(later));
    assert_eq!(
        queue.get(fresh.id).await.unwrap().unwrap().status,
        QueueStatus::Processing
    );

    // Released once; the late completion of the old claim is rejected.
    assert_eq!(
        queue.release_stale(&provider, stale_before, later).await.unwrap(),
        0
    );
    assert!(queue.complete(stuck.id, later).await.is_err());

    let reclaimed = queue.claim(stuck.id, later).await.unwrap().unwrap();
    assert_eq!(reclaimed.attempt_count, 2);
}

#[macro_export]
macro_rules! run_queue_tests {
    ($queue:expr) => {
        use $crate::storage::queue_tests::*;

        test_enqueue_and_get($queue).await;
        println!("  test_enqueue_and_get: PASSED");

        test_claim_succeeds_once($queue).await;
        println!("  test_claim_succeeds_once: PASSED");

        test_transitions_require_processing($queue).await;
        println!("  test_transitions_require_processing: PASSED");

        test_retry_waits_until_due($queue).await;
        println!("  test_retry_waits_until_due: PASSED");

        test_fail_is_terminal($queue).await;
        println!("  test_fail_is_terminal: PASSED");

        test_claim_batch_is_provider_scoped($queue).await;
        println!("  test_claim_batch_is_provider_scoped: PASSED");

        test_release_stale_processing($queue).await;
        println!("  test_release_stale_processing: PASSED");
    };
}
