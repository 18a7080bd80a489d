//! MarketingSignalStore and ObservationStore contract tests.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use callsignal::interfaces::{MarketingSignalStore, ObservationStore};
use callsignal::model::{
    CanonicalTenantId, Gear, InsertOutcome, MarketingSignal, Observation, SignalStatus,
};

fn now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000, 0).unwrap()
}

fn pulse(tenant: CanonicalTenantId, chain: &str, at: DateTime<Utc>) -> MarketingSignal {
    MarketingSignal {
        id: Uuid::new_v4(),
        tenant,
        call_id: Some(Uuid::new_v4()),
        click_chain: Some(chain.to_string()),
        gear: Gear::V2,
        value_cents: 1000,
        currency: "EUR".to_string(),
        signal_time: at,
        status: SignalStatus::Pending,
        created_at: at,
    }
}

pub async fn test_pulse_dedup_within_window<S: MarketingSignalStore>(store: &S) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    let since = now() - Duration::hours(24);

    let first = store
        .insert_pulse_if_absent(&pulse(tenant, "gclid-a", now()), since)
        .await
        .unwrap();
    let again = store
        .insert_pulse_if_absent(&pulse(tenant, "gclid-a", now() + Duration::hours(1)), since)
        .await
        .unwrap();
    let other_chain = store
        .insert_pulse_if_absent(&pulse(tenant, "gclid-b", now()), since)
        .await
        .unwrap();

    assert_eq!(first, InsertOutcome::Inserted);
    assert_eq!(again, InsertOutcome::Duplicate);
    assert_eq!(other_chain, InsertOutcome::Inserted);
}

pub async fn test_pulse_outside_window_inserts<S: MarketingSignalStore>(store: &S) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    let old = now() - Duration::hours(30);

    store
        .insert_pulse_if_absent(&pulse(tenant, "gclid-c", old), old - Duration::hours(24))
        .await
        .unwrap();
    let fresh = store
        .insert_pulse_if_absent(&pulse(tenant, "gclid-c", now()), now() - Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(fresh, InsertOutcome::Inserted);
}

pub async fn test_pending_then_processing<S: MarketingSignalStore>(store: &S) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    let mut stage = pulse(tenant, "gclid-d", now());
    stage.gear = Gear::V3;
    stage.click_chain = None;
    store.insert(&stage).await.unwrap();

    let pending = store.list_pending(tenant, 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].gear, Gear::V3);

    assert_eq!(store.mark_processing(&[stage.id]).await.unwrap(), 1);
    assert_eq!(store.mark_processing(&[stage.id]).await.unwrap(), 0);
    assert!(store.list_pending(tenant, 10).await.unwrap().is_empty());
}

pub async fn test_observations_expire<S: ObservationStore>(store: &S) {
    let tenant = CanonicalTenantId(Uuid::new_v4());
    let observation = Observation {
        id: Uuid::new_v4(),
        tenant,
        session_id: None,
        fingerprint: "fp-1".to_string(),
        url: Some("https://example.test/".to_string()),
        observed_at: now(),
        expires_at: now() + Duration::days(7),
    };
    store.record(&observation).await.unwrap();

    assert_eq!(store.list_live(tenant, now(), 10).await.unwrap(), vec![observation]);
    assert!(store
        .list_live(tenant, now() + Duration::days(8), 10)
        .await
        .unwrap()
        .is_empty());
}

#[macro_export]
macro_rules! run_signal_store_tests {
    ($store:expr) => {
        use $crate::storage::signal_tests::*;

        test_pulse_dedup_within_window($store).await;
        println!("  test_pulse_dedup_within_window: PASSED");

        test_pulse_outside_window_inserts($store).await;
        println!("  test_pulse_outside_window_inserts: PASSED");

        test_pending_then_processing($store).await;
        println!("  test_pending_then_processing: PASSED");
    };
}
