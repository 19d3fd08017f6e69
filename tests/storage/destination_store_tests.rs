//! DestinationStore interface tests.
//!
//! These tests verify the contract of the DestinationStore trait.
//! Each storage implementation should run these tests against an empty store.

use std::collections::BTreeMap;

use logstream::destination::{
    DestinationOptions, SubscriptionFilter, TransportOptions, WebhookOptions,
};
use logstream::storage::DestinationStore;

pub fn make_log_destination(id: &str) -> DestinationOptions {
    DestinationOptions::new(id, TransportOptions::Log)
        .with_label(format!("{id} label"))
        .with_subscription(SubscriptionFilter::events(["node."]))
}

pub fn make_webhook_destination(id: &str) -> DestinationOptions {
    let mut webhook = WebhookOptions::new("http://localhost:8080/hook");
    webhook.headers = BTreeMap::from([("x-token".to_string(), "secret".to_string())]);
    DestinationOptions::new(id, TransportOptions::Webhook(webhook))
}

// =============================================================================
// DestinationStore::load_all tests
// =============================================================================

pub async fn test_load_empty<S: DestinationStore>(store: &S) {
    let loaded = store.load_all().await.expect("load_all should succeed");
    assert!(loaded.is_empty(), "fresh store should be empty");
}

// =============================================================================
// DestinationStore::save tests
// =============================================================================

pub async fn test_save_and_load<S: DestinationStore>(store: &S) {
    let log = make_log_destination("store-log");
    let webhook = make_webhook_destination("store-webhook");

    store.save(&webhook).await.expect("save should succeed");
    store.save(&log).await.expect("save should succeed");

    let loaded = store.load_all().await.expect("load_all should succeed");
    assert_eq!(loaded, vec![log, webhook], "configs should round-trip sorted by id");

    store.delete("store-log").await.expect("cleanup");
    store.delete("store-webhook").await.expect("cleanup");
}

pub async fn test_save_overwrites<S: DestinationStore>(store: &S) {
    let original = make_log_destination("store-overwrite");
    store.save(&original).await.expect("save should succeed");

    let updated = original.clone().with_enabled(false).with_label("renamed");
    store.save(&updated).await.expect("save should succeed");

    let loaded = store.load_all().await.expect("load_all should succeed");
    assert_eq!(loaded, vec![updated], "second save should replace the first");

    store.delete("store-overwrite").await.expect("cleanup");
}

pub async fn test_save_rejects_bad_id<S: DestinationStore>(store: &S) {
    let options = make_log_destination("../escape");
    assert!(
        store.save(&options).await.is_err(),
        "ids with path separators should be rejected"
    );
}

// =============================================================================
// DestinationStore::delete tests
// =============================================================================

pub async fn test_delete_existing<S: DestinationStore>(store: &S) {
    store
        .save(&make_log_destination("store-delete"))
        .await
        .expect("save should succeed");
    store
        .delete("store-delete")
        .await
        .expect("delete should succeed");

    let loaded = store.load_all().await.expect("load_all should succeed");
    assert!(loaded.iter().all(|d| d.id != "store-delete"));
}

pub async fn test_delete_missing<S: DestinationStore>(store: &S) {
    store
        .delete("store-never-saved")
        .await
        .expect("deleting a missing id should succeed");
}

/// Run all DestinationStore tests against an implementation.
#[macro_export]
macro_rules! run_destination_store_tests {
    ($store:expr) => {
        use $crate::storage::destination_store_tests::*;

        test_load_empty($store).await;
        println!("  test_load_empty: PASSED");

        test_save_and_load($store).await;
        println!("  test_save_and_load: PASSED");

        test_save_overwrites($store).await;
        println!("  test_save_overwrites: PASSED");

        test_save_rejects_bad_id($store).await;
        println!("  test_save_rejects_bad_id: PASSED");

        test_delete_existing($store).await;
        println!("  test_delete_existing: PASSED");

        test_delete_missing($store).await;
        println!("  test_delete_missing: PASSED");
    };
}
