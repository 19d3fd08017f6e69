//! SQLite destination store integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses an in-memory database, no external dependencies required.

#![cfg(feature = "sqlite")]

mod storage;

use logstream::storage::SqliteDestinationStore;

/// Get SQLite connection string (in-memory for tests)
fn sqlite_uri() -> String {
    std::env::var("SQLITE_URI").unwrap_or_else(|_| "sqlite::memory:".to_string())
}

#[tokio::test]
async fn test_sqlite_destination_store() {
    println!("=== SQLite DestinationStore Tests ===");

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&sqlite_uri())
        .await
        .expect("Failed to connect to SQLite");
    let store = SqliteDestinationStore::new(pool);
    store.init().await.expect("Failed to create schema");

    run_destination_store_tests!(&store);

    println!("=== All SQLite DestinationStore tests PASSED ===");
}
