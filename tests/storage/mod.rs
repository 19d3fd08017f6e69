//! Shared storage integration tests.
//!
//! Tests the DestinationStore interface against every implementation.
//! Each implementation's test file imports these functions and runs them.

pub mod destination_store_tests;
