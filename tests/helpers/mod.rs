/// Test helpers and fixtures for session integration tests
///
/// This module provides common test utilities, fixtures, and helper functions
/// used across all integration tests.
pub mod fixtures;

pub use dynamo_model::store::StoreOperation;
pub use dynamo_model::{Error, MemoryStore, Record, Session};
pub use serde::{Deserialize, Serialize};

// Re-export common fixtures
pub use fixtures::{Dog, FixedClock, Profile, ReversingKeys, SequentialIds, TestUser, six_dogs};

#[allow(unused_imports)]
pub use fixtures::{Address, Cat, Home};

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Table used by in-memory sessions
pub const TEST_TABLE: &str = "tests_models";

/// Session over a fresh in-memory store with deterministic ids and time
///
/// Returns the store as well so tests can inspect call counts and raw items.
pub fn memory_session() -> (Session, MemoryStore, Arc<FixedClock>) {
    let store = MemoryStore::new();
    let clock = Arc::new(FixedClock::new());
    let session = Session::new(Arc::new(store.clone()), TEST_TABLE)
        .with_id_generator(Arc::new(SequentialIds::default()))
        .with_clock(clock.clone());
    (session, store, clock)
}

/// In-memory session encrypting sensitive fields with [`ReversingKeys`]
#[allow(dead_code)]
pub fn encrypted_session(key_id: &str) -> (Session, MemoryStore, Arc<ReversingKeys>) {
    let (session, store, _) = memory_session();
    let keys = Arc::new(ReversingKeys::default());
    let session = session.with_key_management(keys.clone(), key_id);
    (session, store, keys)
}

/// Create every record, panicking on the first failure
#[allow(dead_code)]
pub async fn create_all<T: Record>(session: &mut Session, records: &mut [T]) {
    for record in records.iter_mut() {
        session.create(record).await.result().unwrap();
    }
}

/// Names of the dogs, sorted
#[allow(dead_code)]
pub fn names(dogs: &[Dog]) -> Vec<String> {
    let mut names: Vec<String> = dogs.iter().map(|dog| dog.name.clone()).collect();
    names.sort();
    names
}

/// Generate a unique test prefix for isolation
///
/// Returns a timestamp-based prefix to avoid test data conflicts
#[allow(dead_code)]
pub fn unique_test_prefix(name: &str) -> String {
    format!(
        "{}_{}_",
        name,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis()
    )
}
