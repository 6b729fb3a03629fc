//! Custom assertion helpers for testing.

use crate::fixtures::TestClient;
use common::KvError;
use kvraft::KvServer;

/// Assert that `key` currently reads as `expected` through the full request path.
pub async fn assert_value(server: &KvServer, client: &mut TestClient, key: &str, expected: &str) {
    match client.get(server, key).await {
        Ok(value) => assert_eq!(
            value, expected,
            "key {key:?}: expected {expected:?}, got {value:?}"
        ),
        Err(e) => panic!("get {key:?} failed: {e}"),
    }
}

/// Assert that `key` was never set.
pub async fn assert_no_key(server: &KvServer, client: &mut TestClient, key: &str) {
    let result = client.get(server, key).await;
    assert_eq!(result, Err(KvError::NoKey), "key {key:?}: expected NoKey");
}
