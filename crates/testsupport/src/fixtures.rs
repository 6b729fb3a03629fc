//! Common test fixtures.

use common::{ClientId, KvResult, LogIndex, PutAppendKind, SerialNum, ServerConfig};
use kvraft::{start_single_node, KvServer, SingleNode};
use raft::{MemPersister, Persister};
use std::sync::Arc;
use std::time::Duration;

/// Install a `tracing` subscriber honouring `RUST_LOG`, once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration for a one-replica cluster.
///
/// # Example
///
/// ```
/// use testsupport::prelude::*;
///
/// let config = single_node_config(Some(1024));
/// assert_eq!(config.peers.len(), 1);
/// ```
pub fn single_node_config(max_raft_state: Option<usize>) -> ServerConfig {
    ServerConfig::builder()
        .peers(vec!["kv-0".to_string()])
        .me(0)
        .maybe_max_raft_state(max_raft_state)
        .request_timeout(Duration::from_secs(1))
        .build()
}

/// Start a one-replica cluster on fresh in-memory storage, snapshots disabled.
pub fn single_node() -> SingleNode {
    single_node_on(&MemPersister::new(), None)
}

/// Start (or restart) a one-replica cluster on `persister`.
pub fn single_node_on(persister: &MemPersister, max_raft_state: Option<usize>) -> SingleNode {
    init_tracing();
    let persister: Arc<dyn Persister> = Arc::new(persister.clone());
    match start_single_node(single_node_config(max_raft_state), persister) {
        Ok(node) => node,
        Err(e) => panic!("failed to start single node: {e}"),
    }
}

/// Wait until the apply loop of `server` has processed `index`.
///
/// Panics after five seconds.
pub async fn wait_for_applied(server: &KvServer, index: LogIndex) {
    let caught_up = tokio::time::timeout(Duration::from_secs(5), async {
        while server.last_applied() < index {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(
        caught_up.is_ok(),
        "apply loop stuck at {} waiting for {index}",
        server.last_applied()
    );
}

/// A client session that numbers its requests.
///
/// Every call uses a fresh serial number; `retry_*` methods resend the
/// previous one, the way a client resends after a timeout.
#[derive(Clone, Debug)]
pub struct TestClient {
    pub client_id: ClientId,
    serial: SerialNum,
}

impl TestClient {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            serial: 0,
        }
    }

    pub fn next_serial(&mut self) -> SerialNum {
        self.serial += 1;
        self.serial
    }

    pub fn last_serial(&self) -> SerialNum {
        self.serial
    }

    pub async fn get(&mut self, server: &KvServer, key: &str) -> KvResult<String> {
        let serial = self.next_serial();
        server.get(key, self.client_id, serial).await
    }

    pub async fn put(&mut self, server: &KvServer, key: &str, value: &str) -> KvResult<()> {
        let serial = self.next_serial();
        server
            .put_append(key, value, PutAppendKind::Put, self.client_id, serial)
            .await
    }

    pub async fn append(&mut self, server: &KvServer, key: &str, value: &str) -> KvResult<()> {
        let serial = self.next_serial();
        server
            .put_append(key, value, PutAppendKind::Append, self.client_id, serial)
            .await
    }

    /// Resend the previous request as an append, with the same serial number.
    pub async fn retry_append(&self, server: &KvServer, key: &str, value: &str) -> KvResult<()> {
        server
            .put_append(key, value, PutAppendKind::Append, self.client_id, self.serial)
            .await
    }
}
