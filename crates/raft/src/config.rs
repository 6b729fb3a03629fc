//! Raft node configuration.

use crate::{FilePersister, MemPersister, Persister, RaftResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Configuration for a node's local storage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique identifier for this node.
    pub node_id: u64,

    /// Directory for the persisted raft state and snapshot.
    pub data_dir: PathBuf,

    /// Whether to use persistent storage (survives restarts).
    /// When false, uses in-memory storage (useful for testing).
    pub persistent_storage: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 0,
            data_dir: PathBuf::from("./raft_data"),
            persistent_storage: false, // Default to in-memory for tests
        }
    }
}

impl NodeConfig {
    /// Create a new node configuration.
    pub fn new(node_id: u64, data_dir: PathBuf) -> Self {
        Self {
            node_id,
            data_dir,
            ..Default::default()
        }
    }

    /// Enable or disable persistent storage.
    pub fn with_persistent_storage(mut self, enabled: bool) -> Self {
        self.persistent_storage = enabled;
        self
    }

    /// Path to the file holding raft state and snapshot together.
    pub fn persist_path(&self) -> PathBuf {
        self.data_dir.join("raft.bin")
    }

    /// Open the persister this configuration describes.
    ///
    /// # Errors
    /// Returns an error if the data directory cannot be created or the
    /// persisted file is unreadable or corrupt.
    pub fn open_persister(&self) -> RaftResult<Arc<dyn Persister>> {
        let persister: Arc<dyn Persister> = if self.persistent_storage {
            Arc::new(FilePersister::open(&self.data_dir)?)
        } else {
            Arc::new(MemPersister::new())
        };
        info!(
            node_id = self.node_id,
            data_dir = %self.data_dir.display(),
            persistent = self.persistent_storage,
            raft_state_size = persister.raft_state_size(),
            "opened node storage"
        );
        Ok(persister)
    }
}
