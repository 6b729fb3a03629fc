//! Persistence handle shared by the consensus layer and the state machine.
//!
//! The consensus layer owns the raft-state half; the snapshot half is written
//! through it (`discard_entries`) and read directly by the state machine on
//! startup.

use crate::RaftResult;
use parking_lot::RwLock;
use std::sync::Arc;

/// Durable storage for the consensus layer's state and the latest snapshot.
pub trait Persister: Send + Sync {
    /// Size in bytes of the persisted consensus state.
    fn raft_state_size(&self) -> usize;

    /// Last saved consensus state; empty if none.
    fn read_raft_state(&self) -> Vec<u8>;

    /// Last saved snapshot; empty if none.
    fn read_snapshot(&self) -> Vec<u8>;

    /// Replace the consensus state, keeping the current snapshot.
    fn save_raft_state(&self, state: Vec<u8>) -> RaftResult<()>;

    /// Replace the consensus state and the snapshot as one atomic update.
    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> RaftResult<()>;
}

#[derive(Debug, Default)]
struct Persisted {
    raft_state: Vec<u8>,
    snapshot: Vec<u8>,
}

/// In-memory persister.
///
/// Cloning yields another handle to the same storage, so a replica rebuilt
/// with a clone of its old handle observes everything the previous instance
/// saved.
#[derive(Clone, Debug, Default)]
pub struct MemPersister {
    inner: Arc<RwLock<Persisted>>,
}

impl MemPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size in bytes of the saved snapshot.
    pub fn snapshot_size(&self) -> usize {
        self.inner.read().snapshot.len()
    }
}

impl Persister for MemPersister {
    fn raft_state_size(&self) -> usize {
        self.inner.read().raft_state.len()
    }

    fn read_raft_state(&self) -> Vec<u8> {
        self.inner.read().raft_state.clone()
    }

    fn read_snapshot(&self) -> Vec<u8> {
        self.inner.read().snapshot.clone()
    }

    fn save_raft_state(&self, state: Vec<u8>) -> RaftResult<()> {
        self.inner.write().raft_state = state;
        Ok(())
    }

    fn save_state_and_snapshot(&self, state: Vec<u8>, snapshot: Vec<u8>) -> RaftResult<()> {
        let mut inner = self.inner.write();
        inner.raft_state = state;
        inner.snapshot = snapshot;
        Ok(())
    }
}
