//! Replicated key/value state machine.
//!
//! Each replica applies the consensus layer's committed log, in order, to a
//! local store and answers `Get`/`PutAppend` once the request's own entry
//! has been applied. Retried requests are deduplicated per client, and the
//! store is periodically snapshotted so the consensus layer can trim its log.
//!
//! # Single-Node Mode
//!
//! ```rust,ignore
//! use common::{PutAppendKind, ServerConfig};
//! use raft::MemPersister;
//! use std::sync::Arc;
//!
//! let node = kvraft::start_single_node(ServerConfig::default(), Arc::new(MemPersister::new()))?;
//! node.server.put_append("x", "1", PutAppendKind::Put, 1, 1).await?;
//! assert_eq!(node.server.get("x", 1, 2).await?, "1");
//! ```
//!
//! # Modules
//!
//! - [`command`]: the replicated operation
//! - [`store`]: key/value data and per-client dedup watermarks
//! - [`snapshot`]: snapshot codec
//! - [`registry`]: one-shot slots pairing requests with applied log indexes
//! - [`server`]: request handling, the apply loop, and lifecycle

pub mod command;
pub mod registry;
pub mod server;
pub mod snapshot;
pub mod store;

pub use command::{Op, OpKind};
pub use registry::{NotifyRegistry, Registered, Submission, Waiter};
pub use server::KvServer;
pub use snapshot::SnapshotError;
pub use store::{Applied, KvStore};

use common::ServerConfig;
use raft::{apply_channel, LocalRaft, Persister, RaftResult};
use std::sync::Arc;

/// A replica running on a one-member consensus node.
pub struct SingleNode {
    pub server: Arc<KvServer>,
    pub raft: Arc<LocalRaft<Op>>,
}

/// Start a replica backed by a [`LocalRaft`] on `persister`.
///
/// Reusing the persister of a killed node restarts it: the snapshot is
/// restored and the log entries after it are applied again.
///
/// # Errors
/// Returns an error if the persisted consensus state cannot be read.
pub fn start_single_node(
    config: ServerConfig,
    persister: Arc<dyn Persister>,
) -> RaftResult<SingleNode> {
    let (apply_tx, apply_rx) = apply_channel();
    let raft = Arc::new(LocalRaft::new(Arc::clone(&persister), apply_tx)?);
    let server = KvServer::start(config, persister, raft.clone(), apply_rx);
    Ok(SingleNode { server, raft })
}
