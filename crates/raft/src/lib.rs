//! Consensus-layer contract consumed by the replicated key/value state machine.
//!
//! The state machine never talks to a replication protocol directly. It sees a
//! narrow surface:
//!
//! ```text
//!   Request Handler ──start()/state()──▶ ┌──────────────────┐
//!                                         │  Consensus<C>    │──▶ Persister
//!   Apply Loop ◀──── ApplyMsg<C> stream ──│  (black box)     │    (raft state + snapshot)
//!   Apply Loop ──discard_entries()──────▶ └──────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`apply`]: the ordered delivery stream (`ApplyMsg`, `EntryPayload`)
//! - [`consensus`]: the `Consensus` trait
//! - [`config`]: node configuration (data directory, persistence mode)
//! - [`persister`]: the `Persister` trait and the in-memory implementation
//! - [`persistent_storage`]: durable, checksummed file-backed persister
//! - [`local`]: `LocalRaft`, a single-replica node (a majority of one commits on append)
//!
//! # Single-Node Mode
//!
//! ```rust,ignore
//! use raft::{apply_channel, LocalRaft, MemPersister};
//! use std::sync::Arc;
//!
//! let persister = Arc::new(MemPersister::new());
//! let (apply_tx, apply_rx) = apply_channel::<String>();
//! let node = LocalRaft::new(persister, apply_tx)?;
//! let started = node.start("hello".to_string());
//! ```

pub mod apply;
pub mod config;
pub mod consensus;
pub mod local;
pub mod persistent_storage;
pub mod persister;

pub use apply::{apply_channel, ApplyMsg, ApplyReceiver, ApplySender, EntryPayload};
pub use config::NodeConfig;
pub use consensus::{Consensus, Started};
pub use local::LocalRaft;
pub use persistent_storage::FilePersister;
pub use persister::{MemPersister, Persister};

pub use common::{LogIndex, Term};

use std::io;
use thiserror::Error;

/// Failure inside the consensus layer's persistence.
#[derive(Error, Debug)]
pub enum RaftError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("corrupt persisted state: {0}")]
    Corrupt(String),
}

/// Result alias that carries a `RaftError`.
pub type RaftResult<T> = Result<T, RaftError>;
