
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Identifier for a client session.
/// Examples:
/// - `let client: ClientId = 7;`
/// - `let client: ClientId = 0x5eed_cafe;`
pub type ClientId = u64;

/// Per-client request counter used to discard retried requests.
/// Examples:
/// - `let first: SerialNum = 1;`
/// - `let retry_of_first: SerialNum = 1;`
pub type SerialNum = u64;

/// Position assigned to a command by the consensus layer.
pub type LogIndex = u64;

/// Consensus term.
pub type Term = u64;

/// Client-visible failure of a Get or PutAppend request.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KvError {
    /// This replica is not (or is no longer) the leader.
    #[error("wrong leader")]
    WrongLeader,
    /// The request did not commit within the deadline; it may or may not have been applied.
    #[error("timed out waiting for commit")]
    Timeout,
    /// The key was never set.
    #[error("no such key")]
    NoKey,
}

impl KvError {
    /// Whether resending the identical request (same client id and serial number) may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, KvError::WrongLeader | KvError::Timeout)
    }
}

/// Result alias that carries a `KvError`.
pub type KvResult<T> = Result<T, KvError>;

/// Reply code carried over the RPC boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyErr {
    #[default]
    #[serde(rename = "OK")]
    Ok,
    ErrNoKey,
    ErrWrongLeader,
    Timeout,
}

impl From<KvError> for ReplyErr {
    fn from(err: KvError) -> Self {
        match err {
            KvError::WrongLeader => ReplyErr::ErrWrongLeader,
            KvError::Timeout => ReplyErr::Timeout,
            KvError::NoKey => ReplyErr::ErrNoKey,
        }
    }
}

/// Kind of a mutating request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PutAppendKind {
    Put,
    Append,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetArgs {
    pub key: String,
    pub client_id: ClientId,
    pub serial_num: SerialNum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetReply {
    pub err: ReplyErr,
    pub value: String,
}

impl From<KvResult<String>> for GetReply {
    fn from(result: KvResult<String>) -> Self {
        match result {
            Ok(value) => GetReply {
                err: ReplyErr::Ok,
                value,
            },
            Err(err) => GetReply {
                err: err.into(),
                value: String::new(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAppendArgs {
    pub key: String,
    pub value: String,
    pub kind: PutAppendKind,
    pub client_id: ClientId,
    pub serial_num: SerialNum,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAppendReply {
    pub err: ReplyErr,
}

impl From<KvResult<()>> for PutAppendReply {
    fn from(result: KvResult<()>) -> Self {
        PutAppendReply {
            err: result.err().map(ReplyErr::from).unwrap_or(ReplyErr::Ok),
        }
    }
}

/// Startup parameters for one replica of the key/value service.
///
/// # Example
/// ```
/// use common::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::builder()
///     .peers(vec!["kv-0".into(), "kv-1".into(), "kv-2".into()])
///     .me(1)
///     .max_raft_state(8 * 1024)
///     .request_timeout(Duration::from_millis(500))
///     .build();
/// assert!(config.snapshots_enabled());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct ServerConfig {
    /// Cluster membership, one entry per replica.
    #[builder(default)]
    pub peers: Vec<String>,
    /// Index of this replica in `peers`.
    #[builder(default)]
    pub me: usize,
    /// Persisted consensus state size (bytes) at which a snapshot is taken.
    /// `None` disables snapshotting.
    pub max_raft_state: Option<usize>,
    /// Deadline for a single request to commit.
    #[builder(default = Duration::from_secs(1))]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            me: 0,
            max_raft_state: None,
            request_timeout: Duration::from_secs(1),
        }
    }
}

impl ServerConfig {
    /// Set the snapshot threshold from a signed byte count, where any negative
    /// value (conventionally `-1`) disables snapshotting.
    pub fn with_max_raft_state(mut self, max_raft_state: i64) -> Self {
        self.max_raft_state = usize::try_from(max_raft_state).ok();
        self
    }

    pub fn snapshots_enabled(&self) -> bool {
        self.max_raft_state.is_some()
    }

    /// Name of this replica in the membership list, or its index when the list is empty.
    pub fn name(&self) -> String {
        self.peers
            .get(self.me)
            .cloned()
            .unwrap_or_else(|| format!("kv-{}", self.me))
    }
}
