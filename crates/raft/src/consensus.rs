//! The consensus-layer interface the state machine is written against.

use crate::{LogIndex, RaftResult, Term};

/// Position a submitted command was given by the leader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Started {
    pub index: LogIndex,
    pub term: Term,
}

/// A replication protocol instance, seen from the state machine it drives.
///
/// Committed entries come back on the [`ApplyReceiver`](crate::ApplyReceiver)
/// handed out when the node was built, never through this trait.
pub trait Consensus<C>: Send + Sync {
    /// Submit a command. Returns immediately; `None` means this node is not
    /// the leader and the command has no durable effect. Acceptance is no
    /// promise of commit: a leader may lose its term before the entry commits.
    fn start(&self, command: C) -> Option<Started>;

    /// Current term and whether this node believes it is the leader.
    /// Local and non-blocking.
    fn state(&self) -> (Term, bool);

    /// Atomically persist `snapshot` and discard log entries up to and
    /// including `up_to`.
    fn discard_entries(&self, up_to: LogIndex, snapshot: Vec<u8>) -> RaftResult<()>;

    /// Stop background activity. After this the node never reports leadership.
    fn kill(&self);

    fn is_leader(&self) -> bool {
        self.state().1
    }
}
