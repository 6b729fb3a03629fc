//! Ordered delivery of committed entries to the state machine.
//!
//! Every committed log entry is delivered exactly in commit order. A replica
//! that fell too far behind is fast-forwarded with a snapshot instead.

use crate::{LogIndex, Term};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Content of a committed log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload<C> {
    /// Barrier committed by a new leader to establish a commit point.
    /// Carries no command and must not affect the state machine.
    Blank,
    /// A client command.
    Normal(C),
}

/// One item of the ordered delivery stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyMsg<C> {
    /// A committed entry at `index`.
    Command {
        index: LogIndex,
        term: Term,
        payload: EntryPayload<C>,
    },
    /// Out-of-band snapshot install; `data` replaces the state machine wholesale.
    Snapshot {
        index: LogIndex,
        term: Term,
        data: Vec<u8>,
    },
}

impl<C> ApplyMsg<C> {
    /// Log index this message brings the state machine up to.
    pub fn index(&self) -> LogIndex {
        match self {
            ApplyMsg::Command { index, .. } | ApplyMsg::Snapshot { index, .. } => *index,
        }
    }

    /// Create a message for a committed client command.
    pub fn command(index: LogIndex, term: Term, command: C) -> Self {
        ApplyMsg::Command {
            index,
            term,
            payload: EntryPayload::Normal(command),
        }
    }

    /// Create a message for a committed barrier entry.
    pub fn blank(index: LogIndex, term: Term) -> Self {
        ApplyMsg::Command {
            index,
            term,
            payload: EntryPayload::Blank,
        }
    }
}

/// Sending half of the delivery stream. Unbounded, so the consensus layer
/// never blocks on a slow state machine.
pub type ApplySender<C> = mpsc::UnboundedSender<ApplyMsg<C>>;

/// Receiving half of the delivery stream, drained by a single consumer.
pub type ApplyReceiver<C> = mpsc::UnboundedReceiver<ApplyMsg<C>>;

/// Create a new delivery stream.
pub fn apply_channel<C>() -> (ApplySender<C>, ApplyReceiver<C>) {
    mpsc::unbounded_channel()
}
