//! Single-replica consensus node.
//!
//! With one member the node is its own majority: an entry is committed as
//! soon as it is appended and persisted, and is delivered immediately.
//! Everything else follows the full contract: a `Blank` barrier opens every
//! term, committed entries survive restarts through the persister and are
//! redelivered after the last snapshot, and the log can be compacted.
//!
//! Every append re-encodes and persists the whole retained log, so a
//! submission costs time proportional to the entries since the last
//! snapshot. With snapshots disabled that grows without bound; this node is
//! meant for single-replica deployments and tests, not long unsnapshotted
//! runs.

use crate::apply::{ApplyMsg, ApplySender, EntryPayload};
use crate::consensus::{Consensus, Started};
use crate::persister::Persister;
use crate::{LogIndex, RaftResult, Term};

use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info, warn};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct LogEntry<C> {
    term: Term,
    payload: EntryPayload<C>,
}

/// Log state guarded by the node's lock.
struct LogState<C> {
    snapshot_index: LogIndex,
    snapshot_term: Term,
    /// Entries after `snapshot_index`, keyed by index.
    entries: BTreeMap<LogIndex, LogEntry<C>>,
    /// Taken on kill, which closes the delivery stream.
    apply_tx: Option<ApplySender<C>>,
}

impl<C> LogState<C> {
    fn last_index(&self) -> LogIndex {
        self.entries
            .keys()
            .next_back()
            .copied()
            .unwrap_or(self.snapshot_index)
    }

    fn deliver(&self, msg: ApplyMsg<C>) {
        if let Some(tx) = &self.apply_tx {
            // A dropped receiver means the state machine is gone.
            let _ = tx.send(msg);
        }
    }
}

/// Persisted layout: (term, snapshot_index, snapshot_term, entries).
type PersistedLog<C> = (Term, LogIndex, Term, BTreeMap<LogIndex, LogEntry<C>>);

/// A one-member cluster.
pub struct LocalRaft<C> {
    persister: Arc<dyn Persister>,
    term: AtomicU64,
    state: Mutex<LogState<C>>,
    dead: AtomicBool,
}

impl<C> LocalRaft<C>
where
    C: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    /// Start a node on `persister`, delivering committed entries to `apply_tx`.
    ///
    /// On startup:
    /// 1. Restores the log persisted by a previous instance
    /// 2. Redelivers every entry after the last snapshot, in order
    /// 3. Opens a new term with a committed `Blank` barrier
    ///
    /// # Errors
    /// Returns an error if the persisted log cannot be decoded or the new
    /// term cannot be persisted.
    pub fn new(persister: Arc<dyn Persister>, apply_tx: ApplySender<C>) -> RaftResult<Self> {
        let raw = persister.read_raft_state();
        let (term, snapshot_index, snapshot_term, entries): PersistedLog<C> = if raw.is_empty() {
            (0, 0, 0, BTreeMap::new())
        } else {
            decode_from_slice(&raw, config::standard())?.0
        };

        let mut state = LogState {
            snapshot_index,
            snapshot_term,
            entries,
            apply_tx: Some(apply_tx),
        };

        for (index, entry) in &state.entries {
            state.deliver(ApplyMsg::Command {
                index: *index,
                term: entry.term,
                payload: entry.payload.clone(),
            });
        }

        let term = term + 1;
        let barrier = state.last_index() + 1;
        state.entries.insert(
            barrier,
            LogEntry {
                term,
                payload: EntryPayload::Blank,
            },
        );

        let node = Self {
            persister,
            term: AtomicU64::new(term),
            state: Mutex::new(state),
            dead: AtomicBool::new(false),
        };

        {
            let state = node.state.lock();
            node.persist(&state)?;
            state.deliver(ApplyMsg::blank(barrier, term));
        }

        info!(
            term,
            snapshot_index,
            last_index = barrier,
            "local raft node started"
        );
        Ok(node)
    }

    fn encode(&self, state: &LogState<C>) -> RaftResult<Vec<u8>> {
        let term = self.term.load(Ordering::SeqCst);
        let persisted = (
            term,
            state.snapshot_index,
            state.snapshot_term,
            &state.entries,
        );
        Ok(encode_to_vec(persisted, config::standard())?)
    }

    fn persist(&self, state: &LogState<C>) -> RaftResult<()> {
        self.persister.save_raft_state(self.encode(state)?)
    }

    /// Drop entries up to `index`, keeping any suffix that still agrees with
    /// the snapshot at `(index, term)`.
    fn compact(state: &mut LogState<C>, index: LogIndex, term: Term) {
        let agrees = state.entries.get(&index).is_some_and(|e| e.term == term);
        if agrees {
            state.entries = state.entries.split_off(&(index + 1));
        } else {
            state.entries.clear();
        }
        state.snapshot_index = index;
        state.snapshot_term = term;
    }

    /// Fast-forward this node to a snapshot, as a leader's InstallSnapshot
    /// would. The snapshot is persisted and then delivered to the state
    /// machine. Snapshots not newer than the current one are ignored.
    pub fn install_snapshot(&self, index: LogIndex, term: Term, data: Vec<u8>) -> RaftResult<()> {
        if self.killed() {
            return Ok(());
        }
        let mut state = self.state.lock();
        if index <= state.snapshot_index {
            debug!(index, snapshot_index = state.snapshot_index, "ignoring stale snapshot");
            return Ok(());
        }

        Self::compact(&mut state, index, term);
        self.persister
            .save_state_and_snapshot(self.encode(&state)?, data.clone())?;
        state.deliver(ApplyMsg::Snapshot { index, term, data });
        info!(index, term, "installed snapshot");
        Ok(())
    }

    pub fn killed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Index of the last entry in the log (or of the snapshot when the log is empty).
    pub fn last_index(&self) -> LogIndex {
        self.state.lock().last_index()
    }

    /// Index covered by the latest snapshot.
    pub fn snapshot_index(&self) -> LogIndex {
        self.state.lock().snapshot_index
    }

    /// Number of entries retained after the snapshot.
    pub fn log_len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl<C> Consensus<C> for LocalRaft<C>
where
    C: Clone + Serialize + DeserializeOwned + Send + 'static,
{
    fn start(&self, command: C) -> Option<Started> {
        if self.killed() {
            return None;
        }
        let term = self.term.load(Ordering::SeqCst);
        let mut state = self.state.lock();
        let index = state.last_index() + 1;
        state.entries.insert(
            index,
            LogEntry {
                term,
                payload: EntryPayload::Normal(command.clone()),
            },
        );

        // An entry that cannot be made durable was never accepted.
        if let Err(e) = self.persist(&state) {
            warn!(index, error = %e, "failed to persist log entry");
            state.entries.remove(&index);
            return None;
        }

        state.deliver(ApplyMsg::command(index, term, command));
        Some(Started { index, term })
    }

    fn state(&self) -> (Term, bool) {
        (self.term.load(Ordering::SeqCst), !self.killed())
    }

    fn discard_entries(&self, up_to: LogIndex, snapshot: Vec<u8>) -> RaftResult<()> {
        let mut state = self.state.lock();
        if up_to <= state.snapshot_index {
            return Ok(());
        }
        let term = match state.entries.get(&up_to) {
            Some(entry) => entry.term,
            None => {
                warn!(up_to, last_index = state.last_index(), "discard beyond end of log");
                return Ok(());
            }
        };

        Self::compact(&mut state, up_to, term);
        self.persister
            .save_state_and_snapshot(self.encode(&state)?, snapshot)?;
        debug!(up_to, remaining = state.entries.len(), "discarded log prefix");
        Ok(())
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.state.lock().apply_tx = None;
    }
}
