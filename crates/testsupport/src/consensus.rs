//! A consensus layer driven by the test instead of by a protocol.
//!
//! `start` records the command and hands out the next index; nothing is
//! committed until the test says so. Leadership can be flipped at any time,
//! which is how leadership churn and lost entries are simulated.

use common::{LogIndex, Term};
use kvraft::{KvServer, Op};
use parking_lot::Mutex;
use raft::{
    apply_channel, ApplyMsg, ApplyReceiver, ApplySender, Consensus, MemPersister, RaftResult,
    Started,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

#[derive(Debug)]
struct Script {
    term: Term,
    leader: bool,
    next_index: LogIndex,
    auto_commit: bool,
    started: Vec<(Started, Op)>,
    uncommitted: VecDeque<(Started, Op)>,
    discarded: Vec<(LogIndex, Vec<u8>)>,
}

pub struct ScriptedConsensus {
    script: Mutex<Script>,
    apply_tx: ApplySender<Op>,
    started_notify: Notify,
    dead: AtomicBool,
}

impl ScriptedConsensus {
    /// A leader for term 1 whose first submitted command gets index 1.
    pub fn new() -> (Arc<Self>, ApplyReceiver<Op>) {
        let (apply_tx, apply_rx) = apply_channel();
        let consensus = Self {
            script: Mutex::new(Script {
                term: 1,
                leader: true,
                next_index: 1,
                auto_commit: false,
                started: Vec::new(),
                uncommitted: VecDeque::new(),
                discarded: Vec::new(),
            }),
            apply_tx,
            started_notify: Notify::new(),
            dead: AtomicBool::new(false),
        };
        (Arc::new(consensus), apply_rx)
    }

    /// Gain or lose leadership. Gaining it starts a new term.
    pub fn set_leader(&self, leader: bool) {
        let mut script = self.script.lock();
        if leader && !script.leader {
            script.term += 1;
        }
        script.leader = leader;
    }

    /// Commit every submitted command immediately.
    pub fn set_auto_commit(&self, auto_commit: bool) {
        self.script.lock().auto_commit = auto_commit;
    }

    /// Deliver an arbitrary message on the apply stream.
    pub fn deliver(&self, msg: ApplyMsg<Op>) {
        let _ = self.apply_tx.send(msg);
    }

    /// Commit the oldest submitted command that has not been committed yet.
    pub fn commit_next(&self) -> Option<LogIndex> {
        let (started, op) = self.script.lock().uncommitted.pop_front()?;
        self.deliver(ApplyMsg::command(started.index, started.term, op));
        Some(started.index)
    }

    /// Continue numbering after `index`, as a log restored from a snapshot would.
    pub fn resume_after(&self, index: LogIndex) {
        let mut script = self.script.lock();
        script.next_index = script.next_index.max(index + 1);
    }

    /// Deliver a snapshot from another replica, skipping the log past it.
    pub fn install_snapshot(&self, index: LogIndex, term: Term, data: Vec<u8>) {
        self.resume_after(index);
        self.deliver(ApplyMsg::Snapshot { index, term, data });
    }

    /// Forget submitted commands, as a deposed leader's uncommitted tail is lost.
    pub fn drop_uncommitted(&self) {
        self.script.lock().uncommitted.clear();
    }

    /// Every command accepted by `start`, in order.
    pub fn started(&self) -> Vec<(Started, Op)> {
        self.script.lock().started.clone()
    }

    /// Every `(up_to, snapshot)` pair passed to `discard_entries`.
    pub fn discarded(&self) -> Vec<(LogIndex, Vec<u8>)> {
        self.script.lock().discarded.clone()
    }

    /// Wait until at least `n` commands have been accepted.
    pub async fn wait_started(&self, n: usize) {
        loop {
            let notified = self.started_notify.notified();
            if self.script.lock().started.len() >= n {
                return;
            }
            notified.await;
        }
    }
}

impl Consensus<Op> for ScriptedConsensus {
    fn start(&self, command: Op) -> Option<Started> {
        if self.dead.load(Ordering::SeqCst) {
            return None;
        }
        let mut script = self.script.lock();
        if !script.leader {
            return None;
        }
        let started = Started {
            index: script.next_index,
            term: script.term,
        };
        script.next_index += 1;
        script.started.push((started, command.clone()));
        if script.auto_commit {
            let _ = self
                .apply_tx
                .send(ApplyMsg::command(started.index, started.term, command));
        } else {
            script.uncommitted.push_back((started, command));
        }
        drop(script);

        self.started_notify.notify_waiters();
        Some(started)
    }

    fn state(&self) -> (Term, bool) {
        let script = self.script.lock();
        (script.term, script.leader && !self.dead.load(Ordering::SeqCst))
    }

    fn discard_entries(&self, up_to: LogIndex, snapshot: Vec<u8>) -> RaftResult<()> {
        self.script.lock().discarded.push((up_to, snapshot));
        Ok(())
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

/// A replica wired to a [`ScriptedConsensus`].
pub struct ScriptedNode {
    pub server: Arc<KvServer>,
    pub consensus: Arc<ScriptedConsensus>,
    pub persister: MemPersister,
}

/// Start a replica on a scripted consensus layer with `config`.
pub fn scripted_node(config: common::ServerConfig) -> ScriptedNode {
    scripted_node_with_persister(config, MemPersister::new())
}

/// Start a replica on a scripted consensus layer reading `persister`.
pub fn scripted_node_with_persister(
    config: common::ServerConfig,
    persister: MemPersister,
) -> ScriptedNode {
    let (consensus, apply_rx) = ScriptedConsensus::new();
    let server = KvServer::start(
        config,
        Arc::new(persister.clone()),
        consensus.clone(),
        apply_rx,
    );
    ScriptedNode {
        server,
        consensus,
        persister,
    }
}
